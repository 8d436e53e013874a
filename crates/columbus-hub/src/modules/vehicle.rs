//! The `vehicle` module: drive motor and steering servo.
//!
//! | Event           | Payload                          | Effect                         |
//! |-----------------|----------------------------------|--------------------------------|
//! | `vehicle_speed` | number or `{"speed": n}`         | clamp to ±`max_speed`, drive   |
//! | `vehicle_steer` | number or `{"angle": deg}`       | clamp to `0..=max_angle`, steer |
//! | `vehicle_stop`  | ignored                          | speed 0                        |
//!
//! After the driver accepts a command the new value is merged into the
//! module state, which the hub broadcasts as `{t: "vehicle", p: {...}}`.
//! When the last client disconnects the vehicle is stopped.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::application::{
    CapabilityModule, EventContext, HandlerError, Hub, ListenerTable, DISCONNECT_EVENT,
};
use crate::domain::VehicleConfig;
use crate::modules::{run_blocking, HardwareError};

/// Module name and state key.
pub const NAME: &str = "vehicle";

pub const SPEED_EVENT: &str = "vehicle_speed";
pub const STEER_EVENT: &str = "vehicle_steer";
pub const STOP_EVENT: &str = "vehicle_stop";

/// Blocking motor and servo driver.
///
/// Implementations own their device handles; none of these calls may be made
/// on an async worker thread.
#[cfg_attr(test, mockall::automock)]
pub trait MotorDriver: Send + Sync {
    /// Whether the motor controller is attached.
    fn is_connected(&self) -> bool;

    /// Prepares the device for commands.
    fn initialise(&self) -> Result<(), HardwareError>;

    /// Sets the drive speed in percent of full throttle; negative reverses.
    fn set_speed(&self, speed: i64) -> Result<(), HardwareError>;

    /// Moves the steering servo to `degrees`.
    fn set_steering(&self, degrees: f64) -> Result<(), HardwareError>;

    /// Stops the motor and releases the device.
    fn release(&self) -> Result<(), HardwareError>;
}

pub struct VehicleModule {
    driver: Arc<dyn MotorDriver>,
    config: VehicleConfig,
}

impl VehicleModule {
    pub fn new(driver: Arc<dyn MotorDriver>, config: VehicleConfig) -> Arc<Self> {
        Arc::new(Self { driver, config })
    }

    /// Rounds and clamps a requested speed to `±max_speed`.
    pub fn clamp_speed(&self, requested: f64) -> i64 {
        let limit = self.config.max_speed.saturating_abs();
        // `as` saturates out-of-range floats.
        (requested.round() as i64).clamp(-limit, limit)
    }

    /// Clamps a requested steering angle to `0..=max_steering_angle`.
    pub fn clamp_angle(&self, requested: f64) -> f64 {
        requested.min(self.config.max_steering_angle).max(0.0)
    }

    async fn drive(&self, hub: &Arc<Hub>, speed: i64) -> Result<(), HandlerError> {
        let driver = Arc::clone(&self.driver);
        run_blocking(move || driver.set_speed(speed)).await?;
        debug!("{NAME}: speed {speed}");
        hub.state_update(NAME, single("speed", json!(speed))).wait().await;
        Ok(())
    }

    async fn steer(&self, hub: &Arc<Hub>, angle: f64) -> Result<(), HandlerError> {
        let driver = Arc::clone(&self.driver);
        run_blocking(move || driver.set_steering(angle)).await?;
        debug!("{NAME}: steering {angle}°");
        hub.state_update(NAME, single("angle", json!(angle))).wait().await;
        Ok(())
    }

    async fn on_speed(&self, ctx: EventContext) -> Result<(), HandlerError> {
        let requested = number_arg(&ctx, "speed")?;
        self.drive(&ctx.hub, self.clamp_speed(requested)).await
    }

    async fn on_steer(&self, ctx: EventContext) -> Result<(), HandlerError> {
        let requested = number_arg(&ctx, "angle")?;
        self.steer(&ctx.hub, self.clamp_angle(requested)).await
    }

    async fn on_disconnect(&self, ctx: EventContext) -> Result<(), HandlerError> {
        if ctx.hub.connection_count() > 0 {
            return Ok(());
        }
        info!("{NAME}: last client left; stopping");
        self.drive(&ctx.hub, 0).await
    }
}

#[async_trait]
impl CapabilityModule for VehicleModule {
    fn name(&self) -> &str {
        NAME
    }

    async fn is_active(&self) -> anyhow::Result<bool> {
        let driver = Arc::clone(&self.driver);
        Ok(run_blocking(move || Ok(driver.is_connected())).await?)
    }

    fn handlers(self: Arc<Self>) -> ListenerTable<EventContext> {
        let speed = Arc::clone(&self);
        let steer = Arc::clone(&self);
        let stop = Arc::clone(&self);
        let disconnect = self;
        ListenerTable::new()
            .on_async(SPEED_EVENT, move |ctx: EventContext| {
                let this = Arc::clone(&speed);
                async move { this.on_speed(ctx).await }
            })
            .on_async(STEER_EVENT, move |ctx: EventContext| {
                let this = Arc::clone(&steer);
                async move { this.on_steer(ctx).await }
            })
            .on_async(STOP_EVENT, move |ctx: EventContext| {
                let this = Arc::clone(&stop);
                async move { this.drive(&ctx.hub, 0).await }
            })
            .on_async(DISCONNECT_EVENT, move |ctx: EventContext| {
                let this = Arc::clone(&disconnect);
                async move { this.on_disconnect(ctx).await }
            })
    }

    async fn on_load(&self, hub: &Arc<Hub>) -> anyhow::Result<()> {
        let driver = Arc::clone(&self.driver);
        run_blocking(move || driver.initialise()).await?;
        hub.state_update(NAME, single("speed", json!(0)));
        Ok(())
    }

    async fn on_unload(&self, _hub: &Arc<Hub>) -> anyhow::Result<()> {
        let driver = Arc::clone(&self.driver);
        run_blocking(move || driver.release()).await?;
        Ok(())
    }
}

fn single(key: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    map
}

/// Reads a bare number payload, or `key` of an object payload.
fn number_arg(ctx: &EventContext, key: &str) -> Result<f64, HandlerError> {
    let value = match &ctx.payload {
        Value::Object(fields) => fields.get(key),
        other => Some(other),
    };
    value.and_then(Value::as_f64).ok_or_else(|| {
        HandlerError::InvalidPayload(format!("{}: expected a number, got {}", ctx.event, ctx.payload))
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HubConfig;
    use crate::infrastructure::memory_link::MemoryLink;
    use mockall::predicate::eq;

    fn present_driver() -> MockMotorDriver {
        let mut driver = MockMotorDriver::new();
        driver.expect_is_connected().return_const(true);
        driver.expect_initialise().times(1).returning(|| Ok(()));
        driver
    }

    async fn loaded_hub(driver: MockMotorDriver) -> Arc<Hub> {
        let module = VehicleModule::new(Arc::new(driver), VehicleConfig::default());
        let hub = Hub::new(HubConfig::default(), vec![module]).unwrap();
        let outcome = hub.tick().await;
        assert_eq!(outcome.report.loaded, 1);
        hub
    }

    #[test]
    fn test_clamp_speed_limits_both_directions() {
        let module = VehicleModule::new(Arc::new(MockMotorDriver::new()), VehicleConfig::default());
        assert_eq!(module.clamp_speed(250.0), 100);
        assert_eq!(module.clamp_speed(-250.0), -100);
        assert_eq!(module.clamp_speed(42.4), 42);
    }

    #[test]
    fn test_clamp_angle_stays_in_servo_range() {
        let module = VehicleModule::new(Arc::new(MockMotorDriver::new()), VehicleConfig::default());
        assert_eq!(module.clamp_angle(-10.0), 0.0);
        assert_eq!(module.clamp_angle(200.0), 140.0);
        assert_eq!(module.clamp_angle(70.0), 70.0);
    }

    #[tokio::test]
    async fn test_speed_event_drives_motor_and_broadcasts_state() {
        // Arrange
        let mut driver = present_driver();
        driver
            .expect_set_speed()
            .with(eq(50))
            .times(1)
            .returning(|_| Ok(()));
        let hub = loaded_hub(driver).await;
        let link = MemoryLink::new();
        let _registration = hub.attach(link.clone()).await.unwrap();

        // Act
        hub.route_inbound(link.clone(), SPEED_EVENT, json!(50)).settle().await;

        // Assert
        assert_eq!(link.dispatched(NAME), vec![json!({"speed": 50})]);
    }

    #[tokio::test]
    async fn test_speed_is_clamped_before_reaching_driver() {
        let mut driver = present_driver();
        driver
            .expect_set_speed()
            .with(eq(-100))
            .times(1)
            .returning(|_| Ok(()));
        let hub = loaded_hub(driver).await;
        let link = MemoryLink::new();
        let _registration = hub.attach(link.clone()).await.unwrap();

        hub.route_inbound(link.clone(), SPEED_EVENT, json!({"speed": -900}))
            .settle()
            .await;

        assert_eq!(hub.module_state(NAME), Some(json!({"speed": -100})));
    }

    #[tokio::test]
    async fn test_steer_event_merges_angle_into_state() {
        // Arrange
        let mut driver = present_driver();
        driver
            .expect_set_steering()
            .with(eq(140.0))
            .times(1)
            .returning(|_| Ok(()));
        let hub = loaded_hub(driver).await;
        let link = MemoryLink::new();
        let _registration = hub.attach(link.clone()).await.unwrap();

        // Act
        hub.route_inbound(link.clone(), STEER_EVENT, json!(170)).settle().await;

        // Assert
        assert_eq!(hub.module_state(NAME), Some(json!({"speed": 0, "angle": 140.0})));
    }

    #[tokio::test]
    async fn test_invalid_payload_leaves_driver_untouched() {
        // Arrange: no set_speed expectation, so a call would panic the mock.
        let hub = loaded_hub(present_driver()).await;
        let link = MemoryLink::new();
        let _registration = hub.attach(link.clone()).await.unwrap();

        // Act
        hub.route_inbound(link.clone(), SPEED_EVENT, json!("fast")).settle().await;

        // Assert
        assert!(link.dispatched(NAME).is_empty());
    }

    #[tokio::test]
    async fn test_driver_failure_does_not_update_state() {
        let mut driver = present_driver();
        driver
            .expect_set_speed()
            .returning(|_| Err(HardwareError::Device("stalled".into())));
        let hub = loaded_hub(driver).await;
        let link = MemoryLink::new();
        let _registration = hub.attach(link.clone()).await.unwrap();

        hub.route_inbound(link.clone(), SPEED_EVENT, json!(30)).settle().await;

        assert_eq!(hub.module_state(NAME), Some(json!({"speed": 0})));
    }

    #[tokio::test]
    async fn test_last_disconnect_stops_vehicle() {
        // Arrange
        let mut driver = present_driver();
        driver
            .expect_set_speed()
            .with(eq(0))
            .times(1)
            .returning(|_| Ok(()));
        let hub = loaded_hub(driver).await;
        let first = hub.attach(MemoryLink::new()).await.unwrap();
        let second = hub.attach(MemoryLink::new()).await.unwrap();

        // Act: only the second detach leaves the hub empty.
        hub.detach(first).settle().await;
        hub.detach(second).settle().await;

        // Assert
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_driver_keeps_module_unloaded() {
        let mut driver = MockMotorDriver::new();
        driver.expect_is_connected().return_const(false);
        let module = VehicleModule::new(Arc::new(driver), VehicleConfig::default());
        let hub = Hub::new(HubConfig::default(), vec![module]).unwrap();

        hub.tick().await;

        assert!(hub.loaded_modules().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_releases_driver() {
        let mut driver = present_driver();
        driver.expect_release().times(1).returning(|| Ok(()));
        let hub = loaded_hub(driver).await;

        hub.shutdown().await;

        assert!(hub.loaded_modules().is_empty());
    }
}
