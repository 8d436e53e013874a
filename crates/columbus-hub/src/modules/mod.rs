//! Capability modules shipped with the hub.
//!
//! Each module owns one piece of hardware, reached through a driver trait
//! defined next to it.  Driver calls are blocking, so every one of them runs
//! on the runtime's blocking pool via [`run_blocking`].
//!
//! | Module | Driver seam     | Events                                   |
//! |--------|-----------------|------------------------------------------|
//! | `vehicle` | [`MotorDriver`] | `vehicle_speed`, `vehicle_steer`, `vehicle_stop` |
//! | `cam`  | [`CameraProbe`] | `cam_request`                            |

pub mod camera;
pub mod vehicle;

use std::sync::Arc;

use thiserror::Error;

use crate::application::{CapabilityModule, HandlerError};
use crate::domain::HubConfig;

pub use camera::{CameraModule, CameraProbe};
pub use vehicle::{MotorDriver, VehicleModule};

/// Error type for driver operations.
#[derive(Debug, Error)]
pub enum HardwareError {
    /// The device is not attached.
    #[error("device not connected")]
    NotConnected,

    /// A command was issued before [`MotorDriver::initialise`].
    #[error("driver not initialised")]
    NotInitialised,

    /// The device rejected the command.
    #[error("device error: {0}")]
    Device(String),
}

impl From<HardwareError> for HandlerError {
    fn from(e: HardwareError) -> Self {
        HandlerError::Hardware(e.to_string())
    }
}

/// Runs a blocking driver call on the blocking pool.
///
/// # Errors
///
/// The driver's own error, or [`HardwareError::Device`] if the call panicked
/// or the pool was shut down.
pub async fn run_blocking<T, F>(call: F) -> Result<T, HardwareError>
where
    F: FnOnce() -> Result<T, HardwareError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| HardwareError::Device(format!("driver call aborted: {e}")))?
}

/// Builds the enabled bundled modules around the given drivers.
pub fn bundled(
    config: &HubConfig,
    motor: Arc<dyn MotorDriver>,
    camera: Arc<dyn CameraProbe>,
) -> Vec<Arc<dyn CapabilityModule>> {
    let mut modules: Vec<Arc<dyn CapabilityModule>> = Vec::new();
    if config.vehicle.enabled {
        modules.push(VehicleModule::new(motor, config.vehicle.clone()));
    }
    if config.camera.enabled {
        modules.push(CameraModule::new(camera, config.camera.clone()));
    }
    modules
}

// ── Tests ─────────────────────────────────────────────────────────────────────
