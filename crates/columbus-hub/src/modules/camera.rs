//! The `cam` module: tells clients where the video stream lives.
//!
//! The stream itself is served outside the hub.  This module only tracks
//! whether the camera is present, mounts `GET /cam/stream` in the route table
//! and announces `cam_available {port, route}`:
//!
//! - to every client when the module loads;
//! - to each client as it connects;
//! - to the requester on `cam_request`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use columbus_core::Frame;
use serde_json::{json, Value};
use tracing::info;

use crate::application::{CapabilityModule, EventContext, Hub, ListenerTable, CONNECT_EVENT};
use crate::domain::{CameraConfig, HttpRoute};
use crate::modules::run_blocking;

/// Module name; also the prefix of its HTTP routes.
pub const NAME: &str = "cam";

pub const AVAILABLE_EVENT: &str = "cam_available";
pub const REQUEST_EVENT: &str = "cam_request";

const STREAM_ROUTE: &str = "stream";

/// Blocking check for the camera device.
pub trait CameraProbe: Send + Sync {
    fn is_present(&self) -> bool;

    /// Device the probe looks at, for log messages.
    fn device(&self) -> Option<&Path> {
        None
    }
}

pub struct CameraModule {
    probe: Arc<dyn CameraProbe>,
    config: CameraConfig,
}

impl CameraModule {
    pub fn new(probe: Arc<dyn CameraProbe>, config: CameraConfig) -> Arc<Self> {
        Arc::new(Self { probe, config })
    }

    /// Payload of `cam_available`.
    pub fn announcement(&self) -> Value {
        json!({
            "port": self.config.stream_port,
            "route": HttpRoute::get(STREAM_ROUTE).mounted_path(NAME),
        })
    }

    fn announcement_frame(&self) -> Frame {
        Frame::dispatch(AVAILABLE_EVENT, self.announcement())
    }
}

#[async_trait]
impl CapabilityModule for CameraModule {
    fn name(&self) -> &str {
        NAME
    }

    async fn is_active(&self) -> anyhow::Result<bool> {
        let probe = Arc::clone(&self.probe);
        Ok(run_blocking(move || Ok(probe.is_present())).await?)
    }

    fn handlers(self: Arc<Self>) -> ListenerTable<EventContext> {
        let on_connect = Arc::clone(&self);
        let on_request = self;
        ListenerTable::new()
            .on_async(CONNECT_EVENT, move |ctx: EventContext| {
                let frame = on_connect.announcement_frame();
                async move { ctx.reply(&frame).await }
            })
            .on_async(REQUEST_EVENT, move |ctx: EventContext| {
                let frame = on_request.announcement_frame();
                async move { ctx.reply(&frame).await }
            })
    }

    fn http_routes(&self) -> Vec<HttpRoute> {
        vec![HttpRoute::get(STREAM_ROUTE)]
    }

    async fn on_load(&self, hub: &Arc<Hub>) -> anyhow::Result<()> {
        match self.probe.device() {
            Some(device) => info!("{NAME}: camera found at {}", device.display()),
            None => info!("{NAME}: camera found"),
        }
        hub.dispatch(AVAILABLE_EVENT, self.announcement());
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HttpMethod, HubConfig};
    use crate::infrastructure::hardware::FixedProbe;
    use crate::infrastructure::memory_link::MemoryLink;

    fn camera_hub(present: bool) -> (Arc<Hub>, Arc<FixedProbe>) {
        let probe = Arc::new(FixedProbe::new(present));
        let module = CameraModule::new(probe.clone(), CameraConfig::default());
        let hub = Hub::new(HubConfig::default(), vec![module]).unwrap();
        (hub, probe)
    }

    #[test]
    fn test_announcement_names_port_and_route() {
        let module = CameraModule::new(Arc::new(FixedProbe::new(true)), CameraConfig::default());
        assert_eq!(module.announcement(), json!({"port": 8081, "route": "/cam/stream"}));
    }

    #[tokio::test]
    async fn test_load_mounts_route_and_announces_to_all_clients() {
        // Arrange
        let (hub, _) = camera_hub(true);
        let link = MemoryLink::new();
        let _registration = hub.attach(link.clone()).await.unwrap();

        // Act
        let outcome = hub.tick().await;
        outcome.broadcast.unwrap().wait().await;
        tokio::task::yield_now().await;

        // Assert
        assert_eq!(hub.resolve_route(HttpMethod::Get, "/cam/stream").as_deref(), Some(NAME));
        assert_eq!(
            link.dispatched(AVAILABLE_EVENT),
            vec![json!({"port": 8081, "route": "/cam/stream"})]
        );
    }

    #[tokio::test]
    async fn test_new_client_receives_announcement_on_connect() {
        // Arrange
        let (hub, _) = camera_hub(true);
        hub.tick().await;
        let link = MemoryLink::new();

        // Act
        let mut registration = hub.attach(link.clone()).await.unwrap();
        registration.connected().await;

        // Assert
        assert_eq!(link.dispatched(AVAILABLE_EVENT).len(), 1);
    }

    #[tokio::test]
    async fn test_request_is_answered_to_requester_only() {
        // Arrange
        let (hub, _) = camera_hub(true);
        hub.tick().await;
        let asker = MemoryLink::new();
        let bystander = MemoryLink::new();
        let mut asking = hub.attach(asker.clone()).await.unwrap();
        let mut watching = hub.attach(bystander.clone()).await.unwrap();
        asking.connected().await;
        watching.connected().await;

        // Act
        hub.route_inbound(asker.clone(), REQUEST_EVENT, json!({})).settle().await;

        // Assert
        assert_eq!(asker.dispatched(AVAILABLE_EVENT).len(), 2);
        assert_eq!(bystander.dispatched(AVAILABLE_EVENT).len(), 1);
    }

    #[tokio::test]
    async fn test_camera_removal_unmounts_route() {
        // Arrange
        let (hub, probe) = camera_hub(true);
        hub.tick().await;

        // Act
        probe.set(false);
        let outcome = hub.tick().await;

        // Assert
        assert_eq!(outcome.report.unloaded, 1);
        assert!(hub.resolve_route(HttpMethod::Get, "/cam/stream").is_none());
        assert_eq!(hub.listener_count(REQUEST_EVENT), 0);
    }
}
