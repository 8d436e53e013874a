//! Hub configuration types.
//!
//! [`HubConfig`] is the single source of truth for all runtime settings.  It
//! starts from [`HubConfig::default`], is overlaid with the TOML config file
//! (see `infrastructure::storage::config`), and finally with CLI arguments in
//! `main.rs`.
//!
//! Keeping configuration as a plain struct (no global state, no environment
//! reads inside the domain) makes the hub easy to embed in tests with short
//! heartbeat intervals.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use columbus_core::protocol::SUBPROTOCOL;

/// All runtime configuration for the hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Address and port the WebSocket server binds to.
    pub bind_addr: SocketAddr,

    /// HTTP path that accepts the WebSocket upgrade.
    pub ws_path: String,

    /// WebSocket subprotocol selected when the client offers it.
    pub subprotocol: String,

    /// Reject clients that do not offer [`HubConfig::subprotocol`].
    ///
    /// Browsers that omit the `Sec-WebSocket-Protocol` header are accepted
    /// when this is `false`.
    pub require_subprotocol: bool,

    /// Heartbeat period, initial grace period and ack timeout, all in one.
    pub heartbeat_interval: Duration,

    /// Period of the module lifecycle tick.
    pub lifecycle_interval: Duration,

    /// Only route inbound dispatches whose event name a loaded module has
    /// advertised.  When `false` any event name is routable.
    pub restrict_events: bool,

    /// Upper bound of the blocking worker pool used for hardware calls.
    pub blocking_threads: usize,

    /// Settings of the bundled vehicle module.
    pub vehicle: VehicleConfig,

    /// Settings of the bundled camera module.
    pub camera: CameraConfig,
}

/// Settings of the `vehicle` capability module.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleConfig {
    /// Whether the module is registered with the lifecycle manager at all.
    pub enabled: bool,
    /// Absolute speed limit in percent of full throttle.
    pub max_speed: i64,
    /// Upper end of the steering servo range in degrees (lower end is 0).
    pub max_steering_angle: f64,
}

/// Settings of the `cam` capability module.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraConfig {
    /// Whether the module is registered with the lifecycle manager at all.
    pub enabled: bool,
    /// Device node whose presence makes the camera available.
    pub device: PathBuf,
    /// Port announced to clients for the video stream route.
    pub stream_port: u16,
}

impl Default for HubConfig {
    /// Returns a `HubConfig` suitable for running on the robot itself.
    ///
    /// | Field               | Default          |
    /// |---------------------|------------------|
    /// | bind_addr           | `0.0.0.0:8080`   |
    /// | ws_path             | `/ws`            |
    /// | subprotocol         | `columbus`       |
    /// | require_subprotocol | `false`          |
    /// | heartbeat_interval  | 10 seconds       |
    /// | lifecycle_interval  | 5 seconds        |
    /// | restrict_events     | `false`          |
    /// | blocking_threads    | 4                |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            ws_path: "/ws".to_string(),
            subprotocol: SUBPROTOCOL.to_string(),
            require_subprotocol: false,
            heartbeat_interval: Duration::from_secs(10),
            lifecycle_interval: Duration::from_secs(5),
            restrict_events: false,
            blocking_threads: 4,
            vehicle: VehicleConfig::default(),
            camera: CameraConfig::default(),
        }
    }
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_speed: 100,
            max_steering_angle: 140.0,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: PathBuf::from("/dev/video0"),
            stream_port: 8081,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_bind_port_is_8080() {
        // Arrange / Act
        let cfg = HubConfig::default();
        // Assert
        assert_eq!(cfg.bind_addr.port(), 8080);
    }

    #[test]
    fn test_default_subprotocol_is_columbus() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.subprotocol, "columbus");
        assert!(!cfg.require_subprotocol);
    }

    #[test]
    fn test_default_heartbeat_interval_is_10s() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(10));
    }

    #[test]
    fn test_default_lifecycle_interval_is_5s() {
        let cfg = HubConfig::default();
        assert_eq!(cfg.lifecycle_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_default_event_routing_is_unrestricted() {
        let cfg = HubConfig::default();
        assert!(!cfg.restrict_events);
    }

    #[test]
    fn test_default_vehicle_limits() {
        let cfg = VehicleConfig::default();
        assert_eq!(cfg.max_speed, 100);
        assert_eq!(cfg.max_steering_angle, 140.0);
    }

    #[test]
    fn test_default_camera_device() {
        let cfg = CameraConfig::default();
        assert_eq!(cfg.device, PathBuf::from("/dev/video0"));
    }
}
