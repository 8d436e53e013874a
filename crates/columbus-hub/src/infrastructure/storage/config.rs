//! TOML configuration file for the hub.
//!
//! The file lives at `$XDG_CONFIG_HOME/columbus/config.toml` (falling back to
//! `~/.config/columbus/config.toml`) unless `--config` points elsewhere.
//! Every field is optional; a missing default file means "all defaults".
//!
//! ```toml
//! log_level = "debug"
//!
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//! ws_path = "/ws"
//! require_subprotocol = false
//! restrict_events = false
//! blocking_threads = 4
//!
//! [heartbeat]
//! interval_secs = 10
//!
//! [lifecycle]
//! interval_secs = 5
//!
//! [vehicle]
//! enabled = true
//! max_speed = 100
//! max_steering_angle = 140.0
//!
//! [camera]
//! enabled = true
//! device = "/dev/video0"
//! stream_port = 8081
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{CameraConfig, HubConfig, VehicleConfig};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// `server.host` is not an IP address.
    #[error("invalid server host '{0}'")]
    InvalidAddress(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_level: Option<String>,
    pub server: ServerSection,
    pub heartbeat: HeartbeatSection,
    pub lifecycle: LifecycleSection,
    pub vehicle: VehicleSection,
    pub camera: CameraSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub ws_path: String,
    pub require_subprotocol: bool,
    pub restrict_events: bool,
    pub blocking_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HeartbeatSection {
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LifecycleSection {
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VehicleSection {
    pub enabled: bool,
    pub max_speed: i64,
    pub max_steering_angle: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraSection {
    pub enabled: bool,
    pub device: PathBuf,
    pub stream_port: u16,
}

// Section defaults mirror `HubConfig::default()` so the two never drift.

impl Default for ServerSection {
    fn default() -> Self {
        let hub = HubConfig::default();
        Self {
            host: hub.bind_addr.ip().to_string(),
            port: hub.bind_addr.port(),
            ws_path: hub.ws_path,
            require_subprotocol: hub.require_subprotocol,
            restrict_events: hub.restrict_events,
            blocking_threads: hub.blocking_threads,
        }
    }
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            interval_secs: HubConfig::default().heartbeat_interval.as_secs(),
        }
    }
}

impl Default for LifecycleSection {
    fn default() -> Self {
        Self {
            interval_secs: HubConfig::default().lifecycle_interval.as_secs(),
        }
    }
}

impl Default for VehicleSection {
    fn default() -> Self {
        let vehicle = VehicleConfig::default();
        Self {
            enabled: vehicle.enabled,
            max_speed: vehicle.max_speed,
            max_steering_angle: vehicle.max_steering_angle,
        }
    }
}

impl Default for CameraSection {
    fn default() -> Self {
        let camera = CameraConfig::default();
        Self {
            enabled: camera.enabled,
            device: camera.device,
            stream_port: camera.stream_port,
        }
    }
}

impl FileConfig {
    /// Builds the runtime configuration from this file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidAddress`] if `server.host` is not an IP address.
    pub fn to_hub_config(&self) -> Result<HubConfig, ConfigError> {
        let ip: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.server.host.clone()))?;

        Ok(HubConfig {
            bind_addr: SocketAddr::new(ip, self.server.port),
            ws_path: self.server.ws_path.clone(),
            require_subprotocol: self.server.require_subprotocol,
            restrict_events: self.server.restrict_events,
            blocking_threads: self.server.blocking_threads.max(1),
            heartbeat_interval: Duration::from_secs(self.heartbeat.interval_secs.max(1)),
            lifecycle_interval: Duration::from_secs(self.lifecycle.interval_secs.max(1)),
            vehicle: VehicleConfig {
                enabled: self.vehicle.enabled,
                max_speed: self.vehicle.max_speed.saturating_abs(),
                max_steering_angle: self.vehicle.max_steering_angle,
            },
            camera: CameraConfig {
                enabled: self.camera.enabled,
                device: self.camera.device.clone(),
                stream_port: self.camera.stream_port,
            },
            ..HubConfig::default()
        })
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Default location of the config file, if a home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(base.join("columbus").join("config.toml"))
}

/// Loads the config file.
///
/// With an explicit `path` the file must exist.  Without one, the default
/// location is used and a missing file yields [`FileConfig::default`].
///
/// # Errors
///
/// [`ConfigError::Io`] for file-system errors and [`ConfigError::Parse`] for
/// malformed TOML.
pub fn load_config(path: Option<&Path>) -> Result<FileConfig, ConfigError> {
    let (path, must_exist) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => match default_config_path() {
            Some(path) => (path, false),
            None => return Ok(FileConfig::default()),
        },
    };

    match std::fs::read_to_string(&path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !must_exist => {
            Ok(FileConfig::default())
        }
        Err(source) => Err(ConfigError::Io { path, source }),
    }
}

/// Parses config file content.
///
/// # Errors
///
/// [`ConfigError::Parse`] for malformed TOML.
pub fn parse_config(content: &str) -> Result<FileConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
