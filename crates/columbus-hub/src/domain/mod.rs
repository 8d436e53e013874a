//! Domain layer for columbus-hub.
//!
//! The domain layer contains pure types that have no dependencies on I/O,
//! networking, or async runtimes.
//!
//! # What belongs in the domain layer?
//!
//! - Configuration structures
//! - Connection identity and state
//! - The HTTP route table modules mount into while loaded
//!
//! # What does NOT belong here?
//!
//! - Any `tokio`, `TcpStream`, or `WebSocket` types
//! - File I/O or environment variable reading

pub mod config;
pub mod routes;
pub mod session;

pub use config::{CameraConfig, HubConfig, VehicleConfig};
pub use routes::{HttpMethod, HttpRoute, RouteError, RouteTable};
pub use session::{ConnectionId, ConnectionState};
