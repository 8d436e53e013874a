//! Infrastructure layer for columbus-hub.
//!
//! Contains everything that touches the outside world: the WebSocket server,
//! the per-client connection state machine, hardware drivers and the config
//! file.

pub mod connection;
pub mod hardware;
pub mod memory_link;
pub mod storage;
pub mod ws_server;

pub use connection::WsConnection;
pub use hardware::{DevicePathProbe, FixedProbe, SimulatedMotorDriver};
pub use memory_link::MemoryLink;
pub use ws_server::{bind, serve};
