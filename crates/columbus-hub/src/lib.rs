//! columbus-hub library crate.
//!
//! A real-time hub that bridges hardware capabilities (camera, vehicle
//! control, ...) to remote browser/app clients over one persistent WebSocket
//! per client.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Browser / app  (JSON frames over WebSocket, subprotocol "columbus")
//!         ↕
//! [columbus-hub]
//!   ├── domain/           Pure types: HubConfig, ConnectionId, RouteTable
//!   ├── application/      Listener, EventBus, ConnectionRegistry,
//!   │                     CapabilityModule, ModuleManager, Hub
//!   ├── modules/          Bundled capability modules (vehicle, cam)
//!   └── infrastructure/
//!         ├── ws_server/  Accept loop + handshake (tokio-tungstenite)
//!         ├── connection/ Per-client heartbeat + poll state machine
//!         ├── hardware/   Motor driver and camera probe implementations
//!         └── storage/    TOML config file
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and `columbus-core`; it reaches the
//!   network only through the [`application::ClientLink`] trait.
//! - `modules` depend on `application`; hardware is injected through traits.
//! - `infrastructure` depends on all other layers plus `tokio-tungstenite`.

/// Domain layer: pure configuration and identity types (no I/O).
pub mod domain;

/// Application layer: event bus, registry, lifecycle manager and the hub.
pub mod application;

/// Capability modules shipped with the hub.
pub mod modules;

/// Infrastructure layer: WebSocket server, connections, hardware, storage.
pub mod infrastructure;
