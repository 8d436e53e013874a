//! # columbus-core
//!
//! Shared wire protocol for the Columbus hub: the opcode table, the JSON frame
//! type, inbound frame decoding and WebSocket close reasons.
//!
//! This crate has no dependencies on sockets, async runtimes or hardware.  It
//! is the "language" spoken between the hub and its browser/app clients, and
//! nothing more.
//!
//! # Architecture overview (for beginners)
//!
//! The hub bridges hardware capabilities (a camera, a small vehicle, ...) to
//! remote clients over one persistent WebSocket per client.  Every message on
//! that socket is a JSON *frame*:
//!
//! ```json
//! {"op": 0, "d": {"t": "vehicle_speed", "p": 50}}
//! ```
//!
//! `op` is an integer [`Opcode`] and `d` is an opcode-specific payload.  The
//! application-level events (`t` / `p`) only ever travel inside `Dispatch`
//! frames; every other opcode is protocol control (handshake snapshot, module
//! set changes, heartbeats).

pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `columbus_core::Frame` instead of `columbus_core::protocol::frame::Frame`.
pub use protocol::close::CloseReason;
pub use protocol::codec::{decode_inbound, Inbound, ProtocolError};
pub use protocol::frame::{Frame, HelloPayload, ModulesPayload};
pub use protocol::opcode::Opcode;
