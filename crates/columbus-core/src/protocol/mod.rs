//! Columbus wire protocol.
//!
//! Frames are JSON text messages carried over a WebSocket that negotiated the
//! [`SUBPROTOCOL`].  Exactly one opcode per frame.

pub mod close;
pub mod codec;
pub mod frame;
pub mod opcode;

/// The only WebSocket subprotocol the hub speaks.
pub const SUBPROTOCOL: &str = "columbus";
