//! The seam between the hub and a client transport.
//!
//! The application layer never touches sockets.  Everything it needs from a
//! connected client (push a frame, close it, read its latency) goes through
//! the [`ClientLink`] trait.  The WebSocket implementation lives in
//! `infrastructure::connection`; tests use
//! `infrastructure::memory_link::MemoryLink`.

use std::time::Duration;

use async_trait::async_trait;
use columbus_core::{CloseReason, Frame};
use thiserror::Error;

use crate::domain::ConnectionId;

/// Error type for sending to a client.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The connection is closing or closed.  This is a benign race: the
    /// connection is on its way out of the registry.
    #[error("connection is closed")]
    Closed,

    /// The frame could not be serialized.
    #[error("frame encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// The transport failed while writing.
    #[error("transport error: {0}")]
    Transport(String),
}

/// One connected client, as seen by the application layer.
#[async_trait]
pub trait ClientLink: Send + Sync {
    /// Identifier of this connection.
    fn id(&self) -> ConnectionId;

    /// Sends one already-encoded text frame.
    async fn send_text(&self, text: String) -> Result<(), LinkError>;

    /// Closes the connection with `reason`.
    ///
    /// Idempotent: closing an already closing or closed link is a no-op.
    async fn close(&self, reason: CloseReason);

    /// `true` while frames can still be sent.
    fn is_open(&self) -> bool;

    /// Last measured heartbeat round trip; `None` until the first ack.
    fn latency(&self) -> Option<Duration> {
        None
    }

    /// Encodes and sends a frame.
    async fn send_frame(&self, frame: &Frame) -> Result<(), LinkError> {
        let text = frame.encode()?;
        self.send_text(text).await
    }
}
