//! In-memory [`ClientLink`] that records what the hub sends.
//!
//! Used by unit and integration tests to observe broadcasts, hello frames and
//! close reasons without opening a socket.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use columbus_core::{CloseReason, Frame};

use crate::application::link::{ClientLink, LinkError};
use crate::domain::ConnectionId;

#[derive(Debug, Default)]
struct Recorded {
    texts: Vec<String>,
    close_reason: Option<CloseReason>,
}

/// A client link backed by a `Vec` instead of a socket.
#[derive(Debug)]
pub struct MemoryLink {
    id: ConnectionId,
    recorded: Mutex<Recorded>,
}

impl MemoryLink {
    /// Creates an open link with a fresh id.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId::new(),
            recorded: Mutex::new(Recorded::default()),
        })
    }

    /// Raw texts sent so far, in order.
    pub fn texts(&self) -> Vec<String> {
        self.recorded().texts.clone()
    }

    /// Frames sent so far, decoded.  Texts that are not frames are skipped.
    pub fn frames(&self) -> Vec<Frame> {
        self.recorded()
            .texts
            .iter()
            .filter_map(|t| serde_json::from_str(t).ok())
            .collect()
    }

    /// Dispatch frames for `event`, as `p` payloads.
    pub fn dispatched(&self, event: &str) -> Vec<serde_json::Value> {
        self.frames()
            .into_iter()
            .filter(|f| f.event_name() == Some(event))
            .map(|f| f.d.get("p").cloned().unwrap_or_default())
            .collect()
    }

    /// Reason of the close, if the link was closed.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.recorded().close_reason
    }

    /// Forgets everything sent so far.
    pub fn clear(&self) {
        self.recorded().texts.clear();
    }

    fn recorded(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ClientLink for MemoryLink {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn send_text(&self, text: String) -> Result<(), LinkError> {
        let mut recorded = self.recorded();
        if recorded.close_reason.is_some() {
            return Err(LinkError::Closed);
        }
        recorded.texts.push(text);
        Ok(())
    }

    async fn close(&self, reason: CloseReason) {
        self.recorded().close_reason.get_or_insert(reason);
    }

    fn is_open(&self) -> bool {
        self.recorded().close_reason.is_none()
    }
}
