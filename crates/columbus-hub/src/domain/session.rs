//! Connection identity and lifecycle state.

use std::fmt;

use uuid::Uuid;

/// Identifier of one client connection, unique for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generates a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first UUID group is plenty to tell connections apart in logs.
        let id = self.0.simple().to_string();
        f.write_str(&id[..8])
    }
}

/// State of a connection after a successful handshake.
///
/// ```text
/// Open ──close()──▶ Closing ──close frame sent──▶ Closed
/// ```
///
/// A connection only exists once the WebSocket handshake succeeded, so there
/// is no `Connecting` state to represent.  `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Frames flow in both directions.
    Open,
    /// A close was initiated; no new frames are sent.
    Closing,
    /// The close frame went out (or the socket was already gone).
    Closed,
}

impl ConnectionState {
    /// `true` only for [`ConnectionState::Open`].
    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }
}
