//! Reasons the hub closes a client connection.

/// Close status sent in the WebSocket close frame.
///
/// The numeric values are the RFC 6455 close codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// Peer-initiated or orderly close.
    Normal,
    /// The hub is shutting down.
    GoingAway,
    /// Liveness failure: a heartbeat was not acknowledged in time.
    ProtocolError,
    /// The peer sent a frame the hub cannot decode.
    UnsupportedData,
}

impl CloseReason {
    /// RFC 6455 close code.
    pub const fn code(self) -> u16 {
        match self {
            CloseReason::Normal => 1000,
            CloseReason::GoingAway => 1001,
            CloseReason::ProtocolError => 1002,
            CloseReason::UnsupportedData => 1003,
        }
    }

    /// Short human-readable reason placed in the close frame.
    pub const fn description(self) -> &'static str {
        match self {
            CloseReason::Normal => "closed",
            CloseReason::GoingAway => "server shutting down",
            CloseReason::ProtocolError => "heartbeat timeout",
            CloseReason::UnsupportedData => "unsupported data",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}
