//! Decoding of client-sent frames.
//!
//! Decoding is deliberately stricter than the [`Frame`] serde derive: it
//! walks the raw JSON value so that each failure can be classified.  Most
//! failures are fatal for the connection (the hub closes it with
//! "unsupported data"); an integer opcode the hub does not know is not, so
//! newer clients can probe for features without being disconnected.
//!
//! [`Frame`]: super::frame::Frame

use serde_json::{Map, Value};
use thiserror::Error;

use super::opcode::{Opcode, UnknownOpcode};

/// Error type for inbound frame decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The text frame is not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The JSON value is valid but is not an object.
    #[error("frame must be a JSON object")]
    NotAnObject,

    /// The `op` field is absent or not a non-negative integer.
    #[error("frame has no integer \"op\" field")]
    MissingOpcode,

    /// The `op` field is an integer the protocol does not define.
    #[error(transparent)]
    UnknownOpcode(#[from] UnknownOpcode),

    /// A dispatch frame without a usable `d.t` event name.
    #[error("malformed dispatch: {0}")]
    MalformedDispatch(&'static str),
}

impl ProtocolError {
    /// `true` when the connection must be closed with "unsupported data".
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ProtocolError::UnknownOpcode(_))
    }
}

/// A decoded client frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Application event to route through the event bus.
    Dispatch {
        /// Event name (`d.t`), unmodified.
        event: String,
        /// Event payload (`d.p`); `{}` when absent.
        payload: Value,
    },
    /// The peer asks for a [`Opcode::HeartbeatAck`].
    Heartbeat,
    /// The peer acknowledges our heartbeat.
    HeartbeatAck,
    /// A valid opcode that clients must not send (`Hello`, `ModulesUpdate`).
    Unexpected(Opcode),
}

/// Decodes one text frame received from a client.
///
/// # Errors
///
/// See [`ProtocolError`]; use [`ProtocolError::is_fatal`] to decide whether
/// to drop the connection.
pub fn decode_inbound(text: &str) -> Result<Inbound, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(mut frame) = value else {
        return Err(ProtocolError::NotAnObject);
    };

    let op = frame
        .get("op")
        .and_then(Value::as_u64)
        .ok_or(ProtocolError::MissingOpcode)?;
    let op = Opcode::try_from(op)?;

    match op {
        Opcode::Dispatch => {
            let d = frame.remove("d").unwrap_or(Value::Null);
            decode_dispatch(d)
        }
        Opcode::Heartbeat => Ok(Inbound::Heartbeat),
        Opcode::HeartbeatAck => Ok(Inbound::HeartbeatAck),
        Opcode::Hello | Opcode::ModulesUpdate => Ok(Inbound::Unexpected(op)),
    }
}

fn decode_dispatch(d: Value) -> Result<Inbound, ProtocolError> {
    let Value::Object(mut d) = d else {
        return Err(ProtocolError::MalformedDispatch("\"d\" must be an object"));
    };

    let event = match d.remove("t") {
        Some(Value::String(event)) if !event.is_empty() => event,
        Some(Value::String(_)) => return Err(ProtocolError::MalformedDispatch("empty event name")),
        _ => return Err(ProtocolError::MalformedDispatch("missing string \"t\"")),
    };

    let payload = d.remove("p").unwrap_or_else(|| Value::Object(Map::new()));

    Ok(Inbound::Dispatch { event, payload })
}
