//! The `{op, d}` frame and the payloads the hub sends.
//!
//! # JSON shape
//!
//! ```json
//! {"op":0,"d":{"t":"vehicle","p":{"speed":50}}}
//! {"op":1,"d":{"modules":["vehicle"],"state":{"vehicle":{}},"heartbeat_interval":10000}}
//! {"op":2,"d":{"modules":["cam","vehicle"]}}
//! {"op":10,"d":{}}
//! ```
//!
//! Outbound frames always carry a `d` object, even when empty, so clients can
//! read `frame.d` without a null check.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::opcode::Opcode;

/// One protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Semantic type of the frame.
    pub op: Opcode,
    /// Opcode-specific payload.  Absent on the wire means `{}`.
    #[serde(default = "empty_object")]
    pub d: Value,
}

/// Payload of the [`Opcode::Hello`] frame sent once after the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Names of the currently loaded modules, in lifecycle order.
    pub modules: Vec<String>,
    /// Current state snapshot of every loaded module, keyed by module name.
    #[serde(default)]
    pub state: Map<String, Value>,
    /// Heartbeat interval of this connection in milliseconds.
    pub heartbeat_interval: u64,
}

/// Payload of the [`Opcode::ModulesUpdate`] broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModulesPayload {
    /// Names of the currently loaded modules.
    pub modules: Vec<String>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Frame {
    /// Builds a frame from an opcode and a payload.
    pub fn new(op: Opcode, d: Value) -> Self {
        Self { op, d }
    }

    /// Builds a `Dispatch` frame.  The event name is lower-cased on the wire.
    pub fn dispatch(event: &str, payload: Value) -> Self {
        let mut d = Map::new();
        d.insert("t".to_string(), Value::String(event.to_lowercase()));
        d.insert("p".to_string(), payload);
        Self::new(Opcode::Dispatch, Value::Object(d))
    }

    /// Builds the `Hello` frame.
    pub fn hello(payload: &HelloPayload) -> Self {
        Self::new(Opcode::Hello, to_value_or_empty(payload))
    }

    /// Builds a `ModulesUpdate` frame listing `modules`.
    pub fn modules_update(modules: Vec<String>) -> Self {
        Self::new(Opcode::ModulesUpdate, to_value_or_empty(&ModulesPayload { modules }))
    }

    /// Builds a `Heartbeat` frame with an empty payload.
    pub fn heartbeat() -> Self {
        Self::new(Opcode::Heartbeat, empty_object())
    }

    /// Builds a `HeartbeatAck` frame with an empty payload.
    pub fn heartbeat_ack() -> Self {
        Self::new(Opcode::HeartbeatAck, empty_object())
    }

    /// Serializes the frame to its JSON text form.
    ///
    /// # Errors
    ///
    /// Only fails if the payload contains a value serde_json refuses to
    /// encode, which cannot happen for payloads built from [`Value`].
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Returns the `t` field of a dispatch frame, if any.
    pub fn event_name(&self) -> Option<&str> {
        match self.op {
            Opcode::Dispatch => self.d.get("t").and_then(Value::as_str),
            _ => None,
        }
    }
}

// Payload structs only hold strings, maps and integers, so serialization is
// infallible in practice; an empty object keeps the frame well-formed anyway.
fn to_value_or_empty<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or_else(|_| empty_object())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dispatch_frame_lowercases_event_name() {
        // Arrange / Act
        let frame = Frame::dispatch("Cam_Available", json!({"port": 8081}));

        // Assert
        assert_eq!(frame.op, Opcode::Dispatch);
        assert_eq!(frame.event_name(), Some("cam_available"));
        assert_eq!(frame.d["p"]["port"], 8081);
    }

    #[test]
    fn test_heartbeat_encodes_with_empty_object_payload() {
        let text = Frame::heartbeat().encode().unwrap();
        assert_eq!(text, r#"{"op":10,"d":{}}"#);
    }

    #[test]
    fn test_heartbeat_ack_encodes_opcode_11() {
        let text = Frame::heartbeat_ack().encode().unwrap();
        assert_eq!(text, r#"{"op":11,"d":{}}"#);
    }

    #[test]
    fn test_missing_payload_deserializes_as_empty_object() {
        // Arrange
        let text = r#"{"op":10}"#;

        // Act
        let frame: Frame = serde_json::from_str(text).unwrap();

        // Assert
        assert_eq!(frame.d, json!({}));
    }

    #[test]
    fn test_hello_frame_carries_modules_state_and_interval() {
        // Arrange
        let mut state = Map::new();
        state.insert("vehicle".to_string(), json!({"speed": 0}));
        let payload = HelloPayload {
            modules: vec!["vehicle".to_string()],
            state,
            heartbeat_interval: 10_000,
        };

        // Act
        let frame = Frame::hello(&payload);

        // Assert
        assert_eq!(frame.op, Opcode::Hello);
        assert_eq!(frame.d["modules"], json!(["vehicle"]));
        assert_eq!(frame.d["state"]["vehicle"]["speed"], 0);
        assert_eq!(frame.d["heartbeat_interval"], 10_000);
    }

    #[test]
    fn test_modules_update_lists_names() {
        let frame = Frame::modules_update(vec!["cam".to_string(), "vehicle".to_string()]);
        assert_eq!(frame.op, Opcode::ModulesUpdate);
        assert_eq!(frame.d, json!({"modules": ["cam", "vehicle"]}));
    }

    #[test]
    fn test_event_name_is_none_for_control_frames() {
        assert_eq!(Frame::heartbeat().event_name(), None);
    }
}
