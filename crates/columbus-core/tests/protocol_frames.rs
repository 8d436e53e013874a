//! Integration tests for the columbus-core frame protocol.
//!
//! These exercise the public API the way the hub uses it: frames are built
//! with the `Frame` constructors, encoded to text, and client text is fed
//! through `decode_inbound`.

use columbus_core::{decode_inbound, CloseReason, Frame, HelloPayload, Inbound, Opcode};
use serde_json::{json, Map, Value};

/// A frame the hub sends must be readable as a generic `{op, d}` object.
fn as_json(frame: &Frame) -> Value {
    serde_json::from_str(&frame.encode().expect("encode must succeed")).expect("valid JSON")
}

#[test]
fn test_hub_dispatch_frame_matches_wire_shape() {
    // Arrange
    let frame = Frame::dispatch("vehicle", json!({"speed": 50}));

    // Act
    let wire = as_json(&frame);

    // Assert
    assert_eq!(wire, json!({"op": 0, "d": {"t": "vehicle", "p": {"speed": 50}}}));
}

#[test]
fn test_hello_frame_decodes_back_into_payload() {
    // Arrange
    let payload = HelloPayload {
        modules: vec!["cam".to_string(), "vehicle".to_string()],
        state: Map::new(),
        heartbeat_interval: 250,
    };

    // Act
    let frame: Frame = serde_json::from_value(as_json(&Frame::hello(&payload))).unwrap();
    let decoded: HelloPayload = serde_json::from_value(frame.d).unwrap();

    // Assert
    assert_eq!(frame.op, Opcode::Hello);
    assert_eq!(decoded, payload);
}

#[test]
fn test_client_heartbeat_round_trips_through_decoder() {
    // A client that echoes our own heartbeat frame must be understood.
    let text = Frame::heartbeat().encode().unwrap();
    assert_eq!(decode_inbound(&text).unwrap(), Inbound::Heartbeat);
}

#[test]
fn test_client_dispatch_keeps_event_case() {
    // Outbound names are lower-cased, inbound names are routed verbatim.
    let inbound = decode_inbound(r#"{"op":0,"d":{"t":"Vehicle_Speed","p":1}}"#).unwrap();
    match inbound {
        Inbound::Dispatch { event, payload } => {
            assert_eq!(event, "Vehicle_Speed");
            assert_eq!(payload, json!(1));
        }
        other => panic!("expected dispatch, got {other:?}"),
    }
}

#[test]
fn test_every_malformed_sample_maps_to_unsupported_data() {
    // Each of these must close the connection with UnsupportedData.
    let samples = [
        "not-json",
        "[]",
        "42",
        r#"{"op":null}"#,
        r#"{"op":-1}"#,
        r#"{"op":0,"d":[]}"#,
        r#"{"op":0,"d":{"t":7}}"#,
    ];

    for sample in samples {
        let err = decode_inbound(sample).expect_err(sample);
        assert!(err.is_fatal(), "{sample} must be fatal, got {err}");
    }
    assert_eq!(CloseReason::UnsupportedData.code(), 1003);
}
