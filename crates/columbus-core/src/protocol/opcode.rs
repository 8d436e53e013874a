//! Frame opcodes.
//!
//! | Value | Name          | Direction                     |
//! |-------|---------------|-------------------------------|
//! | 0     | Dispatch      | either                        |
//! | 1     | Hello         | server → client, once         |
//! | 2     | ModulesUpdate | server → client, on change    |
//! | 10    | Heartbeat     | either                        |
//! | 11    | HeartbeatAck  | either                        |

use serde::{Deserialize, Serialize};

/// Integer tag identifying a frame's semantic type.
///
/// Serialized as its bare integer value (`"op": 10`), never as a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub enum Opcode {
    /// Application event, `d = {t: event, p: payload}`.
    Dispatch,
    /// Initial snapshot of loaded modules and their state.  Historically
    /// called `STATE_UPDATE`.
    Hello,
    /// The set of loaded modules changed.
    ModulesUpdate,
    /// Liveness probe; the receiver must answer with [`Opcode::HeartbeatAck`].
    Heartbeat,
    /// Reply to a [`Opcode::Heartbeat`].
    HeartbeatAck,
}

impl Opcode {
    /// Returns the integer value written on the wire.
    pub const fn value(self) -> u64 {
        match self {
            Opcode::Dispatch => 0,
            Opcode::Hello => 1,
            Opcode::ModulesUpdate => 2,
            Opcode::Heartbeat => 10,
            Opcode::HeartbeatAck => 11,
        }
    }
}

/// Error returned when an integer does not name an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown opcode: {0}")]
pub struct UnknownOpcode(pub u64);

impl TryFrom<u64> for Opcode {
    type Error = UnknownOpcode;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Opcode::Dispatch),
            1 => Ok(Opcode::Hello),
            2 => Ok(Opcode::ModulesUpdate),
            10 => Ok(Opcode::Heartbeat),
            11 => Ok(Opcode::HeartbeatAck),
            other => Err(UnknownOpcode(other)),
        }
    }
}

impl From<Opcode> for u64 {
    fn from(op: Opcode) -> Self {
        op.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_values_match_wire_table() {
        assert_eq!(Opcode::Dispatch.value(), 0);
        assert_eq!(Opcode::Hello.value(), 1);
        assert_eq!(Opcode::ModulesUpdate.value(), 2);
        assert_eq!(Opcode::Heartbeat.value(), 10);
        assert_eq!(Opcode::HeartbeatAck.value(), 11);
    }

    #[test]
    fn test_try_from_rejects_unassigned_values() {
        // Arrange / Act
        let result = Opcode::try_from(3);

        // Assert
        assert_eq!(result, Err(UnknownOpcode(3)));
    }

    #[test]
    fn test_opcode_serializes_as_integer() {
        let json = serde_json::to_string(&Opcode::HeartbeatAck).unwrap();
        assert_eq!(json, "11");
    }
}
