//! Delta wire envelope.
//!
//! On the wire a delta is the JSON triple `[kind, operation, payload]` with
//! `operation` one of `"change"` or `"remove"`. Ingest is strict: the array
//! must have exactly three elements and the kind must be registered in the
//! dispatch table below.

use serde::ser::{Serialize, SerializeSeq, Serializer};
use serde_json::Value;
use thiserror::Error;

use crate::entity::{EntityInfo, EntityKind};

pub const OP_CHANGE: &str = "change";
pub const OP_REMOVE: &str = "remove";

/// A single notification: the entity snapshot plus whether it was removed.
///
/// A removal delta still carries the last known payload so receivers can
/// identify which entity disappeared.
#[derive(Clone, Debug, PartialEq)]
pub struct Delta {
    pub removed: bool,
    pub entity: EntityInfo,
}

impl Delta {
    pub fn operation(&self) -> &'static str {
        if self.removed { OP_REMOVE } else { OP_CHANGE }
    }
}

impl Serialize for Delta {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(3))?;
        seq.serialize_element(self.entity.kind().as_str())?;
        seq.serialize_element(self.operation())?;
        seq.serialize_element(&self.entity)?;
        seq.end()
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("expected 3 elements in delta envelope, got {len}")]
    EnvelopeShape { len: usize },
    #[error("unknown entity kind {kind:?}")]
    UnknownKind { kind: String },
    #[error("unknown delta operation {operation:?}")]
    UnknownOperation { operation: String },
    #[error("malformed delta payload: {0}")]
    Payload(#[from] serde_json::Error),
}

pub fn encode_delta(delta: &Delta) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(delta)
}

pub fn decode_delta(bytes: &[u8]) -> Result<Delta, DecodeError> {
    let elements: Vec<Value> = serde_json::from_slice(bytes)?;
    let [kind, operation, payload] = <[Value; 3]>::try_from(elements)
        .map_err(|elements| DecodeError::EnvelopeShape {
            len: elements.len(),
        })?;
    let kind: String = serde_json::from_value(kind)?;
    let operation: String = serde_json::from_value(operation)?;
    let removed = match operation.as_str() {
        OP_CHANGE => false,
        OP_REMOVE => true,
        _ => return Err(DecodeError::UnknownOperation { operation }),
    };
    let Some(kind) = EntityKind::parse(&kind) else {
        return Err(DecodeError::UnknownKind { kind });
    };
    let entity = decode_payload(kind, payload)?;
    Ok(Delta { removed, entity })
}

/// Dispatch table from kind tag to payload type.
fn decode_payload(kind: EntityKind, payload: Value) -> Result<EntityInfo, serde_json::Error> {
    Ok(match kind {
        EntityKind::Machine => EntityInfo::Machine(serde_json::from_value(payload)?),
        EntityKind::Service => EntityInfo::Service(serde_json::from_value(payload)?),
        EntityKind::Unit => EntityInfo::Unit(serde_json::from_value(payload)?),
        EntityKind::Relation => EntityInfo::Relation(serde_json::from_value(payload)?),
        EntityKind::Annotation => EntityInfo::Annotation(serde_json::from_value(payload)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{AnnotationInfo, MachineInfo};

    fn machine(id: &str, status: &str) -> EntityInfo {
        EntityInfo::Machine(MachineInfo {
            id: id.into(),
            status: status.into(),
            ..Default::default()
        })
    }

    #[test]
    fn change_delta_encodes_as_a_triple() {
        let delta = Delta {
            removed: false,
            entity: machine("0", "pending"),
        };
        let value: Value = serde_json::from_slice(&encode_delta(&delta).unwrap()).unwrap();
        assert_eq!(value[0], "machine");
        assert_eq!(value[1], "change");
        assert_eq!(value[2]["id"], "0");
    }

    #[test]
    fn removal_delta_round_trips() {
        let delta = Delta {
            removed: true,
            entity: EntityInfo::Annotation(AnnotationInfo {
                tag: "machine-0".into(),
                ..Default::default()
            }),
        };
        let decoded = decode_delta(&encode_delta(&delta).unwrap()).unwrap();
        assert_eq!(decoded, delta);
    }

    #[test]
    fn change_delta_round_trips() {
        let delta = Delta {
            removed: false,
            entity: machine("3", "started"),
        };
        let decoded = decode_delta(&encode_delta(&delta).unwrap()).unwrap();
        assert_eq!(decoded, delta);
    }

    #[test]
    fn short_envelope_is_rejected() {
        let err = decode_delta(br#"["machine","change"]"#).unwrap_err();
        assert!(matches!(err, DecodeError::EnvelopeShape { len: 2 }));
    }

    #[test]
    fn long_envelope_is_rejected() {
        let err = decode_delta(br#"["machine","change",{"id":"0"},"extra"]"#).unwrap_err();
        assert!(matches!(err, DecodeError::EnvelopeShape { len: 4 }));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = decode_delta(br#"["zeppelin","change",{"id":"0"}]"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownKind { kind } if kind == "zeppelin"));
    }

    #[test]
    fn unknown_operation_is_rejected() {
        let err = decode_delta(br#"["machine","destroy",{"id":"0"}]"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownOperation { operation } if operation == "destroy"));
    }

    #[test]
    fn malformed_payload_is_rejected() {
        // A machine payload without its required id field.
        let err = decode_delta(br#"["machine","change",{"status":"pending"}]"#).unwrap_err();
        assert!(matches!(err, DecodeError::Payload(_)));
    }
}
