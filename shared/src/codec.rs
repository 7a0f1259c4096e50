use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::RECORD_DELIMITER;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
#[error("failed to serialize envelope: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// Three-component float vector. Rotations are Euler degrees.
///
/// JSON has no literal for non-finite numbers, so those components travel as
/// the strings `"NaN"`, `"Infinity"` and `"-Infinity"`. A `null` component
/// reads back as NaN. Missing components read as zero.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq)]
#[serde(default)]
pub struct Vec3 {
    #[serde(with = "component")]
    pub x: f32,
    #[serde(with = "component")]
    pub y: f32,
    #[serde(with = "component")]
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1}, {:.1})", self.x, self.y, self.z)
    }
}

mod component {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S>(value: &f32, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if value.is_nan() {
            serializer.serialize_str("NaN")
        } else if value.is_infinite() && value.is_sign_positive() {
            serializer.serialize_str("Infinity")
        } else if value.is_infinite() {
            serializer.serialize_str("-Infinity")
        } else {
            serializer.serialize_f32(*value)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<f32, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ComponentVisitor)
    }

    struct ComponentVisitor;

    impl<'de> Visitor<'de> for ComponentVisitor {
        type Value = f32;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a number, null, \"NaN\", \"Infinity\" or \"-Infinity\"")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f32, E> {
            Ok(v as f32)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f32, E> {
            Ok(v as f32)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f32, E> {
            Ok(v as f32)
        }

        fn visit_unit<E: de::Error>(self) -> Result<f32, E> {
            Ok(f32::NAN)
        }

        fn visit_none<E: de::Error>(self) -> Result<f32, E> {
            Ok(f32::NAN)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f32, E> {
            match v {
                "NaN" | "nan" => Ok(f32::NAN),
                "Infinity" | "inf" => Ok(f32::INFINITY),
                "-Infinity" | "-inf" => Ok(f32::NEG_INFINITY),
                _ => Err(E::invalid_value(de::Unexpected::Str(v), &self)),
            }
        }
    }
}

/// Selects how the `data` payload of an envelope is interpreted.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Update,
    Fire,
    Disconnect,
    /// Any type this build does not know. Consumers ignore it.
    #[default]
    #[serde(other)]
    Unknown,
}

/// Pose of one client, tagged with the identifier of the connection it came from.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct UserState {
    #[serde(alias = "addr")]
    pub id: String,
    #[serde(rename = "pos")]
    pub position: Vec3,
    #[serde(rename = "rot")]
    pub rotation: Vec3,
}

/// The `{type, data}` unit of protocol communication.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type", default)]
    pub kind: MessageType,
    #[serde(default)]
    pub data: UserState,
}

impl Envelope {
    pub fn new(kind: MessageType, id: impl Into<String>, position: Vec3, rotation: Vec3) -> Self {
        Self {
            kind,
            data: UserState {
                id: id.into(),
                position,
                rotation,
            },
        }
    }

    pub fn update(id: impl Into<String>, position: Vec3, rotation: Vec3) -> Self {
        Self::new(MessageType::Update, id, position, rotation)
    }

    pub fn fire(id: impl Into<String>, position: Vec3, rotation: Vec3) -> Self {
        Self::new(MessageType::Fire, id, position, rotation)
    }

    pub fn disconnect(id: impl Into<String>) -> Self {
        Self::new(MessageType::Disconnect, id, Vec3::ZERO, Vec3::ZERO)
    }
}

/// Serializes an envelope to compact JSON, without the record delimiter.
pub fn encode(envelope: &Envelope) -> Result<String, EncodeError> {
    Ok(serde_json::to_string(envelope)?)
}

/// Serializes an envelope into a complete wire record, delimiter included.
pub fn encode_record(envelope: &Envelope) -> Result<Vec<u8>, EncodeError> {
    let mut record = serde_json::to_vec(envelope)?;
    record.push(RECORD_DELIMITER);
    Ok(record)
}

/// Parses one record (delimiter already stripped).
pub fn decode(record: &[u8]) -> Result<Envelope, DecodeError> {
    Ok(serde_json::from_slice(record)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_roundtrip_each_kind() {
        let envelopes = vec![
            Envelope::update("127.0.0.1:50000", Vec3::new(1.0, 0.0, 2.0), Vec3::new(0.0, 90.0, 0.0)),
            Envelope::fire("127.0.0.1:50001", Vec3::new(-3.5, 1.25, 8.0), Vec3::new(90.0, 45.0, 0.0)),
            Envelope::disconnect("127.0.0.1:50002"),
        ];

        for envelope in envelopes {
            let text = encode(&envelope).unwrap();
            let decoded = decode(text.as_bytes()).unwrap();
            assert_eq!(decoded, envelope);
        }
    }

    #[test]
    fn test_encode_field_names() {
        let envelope = Envelope::update("C1", Vec3::new(1.0, 0.0, 2.0), Vec3::new(0.0, 90.0, 0.0));
        let text = encode(&envelope).unwrap();

        assert_eq!(
            text,
            r#"{"type":"update","data":{"id":"C1","pos":{"x":1.0,"y":0.0,"z":2.0},"rot":{"x":0.0,"y":90.0,"z":0.0}}}"#
        );
    }

    #[test]
    fn test_encode_record_appends_single_delimiter() {
        let record = encode_record(&Envelope::disconnect("C1")).unwrap();

        assert_eq!(record.last(), Some(&RECORD_DELIMITER));
        assert_eq!(record.iter().filter(|b| **b == RECORD_DELIMITER).count(), 1);
    }

    #[test]
    fn test_delimiter_in_id_is_escaped() {
        let record = encode_record(&Envelope::disconnect("evil\nid")).unwrap();

        assert_eq!(record.iter().filter(|b| **b == RECORD_DELIMITER).count(), 1);
        let decoded = decode(&record[..record.len() - 1]).unwrap();
        assert_eq!(decoded.data.id, "evil\nid");
    }

    #[test]
    fn test_decode_integer_components() {
        let text = r#"{"type":"update","data":{"id":"C1","pos":{"x":1,"y":0,"z":2},"rot":{"x":0,"y":90,"z":0}}}"#;
        let envelope = decode(text.as_bytes()).unwrap();

        assert_eq!(envelope.kind, MessageType::Update);
        assert_eq!(envelope.data.id, "C1");
        assert_approx_eq!(envelope.data.position.x, 1.0);
        assert_approx_eq!(envelope.data.position.z, 2.0);
        assert_approx_eq!(envelope.data.rotation.y, 90.0);
    }

    #[test]
    fn test_decode_accepts_addr_alias() {
        let text = r#"{"type":"fire","data":{"addr":"10.0.0.5:6000","pos":{"x":1,"y":2,"z":3}}}"#;
        let envelope = decode(text.as_bytes()).unwrap();

        assert_eq!(envelope.kind, MessageType::Fire);
        assert_eq!(envelope.data.id, "10.0.0.5:6000");
        assert_eq!(envelope.data.rotation, Vec3::ZERO);
    }

    #[test]
    fn test_decode_missing_fields_default_to_zero() {
        let envelope = decode(br#"{"type":"disconnect","data":{"id":"C1"}}"#).unwrap();
        assert_eq!(envelope, Envelope::disconnect("C1"));

        let envelope = decode(br#"{"type":"update","data":{"pos":{"y":4}}}"#).unwrap();
        assert_eq!(envelope.data.id, "");
        assert_eq!(envelope.data.position, Vec3::new(0.0, 4.0, 0.0));

        let envelope = decode(br#"{"type":"update"}"#).unwrap();
        assert_eq!(envelope.data, UserState::default());
    }

    #[test]
    fn test_decode_ignores_unknown_fields() {
        let text = r#"{"type":"update","seq":12,"data":{"id":"C1","hp":100,"pos":{"x":1,"y":2,"z":3,"w":4}}}"#;
        let envelope = decode(text.as_bytes()).unwrap();

        assert_eq!(envelope.data.id, "C1");
        assert_eq!(envelope.data.position, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_decode_unknown_type_is_not_an_error() {
        let envelope = decode(br#"{"type":"chat","data":{"id":"C1"}}"#).unwrap();
        assert_eq!(envelope.kind, MessageType::Unknown);

        let envelope = decode(br#"{"data":{"id":"C1"}}"#).unwrap();
        assert_eq!(envelope.kind, MessageType::Unknown);
    }

    #[test]
    fn test_decode_malformed_payloads() {
        let malformed: Vec<&[u8]> = vec![
            &b""[..],
            &b"not json"[..],
            &br#"{"type":"update","data":"#[..],
            &b"42"[..],
            &br#"{"type":"update","data":{"id":7}}"#[..],
            &br#"{"type":"update","data":{"pos":{"x":"far"}}}"#[..],
            &[0xFF, 0xFE, 0x7B][..],
        ];

        for record in malformed {
            assert!(
                matches!(decode(record), Err(DecodeError::Malformed(_))),
                "should reject {:?}",
                String::from_utf8_lossy(record)
            );
        }
    }

    #[test]
    fn test_non_finite_components_keep_their_value() {
        let envelope = Envelope::update(
            "C1",
            Vec3::new(f32::NAN, f32::INFINITY, 1.0),
            Vec3::new(f32::NEG_INFINITY, 0.0, 0.0),
        );
        let text = encode(&envelope).unwrap();
        assert!(text.contains(r#""x":"NaN""#));
        assert!(text.contains(r#""y":"Infinity""#));
        assert!(text.contains(r#""x":"-Infinity""#));

        let decoded = decode(text.as_bytes()).unwrap();
        assert!(decoded.data.position.x.is_nan());
        assert_eq!(decoded.data.position.y, f32::INFINITY);
        assert_approx_eq!(decoded.data.position.z, 1.0);
        assert_eq!(decoded.data.rotation.x, f32::NEG_INFINITY);
    }

    #[test]
    fn test_null_component_reads_as_nan() {
        let decoded = decode(br#"{"type":"update","data":{"pos":{"x":null,"y":2}}}"#).unwrap();

        assert!(decoded.data.position.x.is_nan());
        assert_approx_eq!(decoded.data.position.y, 2.0);
        assert_eq!(decoded.data.position.z, 0.0);
    }

    #[test]
    fn test_vec3_display() {
        let v = Vec3::new(1.0, -2.26, 90.04);
        assert_eq!(v.to_string(), "(1.0, -2.3, 90.0)");
    }
}
