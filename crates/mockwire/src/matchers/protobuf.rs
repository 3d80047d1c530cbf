//! Schema-less protobuf matcher.
//!
//! The payload is decoded straight from the wire format into a JSON view
//! keyed by field number. Repeated fields become arrays, length-delimited
//! fields become UTF-8 strings, nested messages or base64 text (in that
//! order of preference). A JSON-capable matcher then scores the view.

use super::error::MatcherError;
use super::is_false;
use super::score::{MatchBehaviour, MatchResult, MatchScores};
use super::value_matcher::{MatcherSpec, ValueMatcher};
use crate::message::{BodyData, BodyValue};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Buf;
use prost::encoding::{decode_key, decode_varint, WireType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

const MAX_NESTING: usize = 16;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtoBufMatcherSpec {
    /// Applied to the decoded JSON view; without it any decodable message matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MatcherSpec>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub reject_on_match: bool,
}

#[derive(Debug, Clone)]
pub struct ProtoBufMatcher {
    spec: ProtoBufMatcherSpec,
    content: Option<ValueMatcher>,
}

impl ProtoBufMatcher {
    pub fn compile(spec: &ProtoBufMatcherSpec) -> Result<Self, MatcherError> {
        Ok(Self {
            spec: spec.clone(),
            content: spec.content.as_ref().map(ValueMatcher::compile).transpose()?,
        })
    }

    pub fn spec(&self) -> &ProtoBufMatcherSpec {
        &self.spec
    }

    pub fn score(&self, body: &BodyData) -> MatchResult {
        let behaviour = MatchBehaviour::from_reject(self.spec.reject_on_match);

        let bytes = match &body.value {
            BodyValue::ProtoBuf(bytes) | BodyValue::Bytes(bytes) => bytes,
            BodyValue::None => return MatchResult::new(behaviour.apply(MatchScores::MISMATCH)),
            _ => {
                return MatchResult::faulted(MatcherError::UnsupportedBody {
                    matcher: "ProtoBufMatcher",
                    body_type: body.body_type(),
                })
            }
        };

        let is_grpc = body
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("application/grpc"));
        let view = match strip_grpc_frame(bytes, is_grpc).and_then(decode_protobuf) {
            Ok(view) => view,
            Err(fault) => return MatchResult::faulted(fault),
        };

        let score = match &self.content {
            Some(matcher) => {
                let result = matcher.score_json(&view);
                if result.fault.is_some() {
                    return result;
                }
                result.score
            }
            None => MatchScores::PERFECT,
        };
        MatchResult::new(behaviour.apply(score))
    }
}

/// Remove the 5 byte gRPC length prefix when present.
fn strip_grpc_frame(bytes: &[u8], is_grpc: bool) -> Result<&[u8], MatcherError> {
    if !is_grpc || bytes.len() < 5 {
        return Ok(bytes);
    }
    let declared = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    if declared != bytes.len() - 5 {
        return Ok(bytes);
    }
    match bytes[0] {
        0 => Ok(&bytes[5..]),
        _ => Err(MatcherError::ProtoBufDecode(
            "compressed gRPC frames are not supported".into(),
        )),
    }
}

/// Decode a protobuf message into its field-number keyed JSON view.
pub fn decode_protobuf(bytes: &[u8]) -> Result<Value, MatcherError> {
    decode_fields(bytes, 0).map(Value::Object)
}

fn decode_fields(mut buf: &[u8], depth: usize) -> Result<Map<String, Value>, MatcherError> {
    let mut fields = Map::new();

    while buf.has_remaining() {
        let (tag, wire_type) = decode_key(&mut buf).map_err(decode_error)?;
        let value = match wire_type {
            WireType::Varint => Value::from(decode_varint(&mut buf).map_err(decode_error)?),
            WireType::SixtyFourBit => {
                ensure_remaining(buf, 8)?;
                Value::from(buf.get_u64_le())
            }
            WireType::ThirtyTwoBit => {
                ensure_remaining(buf, 4)?;
                Value::from(buf.get_u32_le())
            }
            WireType::LengthDelimited => {
                let len = decode_varint(&mut buf).map_err(decode_error)? as usize;
                ensure_remaining(buf, len)?;
                let (chunk, rest) = buf.split_at(len);
                buf = rest;
                length_delimited(chunk, depth)
            }
            WireType::StartGroup | WireType::EndGroup => {
                return Err(MatcherError::ProtoBufDecode(
                    "group wire types are not supported".into(),
                ))
            }
        };

        let key = tag.to_string();
        match fields.get_mut(&key) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                fields.insert(key, value);
            }
        }
    }

    Ok(fields)
}

fn length_delimited(chunk: &[u8], depth: usize) -> Value {
    if let Ok(text) = std::str::from_utf8(chunk) {
        if text.chars().all(|c| !c.is_control() || c.is_whitespace()) {
            return Value::String(text.to_string());
        }
    }
    if depth < MAX_NESTING {
        if let Ok(nested) = decode_fields(chunk, depth + 1) {
            if !nested.is_empty() {
                return Value::Object(nested);
            }
        }
    }
    Value::String(BASE64.encode(chunk))
}

fn ensure_remaining(buf: &[u8], needed: usize) -> Result<(), MatcherError> {
    if buf.len() < needed {
        Err(MatcherError::ProtoBufDecode(format!(
            "truncated field: needed {needed} bytes, {} left",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn decode_error(e: prost::DecodeError) -> MatcherError {
    MatcherError::ProtoBufDecode(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    // field 1 varint 150, field 2 "hi", field 3 nested { field 1 varint 7 }, field 4 repeated 1, 2
    const MESSAGE: &[u8] = &[
        0x08, 0x96, 0x01, 0x12, 0x02, b'h', b'i', 0x1a, 0x02, 0x08, 0x07, 0x20, 0x01, 0x20, 0x02,
    ];

    #[test]
    fn test_decode_view() {
        let view = decode_protobuf(MESSAGE).unwrap();
        assert_eq!(
            view,
            json!({"1": 150, "2": "hi", "3": {"1": 7}, "4": [1, 2]})
        );
    }

    #[test]
    fn test_truncated_message_faults() {
        let result = decode_protobuf(&[0x12, 0x05, b'a']);
        assert!(matches!(result, Err(MatcherError::ProtoBufDecode(_))));
    }

    #[test]
    fn test_match_grpc_frame() {
        let mut framed = vec![0u8];
        framed.extend_from_slice(&(MESSAGE.len() as u32).to_be_bytes());
        framed.extend_from_slice(MESSAGE);

        let body = BodyData::detect(Bytes::from(framed), Some("application/grpc"), None);
        let m = ProtoBufMatcher::compile(&ProtoBufMatcherSpec {
            content: Some(MatcherSpec::json_partial(json!({"2": "hi", "3": {"1": 7}}))),
            reject_on_match: false,
        })
        .unwrap();
        assert!(m.score(&body).is_perfect());
    }

    #[test]
    fn test_json_path_over_view() {
        let body = BodyData::detect(Bytes::from_static(MESSAGE), Some("application/x-protobuf"), None);
        let m = ProtoBufMatcher::compile(&ProtoBufMatcherSpec {
            content: Some(MatcherSpec::json_path("$['4'][?@ > 1]")),
            reject_on_match: false,
        })
        .unwrap();
        assert!(m.score(&body).is_perfect());

        let none = ProtoBufMatcher::compile(&ProtoBufMatcherSpec {
            content: Some(MatcherSpec::json_path("$['4'][?@ > 5]")),
            reject_on_match: false,
        })
        .unwrap();
        assert_eq!(none.score(&body).score, 0.0);
    }

    #[test]
    fn test_text_body_is_unsupported() {
        let m = ProtoBufMatcher::compile(&ProtoBufMatcherSpec::default()).unwrap();
        let result = m.score(&BodyData::from_string("hello"));
        assert!(matches!(result.fault, Some(MatcherError::UnsupportedBody { .. })));
    }
}
