//! Body values and content detection.
//!
//! A body is carried as a [`BodyValue`] (what the hosting layer decided the
//! payload is) plus the raw bytes that arrived on the wire, the declared
//! content type and any content encoding. Matchers pick the representation
//! they understand; the proxy forwards the raw bytes untouched.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;

/// Detected body kind, mirroring the [`BodyValue`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BodyType {
    #[default]
    None,
    String,
    Json,
    Bytes,
    FormUrlEncoded,
    File,
    MultiPart,
    ProtoBuf,
}

/// Parsed body value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum BodyValue {
    #[default]
    None,
    String(String),
    Json(Value),
    Bytes(#[serde(with = "base64_bytes")] Bytes),
    FormUrlEncoded(Vec<(String, String)>),
    /// Reference to a file served by the hosting layer
    File(String),
    MultiPart(Vec<MultipartPart>),
    ProtoBuf(#[serde(with = "base64_bytes")] Bytes),
}

/// One part of a `multipart/*` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartPart {
    pub headers: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_transfer_encoding: Option<String>,
    pub body: BodyData,
}

/// Request or response body.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyData {
    #[serde(default)]
    pub value: BodyValue,
    /// Bytes as received; absent for bodies built in code
    #[serde(skip)]
    pub raw: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Content encoding (gzip, deflate, br); the body is never decompressed here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
}

impl BodyData {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_string(text: impl Into<String>) -> Self {
        Self {
            value: BodyValue::String(text.into()),
            ..Self::default()
        }
    }

    pub fn from_json(json: Value) -> Self {
        Self {
            value: BodyValue::Json(json),
            content_type: Some("application/json".to_string()),
            ..Self::default()
        }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            value: BodyValue::Bytes(bytes.into()),
            ..Self::default()
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn body_type(&self) -> BodyType {
        match &self.value {
            BodyValue::None => BodyType::None,
            BodyValue::String(_) => BodyType::String,
            BodyValue::Json(_) => BodyType::Json,
            BodyValue::Bytes(_) => BodyType::Bytes,
            BodyValue::FormUrlEncoded(_) => BodyType::FormUrlEncoded,
            BodyValue::File(_) => BodyType::File,
            BodyValue::MultiPart(_) => BodyType::MultiPart,
            BodyValue::ProtoBuf(_) => BodyType::ProtoBuf,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.value, BodyValue::None)
    }

    /// Decoded text for body kinds that have one (string, JSON, form).
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        if let Some(raw) = &self.raw {
            if matches!(
                self.value,
                BodyValue::String(_) | BodyValue::Json(_) | BodyValue::FormUrlEncoded(_)
            ) {
                if let Ok(text) = std::str::from_utf8(raw) {
                    return Some(Cow::Borrowed(text));
                }
            }
        }

        match &self.value {
            BodyValue::String(s) => Some(Cow::Borrowed(s)),
            BodyValue::Json(v) => Some(Cow::Owned(v.to_string())),
            BodyValue::FormUrlEncoded(pairs) => Some(Cow::Owned(encode_form(pairs))),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match &self.value {
            BodyValue::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Wire bytes for forwarding or binary matching.
    pub fn to_bytes(&self) -> Bytes {
        if let Some(raw) = &self.raw {
            return raw.clone();
        }

        match &self.value {
            BodyValue::None | BodyValue::File(_) => Bytes::new(),
            BodyValue::String(s) => Bytes::from(s.clone()),
            BodyValue::Json(v) => Bytes::from(v.to_string()),
            BodyValue::Bytes(b) | BodyValue::ProtoBuf(b) => b.clone(),
            BodyValue::FormUrlEncoded(pairs) => Bytes::from(encode_form(pairs)),
            BodyValue::MultiPart(parts) => {
                let mut out = Vec::new();
                for part in parts {
                    out.extend_from_slice(&part.body.to_bytes());
                }
                Bytes::from(out)
            }
        }
    }

    /// Build a body from wire bytes using the declared content type.
    ///
    /// Compressed payloads are kept as bytes. Bodies without a recognised
    /// content type are sniffed: valid JSON documents become `Json`, other
    /// UTF-8 text becomes `String`, anything else stays `Bytes`.
    pub fn detect(bytes: Bytes, content_type: Option<&str>, compression: Option<&str>) -> Self {
        let content_type_owned = content_type.map(str::to_string);
        let compression_owned = compression
            .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case("identity"))
            .map(str::to_string);

        let value = if bytes.is_empty() {
            BodyValue::None
        } else if compression_owned.is_some() {
            BodyValue::Bytes(bytes.clone())
        } else {
            detect_value(&bytes, content_type)
        };

        Self {
            value,
            raw: (!bytes.is_empty()).then_some(bytes),
            content_type: content_type_owned,
            compression: compression_owned,
        }
    }
}

fn detect_value(bytes: &Bytes, content_type: Option<&str>) -> BodyValue {
    let mime = content_type
        .map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
        .unwrap_or_default();
    let text = std::str::from_utf8(bytes).ok();

    if mime == "application/json" || mime.ends_with("+json") {
        return match text {
            Some(t) => serde_json::from_str(t)
                .map(BodyValue::Json)
                .unwrap_or_else(|_| BodyValue::String(t.to_string())),
            None => BodyValue::Bytes(bytes.clone()),
        };
    }

    if mime == "application/x-www-form-urlencoded" {
        return match text {
            Some(t) => BodyValue::FormUrlEncoded(parse_form(t)),
            None => BodyValue::Bytes(bytes.clone()),
        };
    }

    if mime.starts_with("multipart/") {
        return content_type
            .and_then(boundary_of)
            .and_then(|boundary| parse_multipart(bytes, &boundary))
            .map(BodyValue::MultiPart)
            .unwrap_or_else(|| BodyValue::Bytes(bytes.clone()));
    }

    if matches!(
        mime.as_str(),
        "application/grpc"
            | "application/grpc+proto"
            | "application/x-protobuf"
            | "application/protobuf"
            | "application/vnd.google.protobuf"
    ) {
        return BodyValue::ProtoBuf(bytes.clone());
    }

    match text {
        Some(t) => {
            let trimmed = t.trim_start();
            if !mime.starts_with("text/") && (trimmed.starts_with('{') || trimmed.starts_with('[')) {
                if let Ok(json) = serde_json::from_str(t) {
                    return BodyValue::Json(json);
                }
            }
            BodyValue::String(t.to_string())
        }
        None => BodyValue::Bytes(bytes.clone()),
    }
}

/// Parse `application/x-www-form-urlencoded` text into ordered pairs.
pub(crate) fn parse_form(body: &str) -> Vec<(String, String)> {
    body.split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = decode_component(parts.next().unwrap_or_default());
            let value = parts.next().map(decode_component).unwrap_or_default();
            (key, value)
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|c| c.into_owned())
        .unwrap_or(spaced)
}

fn encode_form(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn boundary_of(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.trim().split_once('=')?;
        name.eq_ignore_ascii_case("boundary")
            .then(|| value.trim_matches('"').to_string())
    })
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn parse_multipart(body: &[u8], boundary: &str) -> Option<Vec<MultipartPart>> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();
    let mut parts = Vec::new();
    let mut pos = find(body, delimiter, 0)? + delimiter.len();

    loop {
        if body[pos..].starts_with(b"--") {
            break;
        }
        if body[pos..].starts_with(b"\r\n") {
            pos += 2;
        }
        let next = find(body, delimiter, pos)?;
        let mut segment = &body[pos..next];
        if segment.ends_with(b"\r\n") {
            segment = &segment[..segment.len() - 2];
        }
        parts.push(parse_part(segment));
        pos = next + delimiter.len();
    }

    Some(parts)
}

fn parse_part(segment: &[u8]) -> MultipartPart {
    let (head, content) = match find(segment, b"\r\n\r\n", 0) {
        Some(split) => (&segment[..split], &segment[split + 4..]),
        None => (&segment[..0], segment),
    };

    let headers: Vec<(String, String)> = String::from_utf8_lossy(head)
        .lines()
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect();

    let header = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    };
    let content_type = header("Content-Type");
    let content_disposition = header("Content-Disposition");
    let content_transfer_encoding = header("Content-Transfer-Encoding");
    let body = BodyData::detect(
        Bytes::copy_from_slice(content),
        content_type.as_deref(),
        None,
    );

    MultipartPart {
        headers,
        content_type,
        content_disposition,
        content_transfer_encoding,
        body,
    }
}

mod base64_bytes {
    use super::BASE64;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let text = String::deserialize(deserializer)?;
        BASE64
            .decode(text.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

/// Decode a base64 pattern; shared with the exact-object matcher.
pub(crate) fn decode_base64(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detect_json_by_content_type() {
        let body = BodyData::detect(
            Bytes::from_static(br#"{"id": 7}"#),
            Some("application/json; charset=utf-8"),
            None,
        );
        assert_eq!(body.body_type(), BodyType::Json);
        assert_eq!(body.as_json(), Some(&json!({"id": 7})));
        assert_eq!(body.as_text().unwrap(), r#"{"id": 7}"#);
    }

    #[test]
    fn test_detect_form() {
        let body = BodyData::detect(
            Bytes::from_static(b"name=John+Doe&city=New%20York"),
            Some("application/x-www-form-urlencoded"),
            None,
        );
        match body.value {
            BodyValue::FormUrlEncoded(pairs) => {
                assert_eq!(pairs[0], ("name".to_string(), "John Doe".to_string()));
                assert_eq!(pairs[1], ("city".to_string(), "New York".to_string()));
            }
            other => panic!("expected form body, got {other:?}"),
        }
    }

    #[test]
    fn test_detect_sniffs_json_without_content_type() {
        let body = BodyData::detect(Bytes::from_static(b"[1,2,3]"), None, None);
        assert_eq!(body.body_type(), BodyType::Json);

        let body = BodyData::detect(Bytes::from_static(b"hello"), None, None);
        assert_eq!(body.body_type(), BodyType::String);

        let body = BodyData::detect(Bytes::from_static(&[0xff, 0xfe, 0x00]), None, None);
        assert_eq!(body.body_type(), BodyType::Bytes);
    }

    #[test]
    fn test_compressed_body_stays_binary() {
        let body = BodyData::detect(
            Bytes::from_static(b"{\"a\":1}"),
            Some("application/json"),
            Some("gzip"),
        );
        assert_eq!(body.body_type(), BodyType::Bytes);
        assert_eq!(body.compression.as_deref(), Some("gzip"));
    }

    #[test]
    fn test_detect_multipart() {
        let raw = "--XyZ\r\n\
                   Content-Disposition: form-data; name=\"meta\"\r\n\
                   Content-Type: application/json\r\n\r\n\
                   {\"kind\":\"avatar\"}\r\n\
                   --XyZ\r\n\
                   Content-Disposition: form-data; name=\"note\"\r\n\r\n\
                   plain words\r\n\
                   --XyZ--\r\n";
        let body = BodyData::detect(
            Bytes::from(raw),
            Some("multipart/form-data; boundary=XyZ"),
            None,
        );

        let BodyValue::MultiPart(parts) = body.value else {
            panic!("expected multipart body");
        };
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].content_type.as_deref(), Some("application/json"));
        assert_eq!(parts[0].body.as_json(), Some(&json!({"kind": "avatar"})));
        assert_eq!(parts[1].body.as_text().unwrap(), "plain words");
    }

    #[test]
    fn test_empty_body_is_none() {
        let body = BodyData::detect(Bytes::new(), Some("text/plain"), None);
        assert!(body.is_empty());
        assert_eq!(body.content_type.as_deref(), Some("text/plain"));
    }
}
