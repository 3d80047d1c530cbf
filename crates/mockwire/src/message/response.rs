use super::body::BodyData;
use super::multimap::MultiValueMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Transport-level fault the hosting layer should simulate instead of a
/// well-formed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultType {
    /// Status line and headers only, no body
    EmptyResponse,
    /// 200 status followed by garbage bytes
    MalformedResponseChunk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultDirective {
    #[serde(rename = "type")]
    pub kind: FaultType,
    /// Chance in [0,1] that the fault is applied; always applied when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
}

/// Response produced by a mapping's provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMessage {
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default, skip_serializing_if = "MultiValueMap::is_empty")]
    pub headers: MultiValueMap,
    #[serde(default, skip_serializing_if = "MultiValueMap::is_empty")]
    pub trailing_headers: MultiValueMap,
    #[serde(default, skip_serializing_if = "BodyData::is_empty")]
    pub body: BodyData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<FaultDirective>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

fn default_status() -> u16 {
    200
}

impl Default for ResponseMessage {
    fn default() -> Self {
        Self::new(default_status())
    }
}

impl ResponseMessage {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: MultiValueMap::new(),
            trailing_headers: MultiValueMap::new(),
            body: BodyData::none(),
            fault: None,
            delay_ms: None,
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    /// Fallback when no mapping matched.
    pub fn no_matching_mapping() -> Self {
        Self::new(404).with_json(serde_json::json!({"Status": "No matching mapping found"}))
    }

    /// JSON error body of the form `{"error": message}`.
    pub fn error(status: u16, message: &str) -> Self {
        Self::new(status).with_json(serde_json::json!({ "error": message }))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_trailing_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.trailing_headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: BodyData) -> Self {
        self.body = body;
        self
    }

    pub fn with_body_string(self, text: impl Into<String>) -> Self {
        self.with_body(BodyData::from_string(text))
    }

    /// JSON body; also sets `Content-Type` unless one is present.
    pub fn with_json(mut self, json: Value) -> Self {
        if self.headers.first("content-type").is_none() {
            self.headers.insert("Content-Type", "application/json");
        }
        self.body = BodyData::from_json(json);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = Some(delay.as_millis() as u64);
        self
    }

    pub fn with_fault(mut self, kind: FaultType, percentage: Option<f64>) -> Self {
        self.fault = Some(FaultDirective { kind, percentage });
        self
    }

    pub fn delay(&self) -> Option<Duration> {
        self.delay_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }
}
