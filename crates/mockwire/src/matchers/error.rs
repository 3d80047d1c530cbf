use crate::message::BodyType;
use thiserror::Error;

/// Matcher compilation failures and evaluation faults.
///
/// Compilation errors reject a mapping before it reaches the registry.
/// Evaluation faults are captured on the [`MatchResult`](super::MatchResult)
/// of the facet that raised them and score as a mismatch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatcherError {
    #[error("invalid regex pattern '{pattern}': {message}")]
    InvalidRegex { pattern: String, message: String },

    #[error("invalid JSONPath expression '{pattern}': {message}")]
    InvalidJsonPath { pattern: String, message: String },

    #[error("{matcher} pattern must be {expected}")]
    InvalidPattern {
        matcher: &'static str,
        expected: &'static str,
    },

    #[error("{0} requires at least one pattern")]
    MissingPattern(&'static str),

    #[error("invalid base64 object pattern: {0}")]
    InvalidBase64(String),

    #[error("path and url matchers are mutually exclusive")]
    PathAndUrlConflict,

    #[error("input is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("input is not valid UTF-8: {0}")]
    InvalidUtf8(String),

    #[error("input is not valid XML: {0}")]
    InvalidXml(String),

    #[error("XPath evaluation failed: {0}")]
    XPathEvaluation(String),

    #[error("protobuf decode failed: {0}")]
    ProtoBufDecode(String),

    #[error("{matcher} cannot match a {body_type:?} body")]
    UnsupportedBody {
        matcher: &'static str,
        body_type: BodyType,
    },
}
