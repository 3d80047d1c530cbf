//! Compiled single patterns.
//!
//! This module provides:
//! - `CachedValue` - A string with a pre-computed lowercase copy
//! - `CompiledPattern` - One pattern of a `ValueMatcher`, ready for evaluation
//! - JSON equality/containment and XPath helpers shared by the body matchers

use super::error::MatcherError;
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use serde_json_path::JsonPath;

/// A string value with pre-computed lowercase for case-insensitive matching.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub value: String,
    pub lower: String,
}

impl CachedValue {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        let lower = value.to_lowercase();
        Self { value, lower }
    }

    #[inline]
    pub fn equals(&self, value: &str, ignore_case: bool) -> bool {
        if ignore_case {
            value.to_lowercase() == self.lower
        } else {
            value == self.value
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum CompiledPattern {
    Exact(CachedValue),
    Wildcard(Regex),
    Regex(Regex),
    JsonPath(JsonPath),
    XPath(String),
    Json(Value),
    JsonPartial(Value),
    NotNullOrEmpty,
    ExactObject(Vec<u8>),
}

impl CompiledPattern {
    pub fn wildcard(pattern: &str, ignore_case: bool) -> Result<Self, MatcherError> {
        build_regex(&wildcard_to_regex(pattern), pattern, ignore_case).map(CompiledPattern::Wildcard)
    }

    pub fn regex(pattern: &str, ignore_case: bool) -> Result<Self, MatcherError> {
        build_regex(pattern, pattern, ignore_case).map(CompiledPattern::Regex)
    }

    pub fn json_path(pattern: &str) -> Result<Self, MatcherError> {
        JsonPath::parse(pattern)
            .map(CompiledPattern::JsonPath)
            .map_err(|e| MatcherError::InvalidJsonPath {
                pattern: pattern.to_string(),
                message: e.to_string(),
            })
    }

    /// Patterns that need a JSON document rather than text.
    pub fn wants_json(&self) -> bool {
        matches!(
            self,
            CompiledPattern::JsonPath(_) | CompiledPattern::Json(_) | CompiledPattern::JsonPartial(_)
        )
    }

    pub fn matches_text(&self, text: &str, ignore_case: bool) -> Result<bool, MatcherError> {
        match self {
            CompiledPattern::Exact(expected) => Ok(expected.equals(text, ignore_case)),
            CompiledPattern::Wildcard(re) | CompiledPattern::Regex(re) => Ok(re.is_match(text)),
            CompiledPattern::XPath(expression) => xpath_matches(text, expression),
            CompiledPattern::NotNullOrEmpty => Ok(!text.is_empty()),
            CompiledPattern::ExactObject(bytes) => Ok(text.as_bytes() == bytes.as_slice()),
            CompiledPattern::JsonPath(_) | CompiledPattern::Json(_) | CompiledPattern::JsonPartial(_) => {
                let json: Value = serde_json::from_str(text)
                    .map_err(|e| MatcherError::InvalidJson(e.to_string()))?;
                self.matches_json(&json, ignore_case)
            }
        }
    }

    pub fn matches_json(&self, json: &Value, ignore_case: bool) -> Result<bool, MatcherError> {
        match self {
            CompiledPattern::JsonPath(path) => Ok(!path.query(json).is_empty()),
            CompiledPattern::Json(expected) => Ok(json_equals(json, expected, ignore_case)),
            CompiledPattern::JsonPartial(expected) => Ok(json_contains(json, expected, ignore_case)),
            CompiledPattern::NotNullOrEmpty => Ok(!json.is_null()),
            _ => match json {
                Value::String(s) => self.matches_text(s, ignore_case),
                other => self.matches_text(&other.to_string(), ignore_case),
            },
        }
    }

    pub fn matches_bytes(&self, bytes: &[u8], ignore_case: bool) -> Result<bool, MatcherError> {
        match self {
            CompiledPattern::ExactObject(expected) => Ok(bytes == expected.as_slice()),
            CompiledPattern::NotNullOrEmpty => Ok(!bytes.is_empty()),
            _ => match std::str::from_utf8(bytes) {
                Ok(text) => self.matches_text(text, ignore_case),
                Err(e) => Err(MatcherError::InvalidUtf8(e.to_string())),
            },
        }
    }
}

fn build_regex(source: &str, pattern: &str, ignore_case: bool) -> Result<Regex, MatcherError> {
    RegexBuilder::new(source)
        .case_insensitive(ignore_case)
        .dot_matches_new_line(true)
        .build()
        .map_err(|e| MatcherError::InvalidRegex {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

/// Translate a `*`/`?` glob into an anchored regex.
pub(crate) fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    let mut buf = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c => out.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    out.push('$');
    out
}

fn strings_equal(a: &str, b: &str, ignore_case: bool) -> bool {
    if ignore_case {
        a.to_lowercase() == b.to_lowercase()
    } else {
        a == b
    }
}

/// Strict deep equality: objects must have the same key sets.
pub(crate) fn json_equals(actual: &Value, expected: &Value, ignore_case: bool) -> bool {
    match (actual, expected) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::String(a), Value::String(b)) => strings_equal(a, b, ignore_case),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b.iter())
                    .all(|(x, y)| json_equals(x, y, ignore_case))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && b.iter().all(|(key, expected_val)| {
                    a.get(key)
                        .is_some_and(|actual_val| json_equals(actual_val, expected_val, ignore_case))
                })
        }
        _ => false,
    }
}

/// Containment: every expected key must be present and match; extra keys
/// and extra array elements in the actual document are ignored.
pub(crate) fn json_contains(actual: &Value, expected: &Value, ignore_case: bool) -> bool {
    match (actual, expected) {
        (Value::Object(a), Value::Object(b)) => b.iter().all(|(key, expected_val)| {
            a.get(key)
                .is_some_and(|actual_val| json_contains(actual_val, expected_val, ignore_case))
        }),
        (Value::Array(a), Value::Array(b)) => b
            .iter()
            .all(|wanted| a.iter().any(|have| json_contains(have, wanted, ignore_case))),
        (Value::String(a), Value::String(b)) => strings_equal(a, b, ignore_case),
        (a, b) => a == b,
    }
}

/// Evaluate an XPath expression; true for a non-empty node set, a true
/// boolean, a non-empty string or a non-zero number.
pub(crate) fn xpath_matches(xml: &str, expression: &str) -> Result<bool, MatcherError> {
    use sxd_document::parser;
    use sxd_xpath::{evaluate_xpath, Value as XValue};

    let package = parser::parse(xml).map_err(|e| MatcherError::InvalidXml(format!("{e:?}")))?;
    let document = package.as_document();

    match evaluate_xpath(&document, expression) {
        Ok(XValue::Boolean(b)) => Ok(b),
        Ok(XValue::Number(n)) => Ok(n != 0.0 && !n.is_nan()),
        Ok(XValue::String(s)) => Ok(!s.is_empty()),
        Ok(XValue::Nodeset(nodes)) => Ok(nodes.iter().next().is_some()),
        Err(e) => Err(MatcherError::XPathEvaluation(e.to_string())),
    }
}
