//! Single-facet value matcher: configuration and compiled form.

use super::error::MatcherError;
use super::is_false;
use super::pattern::{CachedValue, CompiledPattern};
use super::score::{MatchBehaviour, MatchOperator, MatchResult, MatchScores};
use crate::message::body::decode_base64;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Matcher kinds, named as they appear in persisted mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatcherKind {
    ExactMatcher,
    WildcardMatcher,
    RegexMatcher,
    JsonPathMatcher,
    XPathMatcher,
    JsonMatcher,
    JsonPartialMatcher,
    NotNullOrEmptyMatcher,
    ExactObjectMatcher,
}

impl MatcherKind {
    pub fn name(&self) -> &'static str {
        match self {
            MatcherKind::ExactMatcher => "ExactMatcher",
            MatcherKind::WildcardMatcher => "WildcardMatcher",
            MatcherKind::RegexMatcher => "RegexMatcher",
            MatcherKind::JsonPathMatcher => "JsonPathMatcher",
            MatcherKind::XPathMatcher => "XPathMatcher",
            MatcherKind::JsonMatcher => "JsonMatcher",
            MatcherKind::JsonPartialMatcher => "JsonPartialMatcher",
            MatcherKind::NotNullOrEmptyMatcher => "NotNullOrEmptyMatcher",
            MatcherKind::ExactObjectMatcher => "ExactObjectMatcher",
        }
    }

    /// Kinds that evaluate a parsed JSON document directly.
    pub fn is_json_matcher(&self) -> bool {
        matches!(
            self,
            MatcherKind::JsonPathMatcher | MatcherKind::JsonMatcher | MatcherKind::JsonPartialMatcher
        )
    }

    /// Kinds that look at raw bytes instead of decoded text.
    pub fn is_object_matcher(&self) -> bool {
        matches!(
            self,
            MatcherKind::NotNullOrEmptyMatcher | MatcherKind::ExactObjectMatcher
        )
    }
}

/// Persisted matcher description.
///
/// ```yaml
/// name: WildcardMatcher
/// patterns: ["/api/*", "/v2/*"]
/// ignoreCase: true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatcherSpec {
    pub name: MatcherKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<Value>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub ignore_case: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub reject_on_match: bool,
    #[serde(default, skip_serializing_if = "MatchOperator::is_default")]
    pub match_operator: MatchOperator,
}

impl MatcherSpec {
    pub fn new<I, V>(name: MatcherKind, patterns: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            name,
            pattern: None,
            patterns: patterns.into_iter().map(Into::into).collect(),
            ignore_case: false,
            reject_on_match: false,
            match_operator: MatchOperator::Or,
        }
    }

    pub fn exact(pattern: impl Into<String>) -> Self {
        Self::new(MatcherKind::ExactMatcher, [Value::String(pattern.into())])
    }

    pub fn exact_any<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(MatcherKind::ExactMatcher, patterns.into_iter().map(|p| Value::String(p.into())))
    }

    pub fn wildcard(pattern: impl Into<String>) -> Self {
        Self::new(MatcherKind::WildcardMatcher, [Value::String(pattern.into())])
    }

    pub fn regex(pattern: impl Into<String>) -> Self {
        Self::new(MatcherKind::RegexMatcher, [Value::String(pattern.into())])
    }

    pub fn json_path(pattern: impl Into<String>) -> Self {
        Self::new(MatcherKind::JsonPathMatcher, [Value::String(pattern.into())])
    }

    pub fn xpath(pattern: impl Into<String>) -> Self {
        Self::new(MatcherKind::XPathMatcher, [Value::String(pattern.into())])
    }

    pub fn json(pattern: Value) -> Self {
        Self::new(MatcherKind::JsonMatcher, [pattern])
    }

    pub fn json_partial(pattern: Value) -> Self {
        Self::new(MatcherKind::JsonPartialMatcher, [pattern])
    }

    pub fn not_null_or_empty() -> Self {
        Self::new(MatcherKind::NotNullOrEmptyMatcher, Vec::<Value>::new())
    }

    pub fn exact_object(bytes: &[u8]) -> Self {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        Self::new(MatcherKind::ExactObjectMatcher, [encoded])
    }

    pub fn ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    pub fn reject_on_match(mut self) -> Self {
        self.reject_on_match = true;
        self
    }

    pub fn with_operator(mut self, operator: MatchOperator) -> Self {
        self.match_operator = operator;
        self
    }

    pub fn behaviour(&self) -> MatchBehaviour {
        MatchBehaviour::from_reject(self.reject_on_match)
    }

    /// `pattern` followed by `patterns`.
    pub fn all_patterns(&self) -> impl Iterator<Item = &Value> {
        self.pattern.iter().chain(self.patterns.iter())
    }

    /// First pattern as text, when it is a string.
    pub fn first_text(&self) -> Option<&str> {
        self.all_patterns().next().and_then(Value::as_str)
    }
}

/// Compiled [`MatcherSpec`].
#[derive(Debug, Clone)]
pub struct ValueMatcher {
    spec: MatcherSpec,
    patterns: Vec<CompiledPattern>,
}

impl ValueMatcher {
    pub fn compile(spec: &MatcherSpec) -> Result<Self, MatcherError> {
        let name = spec.name.name();
        let ignore_case = spec.ignore_case;

        let patterns = if spec.name == MatcherKind::NotNullOrEmptyMatcher {
            vec![CompiledPattern::NotNullOrEmpty]
        } else {
            let compiled: Result<Vec<_>, _> = spec
                .all_patterns()
                .map(|value| compile_pattern(spec.name, name, value, ignore_case))
                .collect();
            compiled?
        };

        if patterns.is_empty() {
            return Err(MatcherError::MissingPattern(name));
        }

        Ok(Self {
            spec: spec.clone(),
            patterns,
        })
    }

    pub fn spec(&self) -> &MatcherSpec {
        &self.spec
    }

    pub fn kind(&self) -> MatcherKind {
        self.spec.name
    }

    /// Score a text value; `None` means the request has no such value.
    pub fn score_text(&self, input: Option<&str>) -> MatchResult {
        match input {
            Some(text) => self.finish(
                self.patterns
                    .iter()
                    .map(|p| p.matches_text(text, self.spec.ignore_case)),
            ),
            None => self.missing(),
        }
    }

    pub fn score_json(&self, input: &Value) -> MatchResult {
        self.finish(
            self.patterns
                .iter()
                .map(|p| p.matches_json(input, self.spec.ignore_case)),
        )
    }

    pub fn score_bytes(&self, input: &[u8]) -> MatchResult {
        self.finish(
            self.patterns
                .iter()
                .map(|p| p.matches_bytes(input, self.spec.ignore_case)),
        )
    }

    pub(crate) fn missing(&self) -> MatchResult {
        MatchResult::new(self.spec.behaviour().apply(MatchScores::MISMATCH))
    }

    pub(crate) fn wants_json(&self) -> bool {
        self.patterns.iter().any(CompiledPattern::wants_json)
    }

    fn finish<I>(&self, outcomes: I) -> MatchResult
    where
        I: Iterator<Item = Result<bool, MatcherError>>,
    {
        let mut scores = Vec::with_capacity(self.patterns.len());
        for outcome in outcomes {
            match outcome {
                Ok(matched) => scores.push(MatchScores::from_bool(matched)),
                Err(fault) => return MatchResult::faulted(fault),
            }
        }
        let aggregated = self.spec.match_operator.aggregate(scores);
        MatchResult::new(self.spec.behaviour().apply(aggregated))
    }
}

fn compile_pattern(
    kind: MatcherKind,
    name: &'static str,
    value: &Value,
    ignore_case: bool,
) -> Result<CompiledPattern, MatcherError> {
    let text = || {
        value.as_str().ok_or(MatcherError::InvalidPattern {
            matcher: name,
            expected: "a string",
        })
    };

    match kind {
        MatcherKind::ExactMatcher => Ok(CompiledPattern::Exact(CachedValue::new(text()?))),
        MatcherKind::WildcardMatcher => CompiledPattern::wildcard(text()?, ignore_case),
        MatcherKind::RegexMatcher => CompiledPattern::regex(text()?, ignore_case),
        MatcherKind::JsonPathMatcher => CompiledPattern::json_path(text()?),
        MatcherKind::XPathMatcher => Ok(CompiledPattern::XPath(text()?.to_string())),
        MatcherKind::JsonMatcher => Ok(CompiledPattern::Json(json_pattern(value)?)),
        MatcherKind::JsonPartialMatcher => Ok(CompiledPattern::JsonPartial(json_pattern(value)?)),
        MatcherKind::NotNullOrEmptyMatcher => Ok(CompiledPattern::NotNullOrEmpty),
        MatcherKind::ExactObjectMatcher => decode_base64(text()?)
            .map(CompiledPattern::ExactObject)
            .map_err(|e| MatcherError::InvalidBase64(e.to_string())),
    }
}

/// JSON patterns may be given inline or as JSON text.
fn json_pattern(value: &Value) -> Result<Value, MatcherError> {
    match value {
        Value::String(text) => {
            serde_json::from_str(text).map_err(|e| MatcherError::InvalidJson(e.to_string()))
        }
        other => Ok(other.clone()),
    }
}
