//! GraphQL request matcher.
//!
//! Requests are read from a JSON body (`{"query", "operationName",
//! "variables"}`) or, for `application/graphql`, from the raw body text.
//! Queries compare token by token, so whitespace, commas and comments in the
//! document are insignificant.

use super::error::MatcherError;
use super::is_false;
use super::score::{MatchBehaviour, MatchOperator, MatchResult, MatchScores};
use super::value_matcher::{MatcherSpec, ValueMatcher};
use crate::message::{BodyData, BodyValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQlMatcherSpec {
    /// Accepted query documents; any one of them may match
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queries: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<MatcherSpec>,
    /// Applied to the `variables` object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<MatcherSpec>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub reject_on_match: bool,
}

#[derive(Debug, Clone)]
pub struct GraphQlMatcher {
    spec: GraphQlMatcherSpec,
    queries: Vec<String>,
    operation_name: Option<ValueMatcher>,
    variables: Option<ValueMatcher>,
}

struct GraphQlRequest {
    query: String,
    operation_name: Option<String>,
    variables: Value,
}

impl GraphQlMatcher {
    pub fn compile(spec: &GraphQlMatcherSpec) -> Result<Self, MatcherError> {
        Ok(Self {
            spec: spec.clone(),
            queries: spec.queries.iter().map(|q| normalize_graphql(q)).collect(),
            operation_name: spec
                .operation_name
                .as_ref()
                .map(ValueMatcher::compile)
                .transpose()?,
            variables: spec.variables.as_ref().map(ValueMatcher::compile).transpose()?,
        })
    }

    pub fn spec(&self) -> &GraphQlMatcherSpec {
        &self.spec
    }

    pub fn score(&self, body: &BodyData) -> MatchResult {
        let behaviour = MatchBehaviour::from_reject(self.spec.reject_on_match);

        let request = match extract_request(body) {
            Ok(Some(request)) => request,
            Ok(None) => return MatchResult::new(behaviour.apply(MatchScores::MISMATCH)),
            Err(fault) => return MatchResult::faulted(fault),
        };

        let mut scores = Vec::with_capacity(3);
        if !self.queries.is_empty() {
            let normalized = normalize_graphql(&request.query);
            scores.push(MatchScores::from_bool(
                self.queries.iter().any(|q| *q == normalized),
            ));
        }
        if let Some(matcher) = &self.operation_name {
            let result = matcher.score_text(request.operation_name.as_deref());
            if let Some(fault) = result.fault {
                return MatchResult::faulted(fault);
            }
            scores.push(result.score);
        }
        if let Some(matcher) = &self.variables {
            let result = matcher.score_json(&request.variables);
            if let Some(fault) = result.fault {
                return MatchResult::faulted(fault);
            }
            scores.push(result.score);
        }

        let score = if scores.is_empty() {
            MatchScores::PERFECT
        } else {
            MatchOperator::And.aggregate(scores)
        };
        MatchResult::new(behaviour.apply(score))
    }
}

fn extract_request(body: &BodyData) -> Result<Option<GraphQlRequest>, MatcherError> {
    let from_json = |json: &Value| -> Result<Option<GraphQlRequest>, MatcherError> {
        let query = json
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| MatcherError::InvalidJson("missing GraphQL \"query\" field".into()))?;
        Ok(Some(GraphQlRequest {
            query: query.to_string(),
            operation_name: json
                .get("operationName")
                .and_then(Value::as_str)
                .map(str::to_string),
            variables: json.get("variables").cloned().unwrap_or(Value::Null),
        }))
    };

    match &body.value {
        BodyValue::None => Ok(None),
        BodyValue::Json(json) => from_json(json),
        BodyValue::String(text) => {
            let is_graphql = body
                .content_type
                .as_deref()
                .is_some_and(|ct| ct.starts_with("application/graphql"));
            if is_graphql {
                Ok(Some(GraphQlRequest {
                    query: text.clone(),
                    operation_name: None,
                    variables: Value::Null,
                }))
            } else {
                let json: Value = serde_json::from_str(text)
                    .map_err(|e| MatcherError::InvalidJson(e.to_string()))?;
                from_json(&json)
            }
        }
        _ => Err(MatcherError::UnsupportedBody {
            matcher: "GraphQLMatcher",
            body_type: body.body_type(),
        }),
    }
}

/// Canonical token form of a GraphQL document.
pub fn normalize_graphql(document: &str) -> String {
    let chars: Vec<char> = document.chars().collect();
    let mut tokens: Vec<String> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() || c == ',' || c == '\u{feff}' {
            i += 1;
        } else if c == '#' {
            while i < chars.len() && chars[i] != '\n' && chars[i] != '\r' {
                i += 1;
            }
        } else if c == '"' {
            let start = i;
            let block = chars[i..].starts_with(&['"', '"', '"']);
            i += if block { 3 } else { 1 };
            while i < chars.len() {
                if chars[i] == '\\' {
                    i += 2;
                    continue;
                }
                if block {
                    if chars[i..].starts_with(&['"', '"', '"']) {
                        i += 3;
                        break;
                    }
                } else if chars[i] == '"' {
                    i += 1;
                    break;
                }
                i += 1;
            }
            let end = i.min(chars.len());
            tokens.push(chars[start..end].iter().collect());
        } else if chars[i..].starts_with(&['.', '.', '.']) {
            tokens.push("...".to_string());
            i += 3;
        } else if "!$&()[]{}:=@|".contains(c) {
            tokens.push(c.to_string());
            i += 1;
        } else {
            let start = i;
            while i < chars.len() {
                let d = chars[i];
                if d.is_whitespace() || d == ',' || d == '"' || d == '#' || "!$&()[]{}:=@|".contains(d) {
                    break;
                }
                i += 1;
            }
            tokens.push(chars[start..i].iter().collect());
        }
    }

    tokens.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_ignores_layout() {
        let a = "query Hero($ep: Episode) {\n  hero(episode: $ep) { name, friends { name } }\n}";
        let b = "query Hero( $ep : Episode ){hero(episode:$ep){name friends{name}}} # trailing";
        assert_eq!(normalize_graphql(a), normalize_graphql(b));
    }

    #[test]
    fn test_normalize_keeps_string_contents() {
        let a = r#"{ search(text: "a  b, c") { id } }"#;
        let b = r#"{ search(text: "a b c") { id } }"#;
        assert_ne!(normalize_graphql(a), normalize_graphql(b));
    }

    #[test]
    fn test_match_json_request() {
        let spec = GraphQlMatcherSpec {
            queries: vec!["{ hero { name } }".to_string()],
            operation_name: None,
            variables: Some(MatcherSpec::json_partial(json!({"id": 1}))),
            reject_on_match: false,
        };
        let m = GraphQlMatcher::compile(&spec).unwrap();

        let body = BodyData::from_json(json!({
            "query": "{hero{name}}",
            "variables": {"id": 1, "extra": true}
        }));
        assert!(m.score(&body).is_perfect());

        let wrong = BodyData::from_json(json!({"query": "{ hero { id } }", "variables": {"id": 1}}));
        assert_eq!(m.score(&wrong).score, 0.0);
    }

    #[test]
    fn test_application_graphql_body() {
        let spec = GraphQlMatcherSpec {
            queries: vec!["{ me { id } }".to_string()],
            ..GraphQlMatcherSpec::default()
        };
        let m = GraphQlMatcher::compile(&spec).unwrap();
        let body = BodyData::from_string("{me{id}}").with_content_type("application/graphql");
        assert!(m.score(&body).is_perfect());
    }

    #[test]
    fn test_missing_query_field_faults() {
        let m = GraphQlMatcher::compile(&GraphQlMatcherSpec::default()).unwrap();
        let result = m.score(&BodyData::from_json(json!({"q": 1})));
        assert!(matches!(result.fault, Some(MatcherError::InvalidJson(_))));
    }
}
