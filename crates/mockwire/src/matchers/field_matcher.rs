//! Keyed matcher for headers, cookies and query parameters.
//!
//! One `KeyedMatcher` scores one named entry of a multi-value map. Several of
//! them may target the same facet, each contributing its own score.

use super::error::MatcherError;
use super::is_false;
use super::score::{MatchBehaviour, MatchOperator, MatchResult, MatchScores};
use super::value_matcher::{MatcherSpec, ValueMatcher};
use crate::message::MultiValueMap;
use serde::{Deserialize, Serialize};

/// Persisted keyed matcher.
///
/// With no `matchers` the entry only has to be present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyedMatcherSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matchers: Vec<MatcherSpec>,
    /// Compare the key case-insensitively
    #[serde(default, skip_serializing_if = "is_false")]
    pub ignore_case: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub reject_on_match: bool,
    #[serde(default, skip_serializing_if = "MatchOperator::is_default")]
    pub match_operator: MatchOperator,
}

impl KeyedMatcherSpec {
    pub fn new(name: impl Into<String>, matcher: MatcherSpec) -> Self {
        Self {
            name: name.into(),
            matchers: vec![matcher],
            ignore_case: false,
            reject_on_match: false,
            match_operator: MatchOperator::Or,
        }
    }

    pub fn present(name: impl Into<String>) -> Self {
        Self {
            matchers: Vec::new(),
            ..Self::new(name, MatcherSpec::not_null_or_empty())
        }
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
}

#[derive(Debug, Clone)]
pub struct KeyedMatcher {
    spec: KeyedMatcherSpec,
    matchers: Vec<ValueMatcher>,
}

impl KeyedMatcher {
    pub fn compile(spec: &KeyedMatcherSpec) -> Result<Self, MatcherError> {
        let matchers: Result<Vec<_>, _> = spec.matchers.iter().map(ValueMatcher::compile).collect();
        Ok(Self {
            spec: spec.clone(),
            matchers: matchers?,
        })
    }

    pub fn spec(&self) -> &KeyedMatcherSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Score against `values`; each matcher takes the best of the entry's values.
    pub fn score(&self, values: &MultiValueMap) -> MatchResult {
        let behaviour = MatchBehaviour::from_reject(self.spec.reject_on_match);

        let Some(found) = values.lookup(&self.spec.name, self.spec.ignore_case) else {
            return MatchResult::new(behaviour.apply(MatchScores::MISMATCH));
        };

        if self.matchers.is_empty() {
            return MatchResult::new(behaviour.apply(MatchScores::PERFECT));
        }

        let mut scores = Vec::with_capacity(self.matchers.len());
        for matcher in &self.matchers {
            let mut best = MatchScores::MISMATCH;
            for value in found {
                let result = matcher.score_text(Some(value));
                if let Some(fault) = result.fault {
                    return MatchResult::faulted(fault);
                }
                best = best.max(result.score);
            }
            scores.push(best);
        }

        MatchResult::new(behaviour.apply(self.spec.match_operator.aggregate(scores)))
    }
}
