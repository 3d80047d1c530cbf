//! Multipart body matcher.

use super::error::MatcherError;
use super::is_false;
use super::score::{MatchBehaviour, MatchOperator, MatchResult, MatchScores};
use super::value_matcher::{MatcherSpec, ValueMatcher};
use crate::message::{BodyData, BodyValue, MultipartPart};
use serde::{Deserialize, Serialize};

/// Conditions on a single MIME part. Every configured condition must hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MimePartMatcherSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<MatcherSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<MatcherSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_transfer_encoding: Option<MatcherSpec>,
    /// Applied to the part body with the usual body rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MatcherSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartMatcherSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<MimePartMatcherSpec>,
    #[serde(default, skip_serializing_if = "MatchOperator::is_default")]
    pub match_operator: MatchOperator,
    #[serde(default, skip_serializing_if = "is_false")]
    pub reject_on_match: bool,
}

#[derive(Debug, Clone)]
struct MimePartMatcher {
    content_type: Option<ValueMatcher>,
    content_disposition: Option<ValueMatcher>,
    content_transfer_encoding: Option<ValueMatcher>,
    content: Option<ValueMatcher>,
}

impl MimePartMatcher {
    fn compile(spec: &MimePartMatcherSpec) -> Result<Self, MatcherError> {
        let compile = |m: &Option<MatcherSpec>| m.as_ref().map(ValueMatcher::compile).transpose();
        Ok(Self {
            content_type: compile(&spec.content_type)?,
            content_disposition: compile(&spec.content_disposition)?,
            content_transfer_encoding: compile(&spec.content_transfer_encoding)?,
            content: compile(&spec.content)?,
        })
    }

    fn score(&self, part: &MultipartPart) -> MatchResult {
        let mut results = Vec::with_capacity(4);
        if let Some(m) = &self.content_type {
            results.push(m.score_text(part.content_type.as_deref()));
        }
        if let Some(m) = &self.content_disposition {
            results.push(m.score_text(part.content_disposition.as_deref()));
        }
        if let Some(m) = &self.content_transfer_encoding {
            results.push(m.score_text(part.content_transfer_encoding.as_deref()));
        }
        if let Some(m) = &self.content {
            results.push(m.score_body(&part.body));
        }

        let mut scores = Vec::with_capacity(results.len());
        for result in results {
            if let Some(fault) = result.fault {
                return MatchResult::faulted(fault);
            }
            scores.push(result.score);
        }
        if scores.is_empty() {
            return MatchResult::perfect();
        }
        MatchResult::new(MatchOperator::And.aggregate(scores))
    }
}

#[derive(Debug, Clone)]
pub struct MultipartMatcher {
    spec: MultipartMatcherSpec,
    parts: Vec<MimePartMatcher>,
}

impl MultipartMatcher {
    pub fn compile(spec: &MultipartMatcherSpec) -> Result<Self, MatcherError> {
        let parts: Result<Vec<_>, _> = spec.parts.iter().map(MimePartMatcher::compile).collect();
        Ok(Self {
            spec: spec.clone(),
            parts: parts?,
        })
    }

    pub fn spec(&self) -> &MultipartMatcherSpec {
        &self.spec
    }

    /// Each part matcher takes its best score over the body's parts.
    ///
    /// A fault on one part only disqualifies that part; it is reported when no
    /// part matched at all.
    pub fn score(&self, body: &BodyData) -> MatchResult {
        let behaviour = MatchBehaviour::from_reject(self.spec.reject_on_match);

        let parts = match &body.value {
            BodyValue::MultiPart(parts) => parts,
            BodyValue::None => return MatchResult::new(behaviour.apply(MatchScores::MISMATCH)),
            _ => {
                return MatchResult::faulted(MatcherError::UnsupportedBody {
                    matcher: "MultipartMatcher",
                    body_type: body.body_type(),
                })
            }
        };

        if self.parts.is_empty() {
            return MatchResult::new(behaviour.apply(MatchScores::PERFECT));
        }

        let mut scores = Vec::with_capacity(self.parts.len());
        for matcher in &self.parts {
            let mut best = MatchScores::MISMATCH;
            let mut last_fault = None;
            for part in parts {
                let result = matcher.score(part);
                match result.fault {
                    Some(fault) => last_fault = Some(fault),
                    None => best = best.max(result.score),
                }
            }
            if MatchScores::is_mismatch(best) {
                if let Some(fault) = last_fault {
                    return MatchResult::faulted(fault);
                }
            }
            scores.push(best);
        }

        MatchResult::new(behaviour.apply(self.spec.match_operator.aggregate(scores)))
    }
}
