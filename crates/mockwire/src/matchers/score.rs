//! Graded match scores and their aggregation.

use super::error::MatcherError;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Score constants shared by every matcher.
pub struct MatchScores;

impl MatchScores {
    pub const MISMATCH: f64 = 0.0;
    pub const PERFECT: f64 = 1.0;
    /// Default lower bound for a full match
    pub const ALMOST_PERFECT: f64 = 0.99;
    pub const TOLERANCE: f64 = 1e-6;

    #[inline]
    pub fn is_perfect(score: f64) -> bool {
        (score - Self::PERFECT).abs() < Self::TOLERANCE
    }

    #[inline]
    pub fn is_mismatch(score: f64) -> bool {
        score.abs() < Self::TOLERANCE
    }

    #[inline]
    pub fn from_bool(matched: bool) -> f64 {
        if matched {
            Self::PERFECT
        } else {
            Self::MISMATCH
        }
    }
}

/// How the scores of several patterns on one facet combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MatchOperator {
    /// Best score wins
    #[default]
    Or,
    /// Worst score wins, so one miss fails the facet
    And,
    Average,
}

impl MatchOperator {
    /// Combine scores; no scores at all is a mismatch.
    pub fn aggregate<I>(&self, scores: I) -> f64
    where
        I: IntoIterator<Item = f64>,
    {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::MAX;
        let mut max = f64::MIN;
        for score in scores {
            count += 1;
            sum += score;
            min = min.min(score);
            max = max.max(score);
        }

        if count == 0 {
            return MatchScores::MISMATCH;
        }

        match self {
            MatchOperator::Or => max,
            MatchOperator::And => min,
            MatchOperator::Average => sum / count as f64,
        }
    }

    pub(crate) fn is_default(&self) -> bool {
        *self == MatchOperator::Or
    }
}

/// Accept-on-match or reject-on-match, applied after aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MatchBehaviour {
    #[default]
    AcceptOnMatch,
    RejectOnMatch,
}

impl MatchBehaviour {
    pub fn from_reject(reject_on_match: bool) -> Self {
        if reject_on_match {
            MatchBehaviour::RejectOnMatch
        } else {
            MatchBehaviour::AcceptOnMatch
        }
    }

    /// Reject-on-match turns a mismatch into a perfect score and anything
    /// that matched, even partially, into a mismatch.
    pub fn apply(&self, score: f64) -> f64 {
        match self {
            MatchBehaviour::AcceptOnMatch => score,
            MatchBehaviour::RejectOnMatch => {
                MatchScores::from_bool(MatchScores::is_mismatch(score))
            }
        }
    }
}

/// Score of one matcher plus the fault it raised, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub score: f64,
    pub fault: Option<MatcherError>,
}

impl MatchResult {
    pub fn new(score: f64) -> Self {
        Self { score, fault: None }
    }

    pub fn perfect() -> Self {
        Self::new(MatchScores::PERFECT)
    }

    pub fn mismatch() -> Self {
        Self::new(MatchScores::MISMATCH)
    }

    /// A fault always scores as a mismatch, whatever the behaviour.
    pub fn faulted(fault: MatcherError) -> Self {
        Self {
            score: MatchScores::MISMATCH,
            fault: Some(fault),
        }
    }

    pub fn is_perfect(&self) -> bool {
        MatchScores::is_perfect(self.score)
    }
}

/// Request facet a score belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Facet {
    Method,
    Path,
    Url,
    Header(String),
    Cookie(String),
    Param(String),
    ClientIp,
    Body,
    GraphQl,
    ProtoBuf,
    Multipart,
    HttpVersion,
    Scenario,
}

impl fmt::Display for Facet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Facet::Method => write!(f, "method"),
            Facet::Path => write!(f, "path"),
            Facet::Url => write!(f, "url"),
            Facet::Header(name) => write!(f, "header:{name}"),
            Facet::Cookie(name) => write!(f, "cookie:{name}"),
            Facet::Param(name) => write!(f, "param:{name}"),
            Facet::ClientIp => write!(f, "clientIp"),
            Facet::Body => write!(f, "body"),
            Facet::GraphQl => write!(f, "graphql"),
            Facet::ProtoBuf => write!(f, "protobuf"),
            Facet::Multipart => write!(f, "multipart"),
            Facet::HttpVersion => write!(f, "httpVersion"),
            Facet::Scenario => write!(f, "scenario"),
        }
    }
}

impl Serialize for Facet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn serialize_fault<S: Serializer>(
    fault: &Option<MatcherError>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match fault {
        Some(fault) => serializer.collect_str(fault),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDetail {
    pub facet: Facet,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_fault")]
    pub fault: Option<MatcherError>,
}

/// Per-facet scores for one mapping against one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMatchResult {
    pub details: Vec<MatchDetail>,
}

impl RequestMatchResult {
    pub fn add(&mut self, facet: Facet, result: MatchResult) {
        self.details.push(MatchDetail {
            facet,
            score: result.score,
            fault: result.fault,
        });
    }

    pub fn total_score(&self) -> f64 {
        self.details.iter().map(|d| d.score).sum()
    }

    pub fn total_number(&self) -> usize {
        self.details.len()
    }

    /// Mean of the per-facet scores; zero when nothing was scored.
    pub fn average_total_score(&self) -> f64 {
        if self.details.is_empty() {
            MatchScores::MISMATCH
        } else {
            self.total_score() / self.details.len() as f64
        }
    }

    pub fn is_perfect_match(&self) -> bool {
        MatchScores::is_perfect(self.average_total_score())
    }

    /// True when at least one scored facet did not match at all.
    pub fn has_unmatched_facet(&self) -> bool {
        self.details.iter().any(|d| MatchScores::is_mismatch(d.score))
    }

    pub fn faults(&self) -> impl Iterator<Item = (&Facet, &MatcherError)> {
        self.details
            .iter()
            .filter_map(|d| d.fault.as_ref().map(|f| (&d.facet, f)))
    }
}
