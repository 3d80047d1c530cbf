//! Mapping data model.

use crate::config::ProxyAndRecordSettings;
use crate::matchers::{
    Facet, MatchScores, MatchResult, MatcherError, RequestMatchResult, RequestMatcher,
};
use crate::message::{RequestMessage, ResponseMessage};
use crate::scenario::{ScenarioStore, Transition};
use crate::webhook::Webhook;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Priority of mappings that do not declare one.
pub const DEFAULT_PRIORITY: i32 = 0;
/// Band for mappings synthesized by the proxy recorder.
pub const SYNTHESIZED_PRIORITY: i32 = 1_000_000;
/// Catch-all proxy mapping registered from the server settings.
pub const PROXY_CATCH_ALL_PRIORITY: i32 = i32::MAX - 1;
/// Reserved for infrastructure (admin interface) mappings.
pub const ADMIN_PRIORITY: i32 = i32::MAX;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MappingError {
    #[error(transparent)]
    Matcher(#[from] MatcherError),

    #[error("scenario state fields require a scenario name")]
    StateWithoutScenario,

    #[error("timesInSameState must be at least 1")]
    InvalidRepeatCount,

    #[error("probability must be within [0, 1], got {0}")]
    InvalidProbability(f64),

    #[error("fault percentage must be within [0, 1], got {0}")]
    InvalidFaultPercentage(f64),

    #[error("invalid proxy settings: {0}")]
    InvalidProxy(String),

    #[error("mapping has no response provider")]
    MissingResponse,

    #[error("mapping declares both a static response and a proxy")]
    ConflictingResponse,

    #[error("priority {0} is reserved for admin interface mappings")]
    ReservedPriority(i32),

    #[error("mapping {0} has a dynamic response provider and cannot be serialized")]
    NotSerializable(Uuid),
}

/// Callback that builds a response at request time.
///
/// Any `Fn(&RequestMessage) -> ResponseMessage` closure implements it.
#[async_trait]
pub trait Respond: Send + Sync {
    async fn respond(&self, request: &RequestMessage) -> ResponseMessage;
}

#[async_trait]
impl<F> Respond for F
where
    F: Fn(&RequestMessage) -> ResponseMessage + Send + Sync,
{
    async fn respond(&self, request: &RequestMessage) -> ResponseMessage {
        self(request)
    }
}

/// How a mapping produces its response.
#[derive(Clone)]
pub enum ResponseProvider {
    Static(ResponseMessage),
    Dynamic(Arc<dyn Respond>),
    Proxy(ProxyAndRecordSettings),
}

impl ResponseProvider {
    pub fn is_proxy(&self) -> bool {
        matches!(self, ResponseProvider::Proxy(_))
    }
}

impl fmt::Debug for ResponseProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseProvider::Static(response) => f.debug_tuple("Static").field(response).finish(),
            ResponseProvider::Dynamic(_) => f.write_str("Dynamic(..)"),
            ResponseProvider::Proxy(settings) => f.debug_tuple("Proxy").field(settings).finish(),
        }
    }
}

/// A rule binding a request matcher to a response provider.
///
/// Mappings are immutable once registered; updates replace the whole value.
#[derive(Debug, Clone)]
pub struct Mapping {
    pub guid: Uuid,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Lower sorts first
    pub priority: i32,
    pub request_matcher: RequestMatcher,
    pub provider: ResponseProvider,
    pub scenario: Option<String>,
    /// Required scenario state; `None` marks a start-state mapping
    pub execution_condition_state: Option<String>,
    pub next_state: Option<String>,
    /// Matches required before moving to `next_state`
    pub times_in_same_state: Option<u32>,
    pub probability: Option<f64>,
    pub webhooks: Vec<Webhook>,
    pub webhooks_fire_and_forget: bool,
    pub log_mapping: bool,
    pub is_admin_interface: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Mapping {
    /// Participates in a scenario and may fire before it has started.
    pub fn is_start_state(&self) -> bool {
        self.scenario.is_some() && self.execution_condition_state.is_none()
    }

    pub fn is_proxy(&self) -> bool {
        self.provider.is_proxy()
    }

    /// Text of the first path pattern, if the mapping matches on path.
    pub fn path(&self) -> Option<&str> {
        self.request_matcher.spec().path.as_ref()?.first_text()
    }

    /// Check construction-time invariants.
    pub fn validate(&self) -> Result<(), MappingError> {
        let declares_state = self.execution_condition_state.is_some()
            || self.next_state.is_some()
            || self.times_in_same_state.is_some();
        if declares_state && self.scenario.is_none() {
            return Err(MappingError::StateWithoutScenario);
        }
        if self.times_in_same_state == Some(0) {
            return Err(MappingError::InvalidRepeatCount);
        }
        if let Some(p) = self.probability {
            if !(0.0..=1.0).contains(&p) {
                return Err(MappingError::InvalidProbability(p));
            }
        }
        match &self.provider {
            ResponseProvider::Static(response) => {
                if let Some(p) = response.fault.as_ref().and_then(|f| f.percentage) {
                    if !(0.0..=1.0).contains(&p) {
                        return Err(MappingError::InvalidFaultPercentage(p));
                    }
                }
            }
            ResponseProvider::Proxy(settings) => {
                settings
                    .validate()
                    .map_err(|e| MappingError::InvalidProxy(e.to_string()))?;
            }
            ResponseProvider::Dynamic(_) => {}
        }
        if self.priority == ADMIN_PRIORITY && !self.is_admin_interface {
            return Err(MappingError::ReservedPriority(self.priority));
        }
        Ok(())
    }

    /// Score the mapping against `request`.
    ///
    /// Mappings in a scenario get one extra facet: whether the scenario is
    /// currently in the state the mapping requires.
    pub fn score(&self, request: &RequestMessage, scenarios: &ScenarioStore) -> RequestMatchResult {
        let mut result = self.request_matcher.score(request);
        if let Some(scenario) = &self.scenario {
            let current = scenarios.current_state(scenario);
            let eligible = current.as_deref() == self.execution_condition_state.as_deref();
            result.add(Facet::Scenario, MatchResult::new(MatchScores::from_bool(eligible)));
        }
        result
    }

    /// Scenario transition to apply after this mapping was selected.
    pub fn transition(&self) -> Option<Transition<'_>> {
        self.scenario.as_deref().map(|scenario| Transition {
            scenario,
            expected: self.execution_condition_state.as_deref(),
            next: self.next_state.as_deref(),
            times: self.times_in_same_state,
        })
    }

    /// Title if set, otherwise the GUID.
    pub fn display_name(&self) -> String {
        self.title.clone().unwrap_or_else(|| self.guid.to_string())
    }
}
