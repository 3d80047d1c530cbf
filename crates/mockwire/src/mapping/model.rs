//! Persisted mapping format.
//!
//! ```json
//! {
//!   "guid": "8e6a3a54-7f1c-4b8e-9a4c-2f1e5d6c7b8a",
//!   "priority": 5,
//!   "scenario": "checkout",
//!   "whenStateIs": "Paid",
//!   "setStateTo": "Shipped",
//!   "request": { "path": { "name": "ExactMatcher", "pattern": "/ship" } },
//!   "response": { "status": 202 }
//! }
//! ```
//!
//! A mapping carries either `response` (static) or `proxy`. Dynamic
//! providers exist only in memory.

use super::types::{Mapping, MappingError, ResponseProvider, DEFAULT_PRIORITY};
use crate::config::ProxyAndRecordSettings;
use crate::matchers::{is_false, RequestMatcher, RequestMatcherSpec};
use crate::message::ResponseMessage;
use crate::webhook::Webhook;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingModel {
    #[serde(default = "Uuid::new_v4")]
    pub guid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when_state_is: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_state_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub times_in_same_state: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    #[serde(default)]
    pub request: RequestMatcherSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyAndRecordSettings>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub webhooks: Vec<Webhook>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub use_webhooks_fire_and_forget: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disable_logging: bool,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

impl TryFrom<MappingModel> for Mapping {
    type Error = MappingError;

    fn try_from(model: MappingModel) -> Result<Self, Self::Error> {
        let provider = match (model.response, model.proxy) {
            (Some(response), None) => ResponseProvider::Static(response),
            (None, Some(proxy)) => ResponseProvider::Proxy(proxy),
            (None, None) => return Err(MappingError::MissingResponse),
            (Some(_), Some(_)) => return Err(MappingError::ConflictingResponse),
        };
        let now = Utc::now();

        let mapping = Mapping {
            guid: model.guid,
            title: model.title,
            description: model.description,
            priority: model.priority,
            request_matcher: RequestMatcher::compile(&model.request)?,
            provider,
            scenario: model.scenario,
            execution_condition_state: model.when_state_is,
            next_state: model.set_state_to,
            times_in_same_state: model.times_in_same_state,
            probability: model.probability,
            webhooks: model.webhooks,
            webhooks_fire_and_forget: model.use_webhooks_fire_and_forget,
            log_mapping: !model.disable_logging,
            is_admin_interface: false,
            created_at: now,
            updated_at: now,
        };
        mapping.validate()?;
        Ok(mapping)
    }
}

impl Mapping {
    /// Persisted form; fails for dynamic providers.
    pub fn to_model(&self) -> Result<MappingModel, MappingError> {
        let (response, proxy) = match &self.provider {
            ResponseProvider::Static(response) => (Some(response.clone()), None),
            ResponseProvider::Proxy(settings) => (None, Some(settings.clone())),
            ResponseProvider::Dynamic(_) => return Err(MappingError::NotSerializable(self.guid)),
        };

        Ok(MappingModel {
            guid: self.guid,
            title: self.title.clone(),
            description: self.description.clone(),
            priority: self.priority,
            scenario: self.scenario.clone(),
            when_state_is: self.execution_condition_state.clone(),
            set_state_to: self.next_state.clone(),
            times_in_same_state: self.times_in_same_state,
            probability: self.probability,
            request: self.request_matcher.spec().clone(),
            response,
            proxy,
            webhooks: self.webhooks.clone(),
            use_webhooks_fire_and_forget: self.webhooks_fire_and_forget,
            disable_logging: !self.log_mapping,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchers::{KeyedMatcherSpec, MatcherSpec, MatchOperator};
    use crate::message::{BodyData, RequestMessage};
    use crate::scenario::ScenarioStore;
    use serde_json::json;

    fn corpus() -> Vec<RequestMessage> {
        vec![
            RequestMessage::new("GET", "/api/users/7?expand=roles"),
            RequestMessage::new("POST", "/api/users")
                .with_header("Content-Type", "application/json")
                .with_body(BodyData::from_json(json!({"name": "ann", "admin": false}))),
            RequestMessage::new("POST", "/api/users")
                .with_header("X-Tenant", "blue")
                .with_body(BodyData::from_json(json!({"name": "bob"}))),
            RequestMessage::new("DELETE", "/api/users/7").with_header("Cookie", "sid=abc"),
            RequestMessage::new("GET", "/other"),
        ]
    }

    #[test]
    fn test_round_trip_scores_identically() {
        let original = Mapping::builder()
            .with_title("create user")
            .at_priority(3)
            .given(
                RequestMatcherSpec::new()
                    .with_path(MatcherSpec::wildcard("/api/users*"))
                    .using_methods(&["POST", "delete"])
                    .with_header_spec(
                        KeyedMatcherSpec::new("X-Tenant", MatcherSpec::exact("blue"))
                            .ignore_case()
                            .reject_on_match(),
                    )
                    .with_body(
                        MatcherSpec::json_partial(json!({"name": "ann"}))
                            .with_operator(MatchOperator::Or),
                    ),
            )
            .in_scenario("users")
            .when_state_is("open")
            .will_set_state_to("closed")
            .times(2)
            .with_probability(0.4)
            .respond_with(ResponseMessage::new(201).with_json(json!({"id": 7})))
            .build()
            .unwrap();

        let json = serde_json::to_string_pretty(&original.to_model().unwrap()).unwrap();
        let model: MappingModel = serde_json::from_str(&json).unwrap();
        let restored = Mapping::try_from(model).unwrap();

        let scenarios = ScenarioStore::new();
        scenarios.set_state("users", Some("open"));
        for request in corpus() {
            assert_eq!(
                original.score(&request, &scenarios),
                restored.score(&request, &scenarios),
                "{} {}",
                request.method,
                request.url
            );
        }
        assert_eq!(restored.to_model().unwrap(), original.to_model().unwrap());
    }

    #[test]
    fn test_dynamic_provider_is_not_serializable() {
        let mapping = Mapping::builder()
            .respond_with_dynamic(|_: &RequestMessage| ResponseMessage::ok())
            .build()
            .unwrap();
        assert_eq!(
            mapping.to_model().unwrap_err(),
            MappingError::NotSerializable(mapping.guid)
        );
    }

    #[test]
    fn test_proxy_model() {
        let json = r#"{"request": {"path": {"name": "WildcardMatcher", "pattern": "/*"}},
                       "proxy": {"url": "http://upstream:8080", "saveMapping": true}}"#;
        let model: MappingModel = serde_json::from_str(json).unwrap();
        let mapping = Mapping::try_from(model).unwrap();
        assert!(mapping.is_proxy());
        assert_eq!(mapping.priority, DEFAULT_PRIORITY);
    }

    #[test]
    fn test_invalid_proxy_settings_are_rejected() {
        let cases = [
            r#"{"proxy": {"url": "upstream:8080"}}"#,
            r#"{"proxy": {"url": "/relative"}}"#,
            r#"{"proxy": {"url": "http://upstream",
                          "saveMappingSettings": {"statusCodePattern": {"value": "é5"}}}}"#,
        ];
        for json in cases {
            let model: MappingModel = serde_json::from_str(json).unwrap();
            assert!(
                matches!(Mapping::try_from(model), Err(MappingError::InvalidProxy(_))),
                "{json}"
            );
        }
    }

    #[test]
    fn test_nan_fault_percentage_is_rejected() {
        let yaml = "response:\n  fault:\n    type: EMPTY_RESPONSE\n    percentage: .nan\n";
        let model: MappingModel = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            Mapping::try_from(model),
            Err(MappingError::InvalidFaultPercentage(p)) if p.is_nan()
        ));
    }

    #[test]
    fn test_response_and_proxy_conflict() {
        let json = r#"{"response": {}, "proxy": {"url": "http://upstream"}}"#;
        let model: MappingModel = serde_json::from_str(json).unwrap();
        assert_eq!(
            Mapping::try_from(model).unwrap_err(),
            MappingError::ConflictingResponse
        );
    }
}
