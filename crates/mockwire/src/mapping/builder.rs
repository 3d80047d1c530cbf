//! Fluent mapping construction.
//!
//! ```ignore
//! let mapping = Mapping::builder()
//!     .with_title("get user")
//!     .given(RequestMatcherSpec::new().with_path(MatcherSpec::exact("/users/1")).using_method("GET"))
//!     .in_scenario("signup")
//!     .will_set_state_to("registered")
//!     .respond_with(ResponseMessage::ok().with_json(json!({"id": 1})))
//!     .build()?;
//! ```

use super::types::{Mapping, MappingError, Respond, ResponseProvider, DEFAULT_PRIORITY};
use crate::config::ProxyAndRecordSettings;
use crate::matchers::{RequestMatcher, RequestMatcherSpec};
use crate::message::ResponseMessage;
use crate::webhook::Webhook;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

impl Mapping {
    pub fn builder() -> MappingBuilder {
        MappingBuilder::default()
    }
}

#[derive(Default)]
pub struct MappingBuilder {
    guid: Option<Uuid>,
    title: Option<String>,
    description: Option<String>,
    priority: Option<i32>,
    request: RequestMatcherSpec,
    provider: Option<ResponseProvider>,
    scenario: Option<String>,
    when_state_is: Option<String>,
    set_state_to: Option<String>,
    times: Option<u32>,
    probability: Option<f64>,
    webhooks: Vec<Webhook>,
    webhooks_fire_and_forget: bool,
    disable_logging: bool,
    admin_interface: bool,
}

impl MappingBuilder {
    pub fn with_guid(mut self, guid: Uuid) -> Self {
        self.guid = Some(guid);
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn at_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn given(mut self, request: RequestMatcherSpec) -> Self {
        self.request = request;
        self
    }

    pub fn in_scenario(mut self, scenario: impl Into<String>) -> Self {
        self.scenario = Some(scenario.into());
        self
    }

    pub fn when_state_is(mut self, state: impl Into<String>) -> Self {
        self.when_state_is = Some(state.into());
        self
    }

    pub fn will_set_state_to(mut self, state: impl Into<String>) -> Self {
        self.set_state_to = Some(state.into());
        self
    }

    /// Matches needed in the current state before the transition applies.
    pub fn times(mut self, times: u32) -> Self {
        self.times = Some(times);
        self
    }

    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = Some(probability);
        self
    }

    pub fn with_webhook(mut self, webhook: Webhook) -> Self {
        self.webhooks.push(webhook);
        self
    }

    pub fn webhooks_fire_and_forget(mut self) -> Self {
        self.webhooks_fire_and_forget = true;
        self
    }

    pub fn without_logging(mut self) -> Self {
        self.disable_logging = true;
        self
    }

    pub fn as_admin_interface(mut self) -> Self {
        self.admin_interface = true;
        self
    }

    pub fn respond_with(mut self, response: ResponseMessage) -> Self {
        self.provider = Some(ResponseProvider::Static(response));
        self
    }

    pub fn respond_with_dynamic<R: Respond + 'static>(mut self, responder: R) -> Self {
        self.provider = Some(ResponseProvider::Dynamic(Arc::new(responder)));
        self
    }

    pub fn proxy_to(mut self, settings: ProxyAndRecordSettings) -> Self {
        self.provider = Some(ResponseProvider::Proxy(settings));
        self
    }

    /// Compile the matchers and check the mapping's invariants.
    pub fn build(self) -> Result<Mapping, MappingError> {
        let provider = self.provider.ok_or(MappingError::MissingResponse)?;
        let request_matcher = RequestMatcher::compile(&self.request)?;
        let now = Utc::now();

        let mapping = Mapping {
            guid: self.guid.unwrap_or_else(Uuid::new_v4),
            title: self.title,
            description: self.description,
            priority: self.priority.unwrap_or(DEFAULT_PRIORITY),
            request_matcher,
            provider,
            scenario: self.scenario,
            execution_condition_state: self.when_state_is,
            next_state: self.set_state_to,
            times_in_same_state: self.times,
            probability: self.probability,
            webhooks: self.webhooks,
            webhooks_fire_and_forget: self.webhooks_fire_and_forget,
            log_mapping: !self.disable_logging,
            is_admin_interface: self.admin_interface,
            created_at: now,
            updated_at: now,
        };
        mapping.validate()?;
        Ok(mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::ADMIN_PRIORITY;
    use crate::matchers::{MatcherError, MatcherSpec};
    use crate::message::{FaultType, RequestMessage};

    #[test]
    fn test_build_defaults() {
        let mapping = Mapping::builder()
            .given(RequestMatcherSpec::new().with_path(MatcherSpec::exact("/a")))
            .respond_with(ResponseMessage::ok())
            .build()
            .unwrap();

        assert_eq!(mapping.priority, DEFAULT_PRIORITY);
        assert!(mapping.log_mapping);
        assert!(!mapping.is_admin_interface);
        assert!(!mapping.is_start_state());
        assert_eq!(mapping.path(), Some("/a"));
    }

    #[test]
    fn test_state_without_scenario_is_rejected() {
        let err = Mapping::builder()
            .will_set_state_to("next")
            .respond_with(ResponseMessage::ok())
            .build()
            .unwrap_err();
        assert_eq!(err, MappingError::StateWithoutScenario);
    }

    #[test]
    fn test_zero_repeat_count_is_rejected() {
        let err = Mapping::builder()
            .in_scenario("s")
            .times(0)
            .respond_with(ResponseMessage::ok())
            .build()
            .unwrap_err();
        assert_eq!(err, MappingError::InvalidRepeatCount);
    }

    #[test]
    fn test_probability_range() {
        let err = Mapping::builder()
            .with_probability(1.5)
            .respond_with(ResponseMessage::ok())
            .build()
            .unwrap_err();
        assert_eq!(err, MappingError::InvalidProbability(1.5));
    }

    #[test]
    fn test_fault_percentage_range() {
        for percentage in [f64::NAN, -0.1, 1.5] {
            let err = Mapping::builder()
                .respond_with(
                    ResponseMessage::ok().with_fault(FaultType::EmptyResponse, Some(percentage)),
                )
                .build()
                .unwrap_err();
            assert!(matches!(err, MappingError::InvalidFaultPercentage(_)));
        }

        assert!(Mapping::builder()
            .respond_with(ResponseMessage::ok().with_fault(FaultType::EmptyResponse, Some(0.25)))
            .build()
            .is_ok());
    }

    #[test]
    fn test_missing_response() {
        assert_eq!(
            Mapping::builder().build().unwrap_err(),
            MappingError::MissingResponse
        );
    }

    #[test]
    fn test_admin_priority_is_reserved() {
        let err = Mapping::builder()
            .at_priority(ADMIN_PRIORITY)
            .respond_with(ResponseMessage::ok())
            .build()
            .unwrap_err();
        assert_eq!(err, MappingError::ReservedPriority(ADMIN_PRIORITY));

        assert!(Mapping::builder()
            .at_priority(ADMIN_PRIORITY)
            .as_admin_interface()
            .respond_with(ResponseMessage::ok())
            .build()
            .is_ok());
    }

    #[test]
    fn test_invalid_regex_surfaces_matcher_error() {
        let err = Mapping::builder()
            .given(RequestMatcherSpec::new().with_path(MatcherSpec::regex("(")))
            .respond_with(ResponseMessage::ok())
            .build()
            .unwrap_err();
        assert!(matches!(err, MappingError::Matcher(MatcherError::InvalidRegex { .. })));
    }

    #[tokio::test]
    async fn test_dynamic_closure_provider() {
        let mapping = Mapping::builder()
            .respond_with_dynamic(|req: &RequestMessage| {
                ResponseMessage::ok().with_body_string(format!("hello {}", req.path))
            })
            .build()
            .unwrap();

        let ResponseProvider::Dynamic(responder) = &mapping.provider else {
            panic!("expected dynamic provider");
        };
        let response = responder.respond(&RequestMessage::new("GET", "/bob")).await;
        assert_eq!(response.body.as_text().unwrap(), "hello /bob");
    }
}
