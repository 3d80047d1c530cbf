//! Process-scoped server context.
//!
//! [`MockServer`] owns everything a running mock needs: the mapping
//! registry, the scenario table, the request log, the settings and the
//! outbound client. It is built once at startup and handed to the hosting
//! layer behind an `Arc`; tests build as many independent instances as they
//! like.
//!
//! ## Module Structure
//!
//! - `handler` - `handle_request`: dispatch, response provision, scenario advance, logging
//! - `hosting` - hyper listener converting wire requests and applying faults

mod handler;
mod hosting;

#[cfg(test)]
mod tests;

pub use hosting::{serve, ServerHandle};

use crate::config::{ProxyAndRecordSettings, ServerSettings};
use crate::log::{LogEntry, RequestLog};
use crate::mapping::{
    Mapping, MappingError, MappingRegistry, ADMIN_PRIORITY, PROXY_CATCH_ALL_PRIORITY,
};
use crate::matchers::{MatcherSpec, RequestMatcher, RequestMatcherSpec};
use crate::message::ResponseMessage;
use crate::proxy::ProxyClient;
use crate::scenario::{ScenarioState, ScenarioStore};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use uuid::Uuid;

/// Path of the admin health mapping.
pub const HEALTH_PATH: &str = "/__admin/health";
/// Reserved for admin mappings; the proxy catch-all never forwards these.
const ADMIN_PATHS: &str = "/__admin/*";

/// Fixed GUID of the proxy catch-all so resets replace rather than duplicate it.
const PROXY_CATCH_ALL_GUID: Uuid = Uuid::from_u128(0x6d6f_636b_7769_7265_0000_0000_0000_0001);
const HEALTH_GUID: Uuid = Uuid::from_u128(0x6d6f_636b_7769_7265_0000_0000_0000_0002);

pub struct MockServer {
    registry: MappingRegistry,
    scenarios: ScenarioStore,
    log: RequestLog,
    settings: ServerSettings,
    client: Arc<dyn ProxyClient>,
    /// Serializes request handling when `handleRequestsSynchronously` is set
    sync_lock: Option<tokio::sync::Mutex<()>>,
}

impl MockServer {
    /// Build a server with no user mappings.
    ///
    /// Registers the proxy catch-all when the settings carry an upstream
    /// and the health mapping when the admin interface is enabled.
    pub fn new(settings: ServerSettings, client: Arc<dyn ProxyClient>) -> Result<Self, MappingError> {
        let server = Self {
            registry: MappingRegistry::new(),
            scenarios: ScenarioStore::new(),
            log: RequestLog::new(settings.max_request_log_count, settings.request_log_expiration_secs),
            sync_lock: settings
                .handle_requests_synchronously
                .then(|| tokio::sync::Mutex::new(())),
            settings,
            client,
        };
        server.register_builtin_mappings()?;
        Ok(server)
    }

    fn register_builtin_mappings(&self) -> Result<(), MappingError> {
        if let Some(proxy) = &self.settings.proxy_and_record {
            self.registry.upsert(proxy_catch_all(proxy)?)?;
            info!("Proxying unmatched requests to {}", proxy.url);
        }
        if self.settings.start_admin_interface {
            self.registry.upsert(health_mapping()?)?;
        }
        Ok(())
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub(crate) fn client(&self) -> &Arc<dyn ProxyClient> {
        &self.client
    }

    // ===== Mappings =====

    /// All mappings in dispatch order.
    pub fn mappings(&self) -> Vec<Arc<Mapping>> {
        self.registry.snapshot().to_vec()
    }

    pub fn mapping(&self, guid: &Uuid) -> Option<Arc<Mapping>> {
        self.registry.get(guid)
    }

    /// Register or replace a mapping by GUID.
    pub fn add_or_update_mapping(&self, mapping: Mapping) -> Result<Arc<Mapping>, MappingError> {
        if mapping.is_start_state() {
            if let Some(scenario) = &mapping.scenario {
                self.scenarios.ensure(scenario);
            }
        }
        self.registry.upsert(mapping)
    }

    pub fn delete_mapping(&self, guid: &Uuid) -> Option<Arc<Mapping>> {
        self.registry.remove(guid)
    }

    pub fn delete_mappings_by_path(&self, path: &str) -> Vec<Arc<Mapping>> {
        self.registry.remove_by_path(path)
    }

    /// Drop user mappings; built-in ones are registered again.
    pub fn reset_mappings(&self) -> Result<(), MappingError> {
        self.registry.reset();
        self.register_builtin_mappings()
    }

    // ===== Scenarios =====

    pub fn scenarios(&self) -> Vec<ScenarioState> {
        self.scenarios.all()
    }

    pub fn scenario(&self, name: &str) -> Option<ScenarioState> {
        self.scenarios.get(name)
    }

    pub fn reset_scenarios(&self) {
        self.scenarios.reset();
    }

    pub fn reset_scenario(&self, name: &str) -> bool {
        self.scenarios.reset_scenario(name)
    }

    pub fn set_scenario_state(&self, name: &str, state: Option<&str>) {
        self.scenarios.set_state(name, state);
    }

    // ===== Request log =====

    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.log.entries()
    }

    pub fn find_log_entries(&self, spec: &RequestMatcherSpec) -> Result<Vec<LogEntry>, MappingError> {
        let matcher = RequestMatcher::compile(spec)?;
        Ok(self.log.find(&matcher))
    }

    pub fn reset_log(&self) {
        self.log.reset();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.log.subscribe()
    }

    /// Reset mappings, scenarios and the request log.
    pub fn reset(&self) -> Result<(), MappingError> {
        self.reset_mappings()?;
        self.reset_scenarios();
        self.reset_log();
        Ok(())
    }
}

fn proxy_catch_all(settings: &ProxyAndRecordSettings) -> Result<Mapping, MappingError> {
    Mapping::builder()
        .with_guid(PROXY_CATCH_ALL_GUID)
        .with_title("Proxy catch-all")
        .at_priority(PROXY_CATCH_ALL_PRIORITY)
        .given(
            RequestMatcherSpec::new()
                .with_path(MatcherSpec::wildcard(ADMIN_PATHS).reject_on_match()),
        )
        .proxy_to(settings.clone())
        .build()
}

fn health_mapping() -> Result<Mapping, MappingError> {
    Mapping::builder()
        .with_guid(HEALTH_GUID)
        .with_title("Admin health")
        .at_priority(ADMIN_PRIORITY)
        .given(
            RequestMatcherSpec::new()
                .with_path(MatcherSpec::exact(HEALTH_PATH))
                .using_method("GET"),
        )
        .respond_with(ResponseMessage::ok().with_json(json!({"status": "healthy"})))
        .as_admin_interface()
        .without_logging()
        .build()
}
