//! Engine-wide behaviour switches.

use super::proxy::ProxyAndRecordSettings;
use crate::log::DEFAULT_MAX_ENTRIES;
use crate::matchers::MatchScores;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSettings {
    /// Fall back to the best partial match when nothing matches fully
    #[serde(default)]
    pub allow_partial_mapping: bool,

    /// Serialize request handling behind one global lock
    #[serde(default)]
    pub handle_requests_synchronously: bool,

    /// Oldest request log entries are dropped beyond this count
    #[serde(default = "default_max_request_log_count")]
    pub max_request_log_count: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_log_expiration_secs: Option<u64>,

    /// Lowest average score accepted as a full match
    #[serde(default = "default_almost_perfect_threshold")]
    pub almost_perfect_threshold: f64,

    /// Register the built-in `/__admin/health` mapping
    #[serde(default)]
    pub start_admin_interface: bool,

    /// Target directory for mappings saved by the proxy
    #[serde(default = "default_mappings_dir")]
    pub mappings_dir: PathBuf,

    /// Catch-all proxy registered at startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_and_record: Option<ProxyAndRecordSettings>,
}

fn default_almost_perfect_threshold() -> f64 {
    MatchScores::ALMOST_PERFECT
}

fn default_max_request_log_count() -> usize {
    DEFAULT_MAX_ENTRIES
}

fn default_mappings_dir() -> PathBuf {
    PathBuf::from("__admin/mappings")
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            allow_partial_mapping: false,
            handle_requests_synchronously: false,
            max_request_log_count: default_max_request_log_count(),
            request_log_expiration_secs: None,
            almost_perfect_threshold: default_almost_perfect_threshold(),
            start_admin_interface: false,
            mappings_dir: default_mappings_dir(),
            proxy_and_record: None,
        }
    }
}
