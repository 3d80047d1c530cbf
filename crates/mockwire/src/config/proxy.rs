//! Proxy & record settings.

use crate::matchers::MatchBehaviour;
use crate::proxy::{ProxyError, StatusCodePattern};
use hyper::Uri;
use serde::{Deserialize, Serialize};

/// Forward matched requests to a real upstream and optionally capture the
/// exchange as a new mapping.
///
/// ```yaml
/// url: https://api.example.com
/// saveMapping: true
/// saveMappingSettings:
///   statusCodePattern:
///     value: 2xx
///   httpMethods:
///     value: [GET, POST]
/// excludedHeaders: [Authorization]
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyAndRecordSettings {
    /// Upstream base URL
    pub url: String,

    /// Register synthesized mappings in the running server
    #[serde(default)]
    pub save_mapping: bool,

    /// Write synthesized mappings to the mappings directory
    #[serde(default)]
    pub save_mapping_to_file: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_mapping_settings: Option<ProxySaveMappingSettings>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_headers: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_cookies: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_params: Vec<String>,

    /// Reuse the proxy mapping's own request matcher for synthesized mappings
    #[serde(default)]
    pub use_defined_request_matchers: bool,

    #[serde(default)]
    pub append_guid_to_saved_mapping_file: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix_for_saved_mapping_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_settings: Option<ProxyUrlReplaceSettings>,
}

impl ProxyAndRecordSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            save_mapping: false,
            save_mapping_to_file: false,
            save_mapping_settings: None,
            excluded_headers: Vec::new(),
            excluded_cookies: Vec::new(),
            excluded_params: Vec::new(),
            use_defined_request_matchers: false,
            append_guid_to_saved_mapping_file: false,
            prefix_for_saved_mapping_file: None,
            replace_settings: None,
        }
    }

    /// True when a passing exchange should produce a mapping at all.
    pub fn records(&self) -> bool {
        self.save_mapping || self.save_mapping_to_file
    }

    /// Check the upstream URL and the status code save filter.
    pub fn validate(&self) -> Result<(), ProxyError> {
        let uri: Uri = self
            .url
            .parse()
            .map_err(|_| ProxyError::InvalidUrl(self.url.clone()))?;
        if !matches!(uri.scheme_str(), Some("http") | Some("https")) || uri.host().is_none() {
            return Err(ProxyError::InvalidUrl(self.url.clone()));
        }

        if let Some(pattern) = self
            .save_mapping_settings
            .as_ref()
            .and_then(|s| s.status_code_pattern.as_ref())
        {
            StatusCodePattern::parse(&pattern.value)?;
        }
        Ok(())
    }
}

/// Filters deciding which proxied exchanges are worth saving.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySaveMappingSettings {
    /// "*", "200", "2xx", "200-299" or a comma separated list of those
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code_pattern: Option<ProxySaveMappingSetting<String>>,

    /// Method allow-list, compared case-insensitively
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_methods: Option<ProxySaveMappingSetting<Vec<String>>>,
}

/// One save filter value plus whether a hit accepts or rejects the exchange.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySaveMappingSetting<T> {
    pub value: T,
    #[serde(default)]
    pub match_behaviour: MatchBehaviour,
}

impl<T> ProxySaveMappingSetting<T> {
    pub fn accept(value: T) -> Self {
        Self {
            value,
            match_behaviour: MatchBehaviour::AcceptOnMatch,
        }
    }

    pub fn reject(value: T) -> Self {
        Self {
            value,
            match_behaviour: MatchBehaviour::RejectOnMatch,
        }
    }

    /// Whether the filter passes given that its value did (or did not) hit.
    pub fn passes(&self, hit: bool) -> bool {
        hit == (self.match_behaviour == MatchBehaviour::AcceptOnMatch)
    }
}

/// Find/replace rule applied to the upstream URL.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyUrlReplaceSettings {
    pub old_value: String,
    pub new_value: String,
    #[serde(default)]
    pub ignore_case: bool,
}
