//! Configuration types for the mock server.
//!
//! A config file (YAML, or JSON since YAML is a superset) describes the
//! listener, the engine settings, the outbound client and an optional list
//! of mappings registered at startup.
//!
//! ## Module Structure
//!
//! - `settings` - `ServerSettings` engine switches
//! - `proxy` - `ProxyAndRecordSettings` and save filters
//! - `client` - `ClientConfig` for the outbound HTTP client

mod client;
mod proxy;
mod settings;

use crate::mapping::{Mapping, MappingModel};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use client::ClientConfig;
pub use proxy::{
    ProxyAndRecordSettings, ProxySaveMappingSetting, ProxySaveMappingSettings,
    ProxyUrlReplaceSettings,
};
pub use settings::ServerSettings;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub settings: ServerSettings,
    #[serde(default)]
    pub client: ClientConfig,
    /// Mappings registered when the server starts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mappings: Vec<MappingModel>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// 0 picks an ephemeral port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9091
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_yaml(contents: &str) -> Result<Self, anyhow::Error> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        let threshold = self.settings.almost_perfect_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            anyhow::bail!("settings.almostPerfectThreshold must be in (0, 1], got {threshold}");
        }

        if self.client.request_timeout_secs == 0 {
            anyhow::bail!("client.requestTimeoutSecs must be greater than zero");
        }

        if let Some(proxy) = &self.settings.proxy_and_record {
            proxy.validate().context("Invalid settings.proxyAndRecord")?;
        }

        for model in &self.mappings {
            let guid = model.guid;
            Mapping::try_from(model.clone())
                .with_context(|| format!("Invalid mapping {guid}"))?;
        }

        Ok(())
    }
}

/// Read every `*.json` mapping file in `dir`, ordered by file name.
///
/// A missing directory yields no mappings.
pub fn load_mapping_files(dir: &Path) -> Result<Vec<MappingModel>, anyhow::Error> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list mappings directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")))
        .collect();
    paths.sort();

    paths
        .iter()
        .map(|path| {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid mapping file {}", path.display()))
        })
        .collect()
}
