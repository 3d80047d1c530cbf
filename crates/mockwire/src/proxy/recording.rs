//! Save policy and mapping synthesis for proxied exchanges.

use super::client::ProxyError;
use super::headers::is_hop_by_hop;
use crate::config::ProxyAndRecordSettings;
use crate::mapping::{Mapping, MappingError, SYNTHESIZED_PRIORITY};
use crate::matchers::{MatcherSpec, RequestMatcherSpec};
use crate::message::{BodyValue, RequestMessage, ResponseMessage};
use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Status code filter: `*`, `200`, `2xx`, `200-299`, or a comma separated
/// list of those.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCodePattern {
    ranges: Vec<(u16, u16)>,
}

impl StatusCodePattern {
    pub fn parse(pattern: &str) -> Result<Self, ProxyError> {
        let invalid = || ProxyError::InvalidStatusPattern(pattern.to_string());
        let mut ranges = Vec::new();

        for part in pattern.split(',').map(str::trim) {
            let range = if part == "*" {
                (0, u16::MAX)
            } else if let Some((from, to)) = part.split_once('-') {
                let from: u16 = from.trim().parse().map_err(|_| invalid())?;
                let to: u16 = to.trim().parse().map_err(|_| invalid())?;
                if from > to {
                    return Err(invalid());
                }
                (from, to)
            } else if part.len() == 3 && part.get(1..).is_some_and(|s| s.eq_ignore_ascii_case("xx")) {
                let class = part
                    .get(..1)
                    .and_then(|digit| digit.parse::<u16>().ok())
                    .filter(|c| (1..=5).contains(c))
                    .ok_or_else(invalid)?;
                (class * 100, class * 100 + 99)
            } else {
                let code: u16 = part.parse().map_err(|_| invalid())?;
                (code, code)
            };
            ranges.push(range);
        }

        Ok(Self { ranges })
    }

    pub fn matches(&self, status: u16) -> bool {
        self.ranges
            .iter()
            .any(|(from, to)| (*from..=*to).contains(&status))
    }
}

/// Whether the configured save filters let this exchange through.
///
/// Each filter is independent; a missing filter always passes. A status
/// pattern that fails to parse never hits.
pub fn passes_save_filters(settings: &ProxyAndRecordSettings, method: &str, status: u16) -> bool {
    let Some(filters) = &settings.save_mapping_settings else {
        return true;
    };

    if let Some(setting) = &filters.status_code_pattern {
        let hit = match StatusCodePattern::parse(&setting.value) {
            Ok(pattern) => pattern.matches(status),
            Err(e) => {
                warn!("Ignoring save filter: {}", e);
                false
            }
        };
        if !setting.passes(hit) {
            return false;
        }
    }

    if let Some(setting) = &filters.http_methods {
        let hit = setting.value.iter().any(|m| m.eq_ignore_ascii_case(method));
        if !setting.passes(hit) {
            return false;
        }
    }

    true
}

fn is_excluded(excluded: &[String], name: &str) -> bool {
    excluded.iter().any(|e| e.eq_ignore_ascii_case(name))
}

/// Exact request matcher describing the observed request.
fn observed_request_matcher(settings: &ProxyAndRecordSettings, request: &RequestMessage) -> RequestMatcherSpec {
    let mut spec = RequestMatcherSpec::new()
        .with_path(MatcherSpec::exact(request.path.as_str()))
        .using_method(&request.method);

    for (name, values) in request.query.iter() {
        if !is_excluded(&settings.excluded_params, name) {
            spec = spec.with_param(name, MatcherSpec::exact_any(values.iter().map(String::as_str)));
        }
    }

    for (name, values) in request.cookies.iter() {
        if !is_excluded(&settings.excluded_cookies, name) {
            spec = spec.with_cookie(name, MatcherSpec::exact_any(values.iter().map(String::as_str)));
        }
    }

    for (name, values) in request.headers.iter() {
        if name.eq_ignore_ascii_case("cookie")
            || is_hop_by_hop(name)
            || is_excluded(&settings.excluded_headers, name)
        {
            continue;
        }
        spec = spec.with_header(name, MatcherSpec::exact_any(values.iter().map(String::as_str)));
    }

    let body = &request.body;
    let body_matcher = match &body.value {
        BodyValue::None => None,
        BodyValue::Json(json) => Some(MatcherSpec::json(json.clone())),
        BodyValue::String(_) | BodyValue::FormUrlEncoded(_) => {
            body.as_text().map(|text| MatcherSpec::exact(text.into_owned()))
        }
        BodyValue::Bytes(_) | BodyValue::ProtoBuf(_) | BodyValue::MultiPart(_) | BodyValue::File(_) => {
            Some(MatcherSpec::exact_object(&body.to_bytes()))
        }
    };
    if let Some(matcher) = body_matcher {
        spec = spec.with_body(matcher);
    }

    spec
}

/// Build a mapping replaying `response` for requests like `request`.
///
/// With `use_defined_request_matchers` the proxy mapping's own request
/// matcher is reused; otherwise exact matchers are derived from the request.
pub fn synthesize_mapping(
    template: Option<&Mapping>,
    settings: &ProxyAndRecordSettings,
    request: &RequestMessage,
    response: &ResponseMessage,
) -> Result<Mapping, MappingError> {
    let request_matcher = match template {
        Some(template) if settings.use_defined_request_matchers => {
            template.request_matcher.spec().clone()
        }
        _ => observed_request_matcher(settings, request),
    };

    let title = format!("Proxy Mapping for {} {}", request.method, request.path);
    Mapping::builder()
        .with_title(title.clone())
        .with_description(title)
        .at_priority(SYNTHESIZED_PRIORITY)
        .given(request_matcher)
        .respond_with(response.clone())
        .build()
}

/// File name for a saved mapping: prefix, sanitized title, optional GUID.
pub fn saved_mapping_file_name(mapping: &Mapping, settings: &ProxyAndRecordSettings) -> String {
    let title = mapping.display_name();
    let sanitized: String = title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();

    let mut name = String::new();
    if let Some(prefix) = &settings.prefix_for_saved_mapping_file {
        name.push_str(prefix);
    }
    name.push_str(&sanitized);
    if settings.append_guid_to_saved_mapping_file {
        name.push('_');
        name.push_str(&mapping.guid.to_string());
    }
    name.push_str(".json");
    name
}

/// Write `mapping` as pretty JSON into `dir`, creating the directory.
pub fn save_mapping_to_file(
    mapping: &Mapping,
    settings: &ProxyAndRecordSettings,
    dir: &Path,
) -> Result<PathBuf, anyhow::Error> {
    let model = mapping.to_model()?;
    let json = serde_json::to_string_pretty(&model)?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create mappings directory {}", dir.display()))?;
    let path = dir.join(saved_mapping_file_name(mapping, settings));
    std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;

    info!("Saved proxy mapping {} to {}", mapping.guid, path.display());
    Ok(path)
}
