//! Forwarding a request upstream and turning the answer into a response.

use super::client::{ProxyClient, ProxyError};
use super::headers::{from_header_map, is_hop_by_hop, to_header_map};
use super::recording::{passes_save_filters, synthesize_mapping};
use crate::config::ProxyAndRecordSettings;
use crate::mapping::Mapping;
use crate::message::{BodyData, MultiValueMap, RequestMessage, ResponseMessage};
use hyper::body::Bytes;
use hyper::header::{HeaderValue, COOKIE};
use hyper::{Method, Request, Uri};
use regex::{NoExpand, RegexBuilder};
use tracing::{debug, error, warn};

/// Response headers that describe the upstream connection only.
const STRIPPED_RESPONSE_HEADERS: &[&str] = &["transfer-encoding", "connection", "content-length", "keep-alive"];

/// Result of one proxied exchange.
#[derive(Debug)]
pub struct ProxyOutcome {
    pub response: ResponseMessage,
    /// Mapping recorded from the exchange, when recording is enabled and
    /// the save filters let it through
    pub mapping: Option<Mapping>,
}

/// Upstream URL for `request`.
///
/// The request path and query are appended to the base URL. When the
/// request path already starts with the base URL's path that prefix is not
/// repeated. URL replace settings are applied last.
pub fn target_url(settings: &ProxyAndRecordSettings, request: &RequestMessage) -> String {
    let base = settings.url.trim_end_matches('/');
    let base_path = base
        .parse::<Uri>()
        .ok()
        .map(|uri| uri.path().trim_end_matches('/').to_string())
        .unwrap_or_default();

    let path_and_query = request.path_and_query();
    let tail = if base_path.is_empty() {
        path_and_query.as_str()
    } else {
        match path_and_query.strip_prefix(base_path.as_str()) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') || rest.starts_with('?') => rest,
            _ => path_and_query.as_str(),
        }
    };

    let url = format!("{base}{tail}");
    match &settings.replace_settings {
        Some(replace) if !replace.old_value.is_empty() => {
            if replace.ignore_case {
                match RegexBuilder::new(&regex::escape(&replace.old_value))
                    .case_insensitive(true)
                    .build()
                {
                    Ok(re) => re.replace_all(&url, NoExpand(&replace.new_value)).into_owned(),
                    Err(e) => {
                        warn!("Skipping URL replacement: {}", e);
                        url
                    }
                }
            } else {
                url.replace(&replace.old_value, &replace.new_value)
            }
        }
        _ => url,
    }
}

fn upstream_request(
    settings: &ProxyAndRecordSettings,
    request: &RequestMessage,
    url: &str,
) -> Result<Request<Bytes>, ProxyError> {
    let uri: Uri = url.parse().map_err(|_| ProxyError::InvalidUrl(url.to_string()))?;
    let method = Method::from_bytes(request.method.as_bytes())
        .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;

    let mut headers = MultiValueMap::new();
    for (name, values) in request.headers.iter() {
        if is_hop_by_hop(name) || name.eq_ignore_ascii_case("cookie") {
            continue;
        }
        for value in values {
            headers.insert(name, value.as_str());
        }
    }

    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(map) = builder.headers_mut() {
        *map = to_header_map(&headers);

        let cookie = request
            .cookies
            .iter()
            .filter(|(name, _)| !settings.excluded_cookies.iter().any(|e| e.eq_ignore_ascii_case(name)))
            .flat_map(|(name, values)| values.iter().map(move |v| format!("{name}={v}")))
            .collect::<Vec<_>>()
            .join("; ");
        if !cookie.is_empty() {
            match HeaderValue::from_str(&cookie) {
                Ok(value) => {
                    map.insert(COOKIE, value);
                }
                Err(_) => debug!("Dropping cookies that are not valid header text"),
            }
        }
    }

    builder
        .body(request.body.to_bytes())
        .map_err(|e| ProxyError::InvalidRequest(e.to_string()))
}

fn upstream_origin(url: &str) -> Option<String> {
    let uri = url.parse::<Uri>().ok()?;
    Some(format!("{}://{}", uri.scheme_str()?, uri.authority()?))
}

/// Point redirects at the upstream back at the caller.
fn rewrite_location(location: &str, upstream: Option<&str>, origin: Option<&str>) -> String {
    let rest = upstream
        .and_then(|up| location.strip_prefix(up))
        .filter(|rest| rest.is_empty() || rest.starts_with(['/', '?', '#']));
    match rest {
        Some(rest) => format!("{}{}", origin.unwrap_or_default(), rest),
        None => location.to_string(),
    }
}

/// Forward `request` to `url` and build the response for the caller.
///
/// Transport failures become a 502 (504 on timeout) and never record a
/// mapping.
pub async fn proxy(
    mapping: Option<&Mapping>,
    settings: &ProxyAndRecordSettings,
    client: &dyn ProxyClient,
    request: &RequestMessage,
    url: &str,
) -> ProxyOutcome {
    let upstream = match upstream_request(settings, request, url) {
        Ok(upstream) => upstream,
        Err(e) => {
            error!("Cannot build upstream request for {}: {}", url, e);
            return ProxyOutcome {
                response: ResponseMessage::error(502, &e.to_string()),
                mapping: None,
            };
        }
    };

    debug!("Proxying {} {} to {}", request.method, request.path, url);
    let answer = match client.send(upstream).await {
        Ok(answer) => answer,
        Err(e) => {
            error!("Proxy to {} failed: {}", url, e);
            let status = if matches!(e, ProxyError::Timeout(_)) { 504 } else { 502 };
            return ProxyOutcome {
                response: ResponseMessage::error(status, &e.to_string()),
                mapping: None,
            };
        }
    };

    let (parts, body) = answer.into_parts();
    let upstream_headers = from_header_map(&parts.headers);
    let upstream_base = upstream_origin(url);
    let origin = request.origin();

    let mut response = ResponseMessage::new(parts.status.as_u16());
    for (name, values) in upstream_headers.iter() {
        if STRIPPED_RESPONSE_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)) {
            continue;
        }
        for value in values {
            let value = if name.eq_ignore_ascii_case("location") {
                rewrite_location(value, upstream_base.as_deref(), origin.as_deref())
            } else {
                value.clone()
            };
            response.headers.insert(name, value);
        }
    }
    response.body = BodyData::detect(
        body,
        upstream_headers.first("content-type"),
        upstream_headers.first("content-encoding"),
    );

    let recorded = if settings.records() && passes_save_filters(settings, &request.method, response.status) {
        match synthesize_mapping(mapping, settings, request, &response) {
            Ok(recorded) => Some(recorded),
            Err(e) => {
                warn!("Could not record proxied exchange: {}", e);
                None
            }
        }
    } else {
        None
    };

    ProxyOutcome {
        response,
        mapping: recorded,
    }
}
