use super::body::BodyData;
use super::multimap::MultiValueMap;
use chrono::{DateTime, Utc};
use hyper::Uri;
use serde::{Deserialize, Serialize};

/// An inbound request as seen by the matching engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMessage {
    pub method: String,
    /// Absolute URL when the hosting layer knows the origin, otherwise path and query
    pub url: String,
    /// Percent-decoded absolute path
    pub path: String,
    #[serde(default)]
    pub query: MultiValueMap,
    #[serde(default)]
    pub headers: MultiValueMap,
    #[serde(default)]
    pub cookies: MultiValueMap,
    #[serde(default)]
    pub body: BodyData,
    #[serde(default = "default_client_ip")]
    pub client_ip: String,
    #[serde(default = "default_http_version")]
    pub http_version: String,
    /// DER client certificate, base64 encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_certificate: Option<String>,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

fn default_client_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_http_version() -> String {
    "1.1".to_string()
}

impl RequestMessage {
    /// Create a request for `method` and `url` (absolute or origin-form).
    pub fn new(method: &str, url: &str) -> Self {
        let (raw_path, query) = match url.parse::<Uri>() {
            Ok(uri) => (uri.path().to_string(), uri.query().map(str::to_string)),
            Err(_) => match url.split_once('?') {
                Some((p, q)) => (p.to_string(), Some(q.to_string())),
                None => (url.to_string(), None),
            },
        };
        let raw_path = if raw_path.is_empty() {
            "/".to_string()
        } else {
            raw_path
        };
        let path = urlencoding::decode(&raw_path)
            .map(|p| p.into_owned())
            .unwrap_or(raw_path);

        Self {
            method: method.to_uppercase(),
            url: url.to_string(),
            path,
            query: query.as_deref().map(parse_query).unwrap_or_default(),
            headers: MultiValueMap::new(),
            cookies: MultiValueMap::new(),
            body: BodyData::none(),
            client_ip: default_client_ip(),
            http_version: default_http_version(),
            client_certificate: None,
            received_at: Utc::now(),
        }
    }

    /// Add a header; `Cookie` headers also populate the cookie map.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        if name.eq_ignore_ascii_case("cookie") {
            for (k, v) in parse_cookies(&value) {
                self.cookies.insert(k, v);
            }
        }
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: BodyData) -> Self {
        self.body = body;
        self
    }

    pub fn with_client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = client_ip.into();
        self
    }

    pub fn with_http_version(mut self, version: impl Into<String>) -> Self {
        self.http_version = version.into();
        self
    }

    /// Raw query string, if any.
    pub fn query_string(&self) -> Option<&str> {
        self.url.split_once('?').map(|(_, q)| q).filter(|q| !q.is_empty())
    }

    /// Path as it appeared on the wire followed by the query string.
    pub fn path_and_query(&self) -> String {
        let raw_path = match self.url.parse::<Uri>() {
            Ok(uri) if !uri.path().is_empty() => uri.path().to_string(),
            _ => self.path.clone(),
        };
        match self.query_string() {
            Some(q) => format!("{raw_path}?{q}"),
            None => raw_path,
        }
    }

    /// `scheme://authority` the caller used to reach us.
    ///
    /// Falls back to the `Host` header over plain http when the URL is
    /// origin-form.
    pub fn origin(&self) -> Option<String> {
        if let Ok(uri) = self.url.parse::<Uri>() {
            if let (Some(scheme), Some(authority)) = (uri.scheme_str(), uri.authority()) {
                return Some(format!("{scheme}://{authority}"));
            }
        }
        self.headers.first("host").map(|host| format!("http://{host}"))
    }
}

/// Parse a raw query string into an ordered multi-value map.
pub fn parse_query(query: &str) -> MultiValueMap {
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next().unwrap_or_default();
            let value = parts.next().unwrap_or_default();
            (decode(key), decode(value))
        })
        .collect()
}

/// Parse a `Cookie` header value into name/value pairs.
pub fn parse_cookies(header: &str) -> Vec<(String, String)> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}

fn decode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|c| c.into_owned())
        .unwrap_or(spaced)
}
