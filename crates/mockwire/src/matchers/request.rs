//! Request matcher combining every configured facet.

use super::error::MatcherError;
use super::field_matcher::{KeyedMatcher, KeyedMatcherSpec};
use super::graphql::{GraphQlMatcher, GraphQlMatcherSpec};
use super::multipart::{MultipartMatcher, MultipartMatcherSpec};
use super::protobuf::{ProtoBufMatcher, ProtoBufMatcherSpec};
use super::score::{Facet, MatchResult, RequestMatchResult};
use super::value_matcher::{MatcherSpec, ValueMatcher};
use crate::message::RequestMessage;
use serde::{Deserialize, Serialize};

/// Persisted request matcher: one optional matcher per facet, plus keyed
/// lists for headers, cookies and query parameters.
///
/// Facets left empty are not scored and do not lower the average.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMatcherSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<MatcherSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<MatcherSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<MatcherSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<KeyedMatcherSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cookies: Vec<KeyedMatcherSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<KeyedMatcherSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<MatcherSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<MatcherSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graphql: Option<GraphQlMatcherSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protobuf: Option<ProtoBufMatcherSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multipart: Option<MultipartMatcherSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_version: Option<MatcherSpec>,
}

impl RequestMatcherSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(mut self, matcher: MatcherSpec) -> Self {
        self.path = Some(matcher);
        self
    }

    pub fn with_url(mut self, matcher: MatcherSpec) -> Self {
        self.url = Some(matcher);
        self
    }

    /// Method names compare case-insensitively.
    pub fn using_method(self, method: &str) -> Self {
        self.using_methods(&[method])
    }

    pub fn using_methods(mut self, methods: &[&str]) -> Self {
        self.methods = Some(MatcherSpec::exact_any(methods.iter().copied()).ignore_case());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, matcher: MatcherSpec) -> Self {
        self.headers.push(KeyedMatcherSpec::new(name, matcher).ignore_case());
        self
    }

    pub fn with_header_spec(mut self, spec: KeyedMatcherSpec) -> Self {
        self.headers.push(spec);
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>, matcher: MatcherSpec) -> Self {
        self.cookies.push(KeyedMatcherSpec::new(name, matcher));
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, matcher: MatcherSpec) -> Self {
        self.params.push(KeyedMatcherSpec::new(name, matcher));
        self
    }

    pub fn with_param_spec(mut self, spec: KeyedMatcherSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn with_client_ip(mut self, matcher: MatcherSpec) -> Self {
        self.client_ip = Some(matcher);
        self
    }

    pub fn with_body(mut self, matcher: MatcherSpec) -> Self {
        self.body = Some(matcher);
        self
    }

    pub fn with_graphql(mut self, spec: GraphQlMatcherSpec) -> Self {
        self.graphql = Some(spec);
        self
    }

    pub fn with_protobuf(mut self, spec: ProtoBufMatcherSpec) -> Self {
        self.protobuf = Some(spec);
        self
    }

    pub fn with_multipart(mut self, spec: MultipartMatcherSpec) -> Self {
        self.multipart = Some(spec);
        self
    }

    pub fn with_http_version(mut self, matcher: MatcherSpec) -> Self {
        self.http_version = Some(matcher);
        self
    }
}

/// One compiled facet matcher.
#[derive(Debug, Clone)]
enum FacetMatcher {
    Method(ValueMatcher),
    Path(ValueMatcher),
    Url(ValueMatcher),
    Header(KeyedMatcher),
    Cookie(KeyedMatcher),
    Param(KeyedMatcher),
    ClientIp(ValueMatcher),
    Body(ValueMatcher),
    GraphQl(GraphQlMatcher),
    ProtoBuf(ProtoBufMatcher),
    Multipart(MultipartMatcher),
    HttpVersion(ValueMatcher),
}

impl FacetMatcher {
    fn facet(&self) -> Facet {
        match self {
            FacetMatcher::Method(_) => Facet::Method,
            FacetMatcher::Path(_) => Facet::Path,
            FacetMatcher::Url(_) => Facet::Url,
            FacetMatcher::Header(m) => Facet::Header(m.name().to_string()),
            FacetMatcher::Cookie(m) => Facet::Cookie(m.name().to_string()),
            FacetMatcher::Param(m) => Facet::Param(m.name().to_string()),
            FacetMatcher::ClientIp(_) => Facet::ClientIp,
            FacetMatcher::Body(_) => Facet::Body,
            FacetMatcher::GraphQl(_) => Facet::GraphQl,
            FacetMatcher::ProtoBuf(_) => Facet::ProtoBuf,
            FacetMatcher::Multipart(_) => Facet::Multipart,
            FacetMatcher::HttpVersion(_) => Facet::HttpVersion,
        }
    }

    fn score(&self, request: &RequestMessage) -> MatchResult {
        match self {
            FacetMatcher::Method(m) => m.score_text(Some(&request.method)),
            FacetMatcher::Path(m) => m.score_text(Some(&request.path)),
            FacetMatcher::Url(m) => m.score_text(Some(&request.url)),
            FacetMatcher::Header(m) => m.score(&request.headers),
            FacetMatcher::Cookie(m) => m.score(&request.cookies),
            FacetMatcher::Param(m) => m.score(&request.query),
            FacetMatcher::ClientIp(m) => m.score_text(Some(&request.client_ip)),
            FacetMatcher::Body(m) => m.score_body(&request.body),
            FacetMatcher::GraphQl(m) => m.score(&request.body),
            FacetMatcher::ProtoBuf(m) => m.score(&request.body),
            FacetMatcher::Multipart(m) => m.score(&request.body),
            FacetMatcher::HttpVersion(m) => m.score_text(Some(&request.http_version)),
        }
    }
}

/// Compiled [`RequestMatcherSpec`].
#[derive(Debug, Clone)]
pub struct RequestMatcher {
    spec: RequestMatcherSpec,
    matchers: Vec<FacetMatcher>,
}

impl RequestMatcher {
    pub fn compile(spec: &RequestMatcherSpec) -> Result<Self, MatcherError> {
        if spec.path.is_some() && spec.url.is_some() {
            return Err(MatcherError::PathAndUrlConflict);
        }

        let mut matchers = Vec::new();
        let value = |m: &Option<MatcherSpec>| m.as_ref().map(ValueMatcher::compile).transpose();

        if let Some(m) = value(&spec.methods)? {
            matchers.push(FacetMatcher::Method(m));
        }
        if let Some(m) = value(&spec.path)? {
            matchers.push(FacetMatcher::Path(m));
        }
        if let Some(m) = value(&spec.url)? {
            matchers.push(FacetMatcher::Url(m));
        }
        for h in &spec.headers {
            matchers.push(FacetMatcher::Header(KeyedMatcher::compile(h)?));
        }
        for c in &spec.cookies {
            matchers.push(FacetMatcher::Cookie(KeyedMatcher::compile(c)?));
        }
        for p in &spec.params {
            matchers.push(FacetMatcher::Param(KeyedMatcher::compile(p)?));
        }
        if let Some(m) = value(&spec.client_ip)? {
            matchers.push(FacetMatcher::ClientIp(m));
        }
        if let Some(m) = value(&spec.body)? {
            matchers.push(FacetMatcher::Body(m));
        }
        if let Some(g) = &spec.graphql {
            matchers.push(FacetMatcher::GraphQl(GraphQlMatcher::compile(g)?));
        }
        if let Some(p) = &spec.protobuf {
            matchers.push(FacetMatcher::ProtoBuf(ProtoBufMatcher::compile(p)?));
        }
        if let Some(m) = &spec.multipart {
            matchers.push(FacetMatcher::Multipart(MultipartMatcher::compile(m)?));
        }
        if let Some(m) = value(&spec.http_version)? {
            matchers.push(FacetMatcher::HttpVersion(m));
        }

        Ok(Self {
            spec: spec.clone(),
            matchers,
        })
    }

    pub fn spec(&self) -> &RequestMatcherSpec {
        &self.spec
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    pub fn score(&self, request: &RequestMessage) -> RequestMatchResult {
        let mut result = RequestMatchResult::default();
        self.score_into(request, &mut result);
        result
    }

    /// Append one detail per configured facet to `result`.
    pub fn score_into(&self, request: &RequestMessage, result: &mut RequestMatchResult) {
        for matcher in &self.matchers {
            result.add(matcher.facet(), matcher.score(request));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchers::MatchScores;
    use crate::message::BodyData;
    use serde_json::json;

    fn orders_matcher() -> RequestMatcher {
        RequestMatcher::compile(
            &RequestMatcherSpec::new()
                .with_path(MatcherSpec::wildcard("/orders/*"))
                .using_method("post")
                .with_header("Content-Type", MatcherSpec::wildcard("application/json*"))
                .with_body(MatcherSpec::json_partial(json!({"sku": "A-1"}))),
        )
        .unwrap()
    }

    #[test]
    fn test_perfect_request() {
        let request = RequestMessage::new("POST", "/orders/42")
            .with_header("content-type", "application/json")
            .with_body(BodyData::from_json(json!({"sku": "A-1", "qty": 1})));

        let result = orders_matcher().score(&request);
        assert_eq!(result.total_number(), 4);
        assert!(result.is_perfect_match());
    }

    #[test]
    fn test_partial_request_averages_facets() {
        let request = RequestMessage::new("GET", "/orders/42")
            .with_header("Content-Type", "text/plain");

        let result = orders_matcher().score(&request);
        // path matches; method, header and body do not
        assert_eq!(result.average_total_score(), 0.25);
        assert!(!result.is_perfect_match());
    }

    #[test]
    fn test_empty_matcher_never_matches() {
        let matcher = RequestMatcher::compile(&RequestMatcherSpec::new()).unwrap();
        let result = matcher.score(&RequestMessage::new("GET", "/"));
        assert_eq!(result.average_total_score(), MatchScores::MISMATCH);
        assert!(!result.is_perfect_match());
    }

    #[test]
    fn test_path_and_url_conflict() {
        let spec = RequestMatcherSpec::new()
            .with_path(MatcherSpec::exact("/a"))
            .with_url(MatcherSpec::exact("http://x/a"));
        assert_eq!(
            RequestMatcher::compile(&spec).unwrap_err(),
            MatcherError::PathAndUrlConflict
        );
    }

    #[test]
    fn test_fault_in_one_facet_keeps_others() {
        let matcher = RequestMatcher::compile(
            &RequestMatcherSpec::new()
                .with_path(MatcherSpec::exact("/xml"))
                .with_body(MatcherSpec::xpath("/a")),
        )
        .unwrap();
        let request = RequestMessage::new("POST", "/xml").with_body(BodyData::from_string("<a"));

        let result = matcher.score(&request);
        assert_eq!(result.average_total_score(), 0.5);
        assert_eq!(result.faults().count(), 1);
    }

    #[test]
    fn test_params_cookies_client_ip_and_version() {
        let matcher = RequestMatcher::compile(
            &RequestMatcherSpec::new()
                .with_param("page", MatcherSpec::regex("^[0-9]+$"))
                .with_cookie("session", MatcherSpec::not_null_or_empty())
                .with_client_ip(MatcherSpec::wildcard("10.0.*"))
                .with_http_version(MatcherSpec::exact("2")),
        )
        .unwrap();

        let request = RequestMessage::new("GET", "/list?page=3")
            .with_header("Cookie", "session=s1")
            .with_client_ip("10.0.4.2")
            .with_http_version("2");
        assert!(matcher.score(&request).is_perfect_match());

        let other = RequestMessage::new("GET", "/list?page=x").with_client_ip("10.0.4.2");
        assert_eq!(matcher.score(&other).average_total_score(), 0.25);
    }

    #[test]
    fn test_spec_yaml_round_trip() {
        let yaml = r#"
path:
  name: WildcardMatcher
  pattern: /users/*
methods:
  name: ExactMatcher
  patterns: [GET, HEAD]
  ignoreCase: true
headers:
  - name: X-Api-Key
    matchers:
      - name: RegexMatcher
        pattern: "^k-"
    rejectOnMatch: true
"#;
        let spec: RequestMatcherSpec = serde_yaml::from_str(yaml).unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        let back: RequestMatcherSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);

        let matcher = RequestMatcher::compile(&back).unwrap();
        let request = RequestMessage::new("head", "/users/1").with_header("X-Api-Key", "other");
        assert!(matcher.score(&request).is_perfect_match());
    }
}
