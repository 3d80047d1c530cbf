//! Outbound HTTP client used for proxying and webhooks.
//!
//! The engine only depends on the [`ProxyClient`] trait, so tests can swap
//! in a scripted upstream. [`HyperProxyClient`] is the pooled hyper client
//! used by the server.

use super::tls::NoVerifier;
use crate::config::ClientConfig;
use async_trait::async_trait;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Request, Response};
use hyper_rustls::ConfigBuilderExt;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid upstream url '{0}'")]
    InvalidUrl(String),

    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),

    #[error("upstream request failed: {0}")]
    Request(String),

    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),

    #[error("failed to read upstream response body: {0}")]
    Body(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("invalid status code pattern '{0}'")]
    InvalidStatusPattern(String),
}

/// Sends one fully buffered request upstream.
#[async_trait]
pub trait ProxyClient: Send + Sync {
    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>, ProxyError>;
}

/// Type alias for the pooled hyper client.
pub type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, BoxBody<Bytes, hyper::Error>>;

pub struct HyperProxyClient {
    client: HttpClient,
    request_timeout: Duration,
}

impl HyperProxyClient {
    /// Build a pooled HTTP/1.1 client speaking both http and https.
    pub fn new(config: &ClientConfig) -> Result<Self, ProxyError> {
        let mut http_connector = HttpConnector::new();
        http_connector.set_keepalive(Some(Duration::from_secs(config.keepalive_timeout_secs)));
        http_connector.set_connect_timeout(Some(Duration::from_secs(config.connect_timeout_secs)));
        http_connector.enforce_http(false);

        let builder = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| ProxyError::Tls(e.to_string()))?;

        let tls = if config.tls_skip_verify {
            warn!("TLS certificate verification DISABLED for upstreams (development/testing only)");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
                .with_no_client_auth()
        } else {
            builder
                .with_native_roots()
                .map_err(|e| ProxyError::Tls(e.to_string()))?
                .with_no_client_auth()
        };

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .pool_max_idle_per_host(config.max_idle_per_host)
            .build(https_connector);

        info!(
            "Outbound client configured (HTTP/1.1): max_idle={}, idle_timeout={}s, request_timeout={}s",
            config.max_idle_per_host, config.idle_timeout_secs, config.request_timeout_secs
        );

        Ok(Self {
            client,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }
}

#[async_trait]
impl ProxyClient for HyperProxyClient {
    async fn send(&self, request: Request<Bytes>) -> Result<Response<Bytes>, ProxyError> {
        let (parts, body) = request.into_parts();
        let body = BoxBody::new(Full::new(body).map_err(|never: Infallible| match never {}));
        let request = Request::from_parts(parts, body);

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| ProxyError::Request(e.to_string()))?;
            let (parts, body) = response.into_parts();
            let bytes = body
                .collect()
                .await
                .map_err(|e| ProxyError::Body(e.to_string()))?
                .to_bytes();
            Ok(Response::from_parts(parts, bytes))
        };

        tokio::time::timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| ProxyError::Timeout(self.request_timeout))?
    }
}
