//! Outbound webhook callbacks fired after a mapping responds.

use crate::message::{BodyData, MultiValueMap};
use crate::proxy::{to_header_map, ProxyClient, ProxyError};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Method, Request, Uri};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default, skip_serializing_if = "MultiValueMap::is_empty")]
    pub headers: MultiValueMap,
    #[serde(default, skip_serializing_if = "BodyData::is_empty")]
    pub body: BodyData,
}

fn default_method() -> String {
    "POST".to_string()
}

impl Webhook {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: MultiValueMap::new(),
            body: BodyData::none(),
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: BodyData) -> Self {
        self.body = body;
        self
    }

    fn to_request(&self) -> Result<Request<hyper::body::Bytes>, ProxyError> {
        let uri: Uri = self
            .url
            .parse()
            .map_err(|_| ProxyError::InvalidUrl(self.url.clone()))?;
        let method = Method::from_bytes(self.method.to_uppercase().as_bytes())
            .map_err(|e| ProxyError::InvalidRequest(e.to_string()))?;

        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            *headers = to_header_map(&self.headers);
            if !headers.contains_key(CONTENT_TYPE) {
                if let Some(content_type) = self
                    .body
                    .content_type
                    .as_deref()
                    .and_then(|ct| HeaderValue::from_str(ct).ok())
                {
                    headers.insert(CONTENT_TYPE, content_type);
                }
            }
        }
        builder
            .body(self.body.to_bytes())
            .map_err(|e| ProxyError::InvalidRequest(e.to_string()))
    }
}

/// Send `webhook` and return the upstream status. Failures are logged and
/// never reach the caller of the mapping.
pub async fn fire(webhook: &Webhook, client: &dyn ProxyClient) -> Option<u16> {
    let request = match webhook.to_request() {
        Ok(request) => request,
        Err(e) => {
            warn!("Webhook {} {} not sent: {}", webhook.method, webhook.url, e);
            return None;
        }
    };

    match client.send(request).await {
        Ok(response) => {
            debug!("Webhook {} {} answered {}", webhook.method, webhook.url, response.status());
            Some(response.status().as_u16())
        }
        Err(e) => {
            warn!("Webhook {} {} failed: {}", webhook.method, webhook.url, e);
            None
        }
    }
}
