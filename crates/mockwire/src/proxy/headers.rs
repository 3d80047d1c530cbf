//! Header conversion and hop-by-hop filtering.

use crate::message::MultiValueMap;
use hyper::header::{HeaderName, HeaderValue};
use hyper::HeaderMap;
use tracing::debug;

/// Headers that describe one connection and never travel past a proxy.
/// `host` and `content-length` are recomputed by the outbound client.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// Copy a multi-value map into a hyper `HeaderMap`, skipping entries that
/// are not valid header names or values.
pub fn to_header_map(headers: &MultiValueMap) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, values) in headers.iter() {
        let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
            debug!("Skipping invalid header name {:?}", name);
            continue;
        };
        for value in values {
            match HeaderValue::from_str(value) {
                Ok(header_value) => {
                    map.append(header_name.clone(), header_value);
                }
                Err(_) => debug!("Skipping invalid value for header {}", name),
            }
        }
    }
    map
}

/// Copy a hyper `HeaderMap` into a multi-value map. Non UTF-8 values are
/// decoded lossily.
pub fn from_header_map(headers: &HeaderMap) -> MultiValueMap {
    let mut map = MultiValueMap::new();
    for (name, value) in headers.iter() {
        map.insert(
            name.as_str(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        );
    }
    map
}
