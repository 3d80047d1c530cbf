//! Proxy and record pipeline.
//!
//! Requests handled by a proxy mapping are forwarded upstream through a
//! [`ProxyClient`]. When recording is enabled and the save filters let the
//! exchange through, a replay mapping is synthesized from the observed
//! request and the upstream response.
//!
//! ## Module Structure
//!
//! - `client` - `ProxyClient` seam and the pooled hyper implementation
//! - `forwarding` - upstream URL, request/response conversion
//! - `recording` - status code patterns, save filters, mapping synthesis, file output
//! - `headers` - hop-by-hop filtering and header map conversion
//! - `tls` - certificate verifier used when upstream verification is disabled

mod client;
mod forwarding;
mod headers;
mod recording;
mod tls;

pub use client::{HttpClient, HyperProxyClient, ProxyClient, ProxyError};
pub use forwarding::{proxy, target_url, ProxyOutcome};
pub use headers::{from_header_map, is_hop_by_hop, to_header_map};
pub use recording::{
    passes_save_filters, save_mapping_to_file, saved_mapping_file_name, synthesize_mapping,
    StatusCodePattern,
};
