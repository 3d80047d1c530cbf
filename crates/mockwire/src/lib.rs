// Library exports for the engine, the hosting binary, benchmarks and tests

// ===== Value types =====
pub mod message;

// ===== Matching & dispatch =====
pub mod mapping;
pub mod matchers;
pub mod scenario;

// ===== Proxy & record =====
pub mod proxy;

// ===== Server context, request log, configuration =====
pub mod config;
pub mod log;
pub mod server;
pub mod webhook;

pub use mapping::{Mapping, MappingBuilder, MappingError, MappingRegistry, ResponseProvider};
pub use matchers::{MatchBehaviour, MatchOperator, MatcherSpec, RequestMatcherSpec};
pub use message::{BodyData, RequestMessage, ResponseMessage};
pub use server::MockServer;
