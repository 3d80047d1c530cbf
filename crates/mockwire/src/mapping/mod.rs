//! Mappings, their registry and the dispatcher.
//!
//! A [`Mapping`] binds a compiled request matcher to a response provider and
//! carries priority, scenario participation, probability and webhooks. The
//! [`MappingRegistry`] keeps them keyed by GUID and exposes a priority
//! ordered snapshot that the [`MappingMatcher`] scores on every request.
//!
//! ## Module Structure
//!
//! - `types` - `Mapping`, `ResponseProvider`, `Respond`, `MappingError`, priority bands
//! - `builder` - `MappingBuilder` fluent construction
//! - `model` - `MappingModel` persisted (serde) form
//! - `registry` - `MappingRegistry` concurrent store
//! - `dispatcher` - `MappingMatcher` best full / partial match selection

mod builder;
mod dispatcher;
mod model;
mod registry;
mod types;

pub use builder::MappingBuilder;
pub use dispatcher::{BestMatch, MappingMatch, MappingMatcher};
pub use model::MappingModel;
pub use registry::{MappingRegistry, MappingSnapshot};
pub use types::{
    Mapping, MappingError, Respond, ResponseProvider, ADMIN_PRIORITY, DEFAULT_PRIORITY,
    PROXY_CATCH_ALL_PRIORITY, SYNTHESIZED_PRIORITY,
};
