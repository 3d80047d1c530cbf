//! Request matchers with graded scoring.
//!
//! Every matcher scores one facet of a request in `[0, 1]` and may carry a
//! captured fault. Matchers are configured through serde "spec" types (the
//! persisted form) and compiled once into their runtime counterparts, so
//! regexes, JSONPath expressions and lowercase pattern copies are built at
//! registration time instead of on every request.
//!
//! ## Module Structure
//!
//! - `score` - Scores, `MatchOperator`, `MatchBehaviour`, per-facet details
//! - `error` - `MatcherError` for compile failures and evaluation faults
//! - `pattern` - Compiled single patterns (exact, wildcard, regex, JSON, XPath...)
//! - `value_matcher` - `MatcherSpec` and its compiled `ValueMatcher`
//! - `body_matcher` - Body-type aware dispatch for `ValueMatcher`
//! - `field_matcher` - Keyed matchers for headers, cookies and query params
//! - `graphql` - GraphQL query matcher
//! - `protobuf` - Schema-less protobuf matcher
//! - `multipart` - Multipart part matcher
//! - `request` - `RequestMatcherSpec` and the compiled `RequestMatcher`

mod body_matcher;
mod error;
mod field_matcher;
mod graphql;
mod multipart;
mod pattern;
mod protobuf;
mod request;
mod score;
mod value_matcher;

pub use error::MatcherError;
pub use field_matcher::{KeyedMatcher, KeyedMatcherSpec};
pub use graphql::{normalize_graphql, GraphQlMatcher, GraphQlMatcherSpec};
pub use multipart::{MimePartMatcherSpec, MultipartMatcher, MultipartMatcherSpec};
pub use protobuf::{decode_protobuf, ProtoBufMatcher, ProtoBufMatcherSpec};
pub use request::{RequestMatcher, RequestMatcherSpec};
pub use score::{
    Facet, MatchBehaviour, MatchDetail, MatchOperator, MatchResult, MatchScores,
    RequestMatchResult,
};
pub use value_matcher::{MatcherKind, MatcherSpec, ValueMatcher};

pub(crate) fn is_false(value: &bool) -> bool {
    !*value
}
