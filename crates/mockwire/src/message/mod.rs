//! Request and response value types exchanged with the hosting layer.
//!
//! The hosting layer turns wire bytes into a [`RequestMessage`] and renders the
//! [`ResponseMessage`] the engine hands back. Everything in between works on
//! these values only.
//!
//! ## Module Structure
//!
//! - `multimap` - Ordered multi-value map for headers, query and cookies
//! - `body` - [`BodyData`] tagged body value and content detection
//! - `request` - [`RequestMessage`] and query/cookie parsing
//! - `response` - [`ResponseMessage`] and fault directives

pub(crate) mod body;
mod multimap;
mod request;
mod response;

pub use body::{BodyData, BodyType, BodyValue, MultipartPart};
pub use multimap::MultiValueMap;
pub use request::{parse_cookies, parse_query, RequestMessage};
pub use response::{FaultDirective, FaultType, ResponseMessage};
