//! mitmkit-core - canonical data model, error taxonomy, wire-request
//! canonicalizer, and the storage trait every other mitmkit crate builds
//! on.
//!
//! - **Model**: `HttpRequest`/`HttpResponse`, the system's canonical,
//!   storable record shapes.
//! - **Canonicalize**: turns a parsed wire request into the canonical
//!   record.
//! - **Store**: the `RequestStore` persistence trait plus an in-memory
//!   default implementation.
//! - **Error**: the shared `ProxyError` taxonomy and its HTTP status
//!   mapping.

pub mod canonicalize;
pub mod error;
pub mod model;
pub mod store;

pub use canonicalize::{canonicalize, WireRequest};
pub use error::{ProxyError, ProxyResult};
pub use model::{HttpRequest, HttpResponse, OrderedMultiMap};
pub use store::{InMemoryStore, RequestStore};
