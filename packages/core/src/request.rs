//! Statically typed request contract and request-type identity.

use std::fmt;

use http::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::key::KeyPart;

/// Identity of a request type, used as the routing and handler key.
///
/// Two types are the same identity only if their full type paths match, so
/// `users::GetRequest` and `orders::GetRequest` never share a handler, a
/// route or a memoized resolution. The short name (`GetUserRequest`, no
/// module path) is kept alongside for display, metrics and name-based routes
/// loaded from configuration. It is `Copy` and cheap to hash, so it doubles as
/// a map key in the resolver cache and the handler registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestType {
    path: &'static str,
    name: &'static str,
}

impl RequestType {
    /// Identity of the Rust type `R`.
    #[must_use]
    pub fn of<R: ?Sized>() -> Self {
        let path = std::any::type_name::<R>();
        Self {
            path,
            name: short_type_name(path),
        }
    }

    /// Identity from an explicit name (e.g. a route loaded from configuration).
    ///
    /// The name is both the path and the short name, so it matches types
    /// whose short name equals `name` only through name-based lookups.
    ///
    /// # Panics
    ///
    /// Panics if `name` is empty. An unset request type is a wiring defect,
    /// not a runtime data error.
    #[must_use]
    pub fn named(name: &'static str) -> Self {
        assert!(!name.is_empty(), "request type name must not be empty");
        Self {
            path: name,
            name: short_type_name(name),
        }
    }

    /// Short type name without module path or generic arguments.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Fully qualified type path; the identity key.
    #[must_use]
    pub fn path(&self) -> &'static str {
        self.path
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Strips the module path and generic arguments from a `type_name` string.
fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// A request the pipeline can dispatch, with its response type fixed at
/// compile time.
///
/// The pipeline encodes `Self` on entry and decodes `Self::Response` on exit;
/// everything in between (interceptors, cache, transport) works on the
/// type-erased payload.
pub trait Request: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Payload type produced by a successful dispatch.
    type Response: Serialize + DeserializeOwned + Send + 'static;

    /// Operation name used for logging, audit, metrics and cache keys.
    const OPERATION: &'static str;

    /// Whether results of this request may be served from the cache.
    const CACHEABLE: bool = false;

    /// HTTP method used when the request is forwarded to a remote service.
    fn method() -> Method {
        Method::POST
    }

    /// Routing identity of this request type.
    fn request_type() -> RequestType {
        RequestType::of::<Self>()
    }

    /// Normalized parameters identifying this request for caching.
    fn cache_key_parts(&self) -> Vec<KeyPart> {
        Vec::new()
    }
}
