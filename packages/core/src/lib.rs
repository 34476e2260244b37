//! `Conduit` Core: response envelope, request context, error taxonomy, and routing facts.

pub mod context;
pub mod error;
pub mod key;
pub mod request;
pub mod response;
pub mod routing;

pub use context::RequestContext;
pub use error::{ErrorKind, ProxyError};
pub use key::KeyPart;
pub use request::{Request, RequestType};
pub use response::Response;
pub use routing::{EndpointResolution, ServiceEntry};

/// Type-erased request/response body carried through the interceptor chain.
pub type Payload = serde_json::Value;
