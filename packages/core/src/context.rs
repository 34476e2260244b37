//! Per-call request context threaded through the interceptor chain.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use http::{HeaderMap, Method, Uri};
use tokio_util::sync::CancellationToken;

use crate::key::KeyPart;
use crate::request::RequestType;

/// Per-call metadata threaded through every interceptor and into the
/// terminal dispatcher.
///
/// Created once per call by the invoker. Interceptors receive it mutably and
/// may enrich headers, correlation id and the metadata bag; the terminal
/// dispatcher only ever sees an immutable snapshot.
#[derive(Debug, Clone)]
pub struct RequestContext {
    operation: String,
    request_type: RequestType,
    correlation_id: Option<String>,
    method: Method,
    target_url: Option<Uri>,
    headers: HeaderMap,
    metadata: BTreeMap<String, String>,
    parameters: Vec<KeyPart>,
    cacheable: bool,
    timeout: Option<Duration>,
    cancellation: CancellationToken,
    started_at: Instant,
}

impl RequestContext {
    /// Creates a context for one call of `operation`.
    #[must_use]
    pub fn new(operation: impl Into<String>, request_type: RequestType) -> Self {
        Self {
            operation: operation.into(),
            request_type,
            correlation_id: None,
            method: Method::POST,
            target_url: None,
            headers: HeaderMap::new(),
            metadata: BTreeMap::new(),
            parameters: Vec::new(),
            cacheable: false,
            timeout: None,
            cancellation: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_target_url(mut self, url: Option<Uri>) -> Self {
        self.target_url = url;
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    #[must_use]
    pub fn with_parameters(mut self, parameters: Vec<KeyPart>) -> Self {
        self.parameters = parameters;
        self
    }

    #[must_use]
    pub fn with_cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    #[must_use]
    pub fn request_type(&self) -> RequestType {
        self.request_type
    }

    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn set_correlation_id(&mut self, correlation_id: impl Into<String>) {
        self.correlation_id = Some(correlation_id.into());
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn target_url(&self) -> Option<&Uri> {
        self.target_url.as_ref()
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Header map; multi-valued headers are kept via `HeaderMap::append`.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Adds or replaces one metadata entry, returning the previous value.
    pub fn insert_metadata(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Option<String> {
        self.metadata.insert(key.into(), value.into())
    }

    #[must_use]
    pub fn parameters(&self) -> &[KeyPart] {
        &self.parameters
    }

    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.cacheable
    }

    /// Per-call time budget, if the caller set one.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Cooperative cancellation signal for this call.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}
