//! Error taxonomy shared by every stage of the dispatch pipeline.

use serde::{Deserialize, Serialize};

/// Classified failure carried by a [`Response`](crate::Response).
///
/// Every terminal error reaches the caller as one of these variants. Raw
/// collaborator errors (transport, serialization, handler panics turned into
/// errors) are mapped into this enum at the dispatcher boundary and never
/// cross into the interceptor chain unclassified.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    /// Domain-level rejection (e.g. validation). Never retried.
    #[error("business rule violated [{code}]: {message}")]
    Business { code: String, message: String },

    /// The peer answered, but the answer is a failure retrying will not fix.
    #[error("remote call failed with status {status:?}: {message}")]
    NonRetryableTransport {
        status: Option<u16>,
        message: String,
    },

    /// Transient network or server failure, eligible for retry.
    #[error("transient transport failure (status {status:?}): {message}")]
    RetryableTransport {
        status: Option<u16>,
        message: String,
    },

    /// No in-process handler is bound to the request type.
    #[error("no handler registered for request type {request_type}")]
    HandlerNotFound { request_type: String },

    /// Cooperative cancellation was observed mid-flight.
    #[error("call cancelled")]
    Cancelled,

    /// The cache store failed to serve a get or set.
    #[error("cache unavailable: {message}")]
    CacheUnavailable { message: String },

    /// The call exceeded its time budget.
    #[error("call timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Too many calls in flight; rejected without queueing.
    #[error("pipeline overloaded, try again later")]
    Overloaded,

    /// The circuit breaker for the target service is open.
    #[error("circuit open for service {service}")]
    CircuitOpen { service: String },

    /// Credentials could not be obtained for the call.
    #[error("unauthorized: {reason}")]
    Unauthorized { reason: String },

    /// Local encoding/decoding or wiring defect.
    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Field-less discriminant of [`ProxyError`], used for tagging metrics, audit
/// records and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Business,
    NonRetryableTransport,
    RetryableTransport,
    HandlerNotFound,
    Cancelled,
    CacheUnavailable,
    Timeout,
    Overloaded,
    CircuitOpen,
    Unauthorized,
    Internal,
}

impl ErrorKind {
    /// Stable snake-case label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Business => "business",
            Self::NonRetryableTransport => "non_retryable_transport",
            Self::RetryableTransport => "retryable_transport",
            Self::HandlerNotFound => "handler_not_found",
            Self::Cancelled => "cancelled",
            Self::CacheUnavailable => "cache_unavailable",
            Self::Timeout => "timeout",
            Self::Overloaded => "overloaded",
            Self::CircuitOpen => "circuit_open",
            Self::Unauthorized => "unauthorized",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ProxyError {
    /// Returns the discriminant of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Business { .. } => ErrorKind::Business,
            Self::NonRetryableTransport { .. } => ErrorKind::NonRetryableTransport,
            Self::RetryableTransport { .. } => ErrorKind::RetryableTransport,
            Self::HandlerNotFound { .. } => ErrorKind::HandlerNotFound,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::CacheUnavailable { .. } => ErrorKind::CacheUnavailable,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Overloaded => ErrorKind::Overloaded,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the retry policy may attempt the call again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RetryableTransport { .. } | Self::Timeout { .. })
    }

    /// Shorthand for a business rejection.
    pub fn business(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Business {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Shorthand for an internal defect.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
