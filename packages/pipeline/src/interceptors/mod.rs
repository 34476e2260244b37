//! Built-in interceptors, one per cross-cutting concern.
//!
//! | Stage | Default order | Effect |
//! |---|---|---|
//! | [`SecurityInterceptor`] | `SECURITY` | attaches credentials, may reject |
//! | [`LoadShedInterceptor`] | `LOAD_SHED` | rejects when too many calls are in flight |
//! | [`TelemetryInterceptor`] | `TELEMETRY` | span, counter, latency histogram |
//! | [`CorrelationInterceptor`] | `CORRELATION` | assigns/propagates correlation id |
//! | [`LoggingInterceptor`] | `LOGGING` | structured call logs |
//! | [`CachingInterceptor`] | `CACHE` | serves and stores cacheable results |
//! | [`CircuitBreakerInterceptor`] | `RESILIENCE` | per-service circuit breaking |
//! | [`TimeoutInterceptor`] | `TIMEOUT` | bounds the inner chain |
//! | [`RetryInterceptor`] | `RETRY` | retries transient failures with backoff |
//! | [`AuditInterceptor`] | `AUDIT` | emits an audit record per call |
//!
//! [`NullInterceptor`] is the inert stand-in for any of them.

pub mod audit;
pub mod caching;
pub mod circuit_breaker;
pub mod correlation;
pub mod load_shed;
pub mod logging;
pub mod null;
pub mod retry;
pub mod security;
pub mod telemetry;
pub mod timeout;

pub use audit::{AuditInterceptor, AuditRecord, AuditSink, TracingAuditSink};
pub use caching::{CacheFailurePolicy, CachingInterceptor};
pub use circuit_breaker::CircuitBreakerInterceptor;
pub use correlation::CorrelationInterceptor;
pub use load_shed::LoadShedInterceptor;
pub use logging::LoggingInterceptor;
pub use null::{Concern, NullInterceptor};
pub use retry::{RetryInterceptor, RetryPolicy};
pub use security::{CredentialProvider, SecurityInterceptor, StaticCredential};
pub use telemetry::{MetricsTelemetry, Telemetry, TelemetryInterceptor, TelemetrySpan};
pub use timeout::TimeoutInterceptor;
