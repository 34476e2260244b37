//! Call telemetry: one span, one counter increment and one latency sample
//! per call.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use conduit_core::{Payload, RequestContext, Response};
use metrics::Label;
use tracing::{info_span, Instrument};

use crate::chain::{order, Call, Interceptor, Next};

pub const REQUESTS_TOTAL: &str = "conduit_requests_total";
pub const REQUEST_DURATION_SECONDS: &str = "conduit_request_duration_seconds";

/// Telemetry backend boundary.
pub trait Telemetry: Send + Sync {
    fn start_span(&self, ctx: &RequestContext) -> Box<dyn TelemetrySpan>;

    fn increment_counter(&self, name: &'static str, tags: &[(&'static str, String)]);

    fn observe_histogram(&self, name: &'static str, value: f64, tags: &[(&'static str, String)]);
}

/// An open span. Tags may be attached until [`TelemetrySpan::end`].
pub trait TelemetrySpan: Send {
    fn set_tag(&mut self, key: &'static str, value: &str);

    /// `tracing` span to run the inner chain under, if the backend has one.
    fn tracing_span(&self) -> tracing::Span {
        tracing::Span::none()
    }

    fn end(self: Box<Self>);
}

// ---------------------------------------------------------------------------
// MetricsTelemetry
// ---------------------------------------------------------------------------

/// Default backend: `metrics` facade for counters and histograms, `tracing`
/// for spans. Without an installed metrics recorder the metric calls are
/// no-ops.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsTelemetry;

struct TracingSpan {
    span: tracing::Span,
}

impl TelemetrySpan for TracingSpan {
    fn set_tag(&mut self, key: &'static str, value: &str) {
        self.span.record(key, value);
    }

    fn tracing_span(&self) -> tracing::Span {
        self.span.clone()
    }

    fn end(self: Box<Self>) {}
}

fn labels(tags: &[(&'static str, String)]) -> Vec<Label> {
    tags.iter()
        .map(|(key, value)| Label::new(*key, value.clone()))
        .collect()
}

impl Telemetry for MetricsTelemetry {
    fn start_span(&self, ctx: &RequestContext) -> Box<dyn TelemetrySpan> {
        let span = info_span!(
            "conduit.call",
            operation = ctx.operation(),
            request_type = ctx.request_type().name(),
            correlation_id = tracing::field::Empty,
            outcome = tracing::field::Empty,
            error_kind = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
        );
        Box::new(TracingSpan { span })
    }

    fn increment_counter(&self, name: &'static str, tags: &[(&'static str, String)]) {
        metrics::counter!(name, labels(tags)).increment(1);
    }

    fn observe_histogram(&self, name: &'static str, value: f64, tags: &[(&'static str, String)]) {
        metrics::histogram!(name, labels(tags)).record(value);
    }
}

// ---------------------------------------------------------------------------
// TelemetryInterceptor
// ---------------------------------------------------------------------------

/// Observes every call and returns the inner response unchanged.
#[derive(Clone)]
pub struct TelemetryInterceptor {
    telemetry: Arc<dyn Telemetry>,
}

impl TelemetryInterceptor {
    #[must_use]
    pub fn new(telemetry: Arc<dyn Telemetry>) -> Self {
        Self { telemetry }
    }
}

impl Default for TelemetryInterceptor {
    fn default() -> Self {
        Self::new(Arc::new(MetricsTelemetry))
    }
}

impl std::fmt::Debug for TelemetryInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryInterceptor").finish_non_exhaustive()
    }
}

#[async_trait]
impl Interceptor for TelemetryInterceptor {
    fn name(&self) -> &'static str {
        "telemetry"
    }

    fn order(&self) -> i32 {
        order::TELEMETRY
    }

    async fn intercept(
        &self,
        ctx: &mut RequestContext,
        call: &Call,
        next: Next<'_>,
    ) -> Response<Payload> {
        let mut span = self.telemetry.start_span(ctx);
        let start = Instant::now();
        let response = next.run(ctx, call).instrument(span.tracing_span()).await;
        let elapsed = start.elapsed();

        let outcome = if response.is_success() { "success" } else { "failure" };
        let error_kind = response.error().map_or("none", |err| err.kind().as_str());
        if let Some(id) = ctx.correlation_id() {
            span.set_tag("correlation_id", id);
        }
        span.set_tag("outcome", outcome);
        span.set_tag("error_kind", error_kind);
        span.set_tag("duration_ms", &elapsed.as_millis().to_string());
        span.end();

        let tags = [
            ("operation", ctx.operation().to_string()),
            ("outcome", outcome.to_string()),
            ("error_kind", error_kind.to_string()),
        ];
        self.telemetry.increment_counter(REQUESTS_TOTAL, &tags);
        self.telemetry
            .observe_histogram(REQUEST_DURATION_SECONDS, elapsed.as_secs_f64(), &tags[..1]);

        response
    }
}
