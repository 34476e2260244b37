//! Structured call logging.

use async_trait::async_trait;
use conduit_core::{ErrorKind, Payload, RequestContext, Response};

use crate::chain::{order, Call, Interceptor, Next};

/// Logs each call on entry (debug) and completion.
///
/// Successful calls complete at info, business failures at info and every
/// other failure at warn. The response passes through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingInterceptor;

impl LoggingInterceptor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn order(&self) -> i32 {
        order::LOGGING
    }

    async fn intercept(
        &self,
        ctx: &mut RequestContext,
        call: &Call,
        next: Next<'_>,
    ) -> Response<Payload> {
        let service = call.resolution.service_name().unwrap_or("local");
        tracing::debug!(
            operation = ctx.operation(),
            request_type = ctx.request_type().name(),
            correlation_id = ctx.correlation_id(),
            service,
            "dispatching call"
        );

        let response = next.run(ctx, call).await;

        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = ctx.elapsed().as_millis() as u64;
        match response.error() {
            None => tracing::info!(
                operation = ctx.operation(),
                correlation_id = ctx.correlation_id(),
                service,
                elapsed_ms,
                "call succeeded"
            ),
            Some(err) if err.kind() == ErrorKind::Business => tracing::info!(
                operation = ctx.operation(),
                correlation_id = ctx.correlation_id(),
                service,
                elapsed_ms,
                error = %err,
                "call rejected by handler"
            ),
            Some(err) => tracing::warn!(
                operation = ctx.operation(),
                correlation_id = ctx.correlation_id(),
                service,
                elapsed_ms,
                error_kind = err.kind().as_str(),
                error = %err,
                "call failed"
            ),
        }
        response
    }
}
