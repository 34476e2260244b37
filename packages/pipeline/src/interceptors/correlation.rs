//! Correlation-id assignment and propagation.

use async_trait::async_trait;
use conduit_core::{Payload, RequestContext, Response};
use http::header::{HeaderName, HeaderValue};
use uuid::Uuid;

use crate::chain::{order, Call, Interceptor, Next};

/// Default header carrying the correlation id across services.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Ensures every call carries a correlation id.
///
/// Precedence: an id already on the context, then the inbound header, then
/// a freshly generated UUID v4. The chosen id is written back to the header
/// so remote dispatch propagates it.
#[derive(Debug, Clone)]
pub struct CorrelationInterceptor {
    header: HeaderName,
}

impl CorrelationInterceptor {
    #[must_use]
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }

    #[must_use]
    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    fn assign(&self, ctx: &mut RequestContext) {
        let existing = ctx.correlation_id().map(str::to_string).or_else(|| {
            ctx.headers()
                .get(&self.header)
                .and_then(|value| value.to_str().ok())
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        });
        let id = existing.unwrap_or_else(|| Uuid::new_v4().to_string());

        match HeaderValue::from_str(&id) {
            Ok(value) => {
                ctx.headers_mut().insert(self.header.clone(), value);
            }
            Err(_) => {
                tracing::warn!(
                    correlation_id = %id,
                    "correlation id is not a valid header value, not propagated"
                );
            }
        }
        ctx.set_correlation_id(id);
    }
}

impl Default for CorrelationInterceptor {
    fn default() -> Self {
        Self::new(HeaderName::from_static(CORRELATION_HEADER))
    }
}

#[async_trait]
impl Interceptor for CorrelationInterceptor {
    fn name(&self) -> &'static str {
        "correlation"
    }

    fn order(&self) -> i32 {
        order::CORRELATION
    }

    async fn intercept(
        &self,
        ctx: &mut RequestContext,
        call: &Call,
        next: Next<'_>,
    ) -> Response<Payload> {
        self.assign(ctx);
        next.run(ctx, call).await
    }
}
