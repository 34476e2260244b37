//! Timeout interceptor.
//!
//! Bounds everything inside it (retries included, when placed outside the
//! retry stage) and fails the call with `ProxyError::Timeout` when the budget
//! elapses. The inner future is dropped on expiry.

use std::time::Duration;

use async_trait::async_trait;
use conduit_core::{Payload, ProxyError, RequestContext, Response};

use crate::chain::{order, Call, Interceptor, Next};

// ---------------------------------------------------------------------------
// TimeoutInterceptor
// ---------------------------------------------------------------------------

/// Enforces a per-call time budget.
///
/// The budget is read from the call's context when set, allowing callers to
/// override the configured default per call.
#[derive(Debug, Clone)]
pub struct TimeoutInterceptor {
    default_timeout: Duration,
    order: i32,
}

impl TimeoutInterceptor {
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            order: order::TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

#[async_trait]
impl Interceptor for TimeoutInterceptor {
    fn name(&self) -> &'static str {
        "timeout"
    }

    fn order(&self) -> i32 {
        self.order
    }

    async fn intercept(
        &self,
        ctx: &mut RequestContext,
        call: &Call,
        next: Next<'_>,
    ) -> Response<Payload> {
        let budget = ctx.timeout().unwrap_or(self.default_timeout);
        match tokio::time::timeout(budget, next.run(ctx, call)).await {
            Ok(response) => response,
            Err(_elapsed) => {
                #[allow(clippy::cast_possible_truncation)]
                let timeout_ms = budget.as_millis() as u64;
                Response::failure(ProxyError::Timeout { timeout_ms })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use conduit_core::{EndpointResolution, RequestType};
    use futures_util::future::BoxFuture;
    use serde_json::json;

    use super::*;
    use crate::chain::InterceptorChain;
    use crate::dispatch::{Dispatch, Terminal};

    struct SlowTerminal {
        delay: Duration,
    }

    impl Terminal for SlowTerminal {
        fn dispatch(&self, _dispatch: Dispatch) -> BoxFuture<'static, Result<Payload, ProxyError>> {
            let delay = self.delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                Ok(json!("done"))
            })
        }
    }

    fn chain(default_timeout: Duration) -> InterceptorChain {
        InterceptorChain::new(vec![
            Arc::new(TimeoutInterceptor::new(default_timeout)) as Arc<dyn Interceptor>
        ])
    }

    fn ctx() -> RequestContext {
        RequestContext::new("Slow", RequestType::named("SlowRequest"))
    }

    fn call() -> Call {
        Call::new(EndpointResolution::Local, json!({}))
    }

    #[tokio::test(start_paused = true)]
    async fn fast_call_completes() {
        let resp = chain(Duration::from_millis(100))
            .execute(&mut ctx(), &call(), &SlowTerminal { delay: Duration::from_millis(10) })
            .await;
        assert_eq!(resp, Response::success(json!("done")));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out_with_budget_in_error() {
        let resp = chain(Duration::from_millis(50))
            .execute(&mut ctx(), &call(), &SlowTerminal { delay: Duration::from_secs(5) })
            .await;
        assert_eq!(resp.error(), Some(&ProxyError::Timeout { timeout_ms: 50 }));
    }

    #[tokio::test(start_paused = true)]
    async fn context_timeout_overrides_default() {
        let mut ctx = ctx().with_timeout(Some(Duration::from_millis(20)));
        let resp = chain(Duration::from_secs(60))
            .execute(&mut ctx, &call(), &SlowTerminal { delay: Duration::from_secs(1) })
            .await;
        assert_eq!(resp.error(), Some(&ProxyError::Timeout { timeout_ms: 20 }));
    }
}
