//! Retry with capped exponential backoff.

use std::time::Duration;

use async_trait::async_trait;
use conduit_core::{Payload, ProxyError, RequestContext, Response};
use rand::Rng;

use crate::chain::{order, Call, Interceptor, Next};

/// Attempt budget and backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. `1` disables retrying.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Randomize each delay within `[delay / 2, delay]`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1_u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        if self.jitter && !delay.is_zero() {
            let half = delay / 2;
            rand::rng().random_range(half..=delay)
        } else {
            delay
        }
    }
}

/// Re-runs the inner chain while it fails with a retryable error.
///
/// Non-retryable failures (business errors, not-found, cancellation) return
/// immediately. Backoff waits observe the call's cancellation token. When
/// retrying is enabled, the current attempt number is written to the
/// `retry_attempt` metadata entry before each attempt, so stages inside the
/// retry loop can tell attempts apart. The number of attempts made is
/// recorded in the `retry_attempts` metadata entry when more than one was
/// needed.
#[derive(Debug, Clone)]
pub struct RetryInterceptor {
    policy: RetryPolicy,
}

impl RetryInterceptor {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl Interceptor for RetryInterceptor {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn order(&self) -> i32 {
        order::RETRY
    }

    async fn intercept(
        &self,
        ctx: &mut RequestContext,
        call: &Call,
        next: Next<'_>,
    ) -> Response<Payload> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            if max_attempts > 1 {
                ctx.insert_metadata("retry_attempt", attempt.to_string());
            }
            let response = next.run(ctx, call).await;
            let retryable = response.error().is_some_and(ProxyError::is_retryable);
            if !retryable || attempt >= max_attempts {
                if attempt > 1 {
                    ctx.insert_metadata("retry_attempts", attempt.to_string());
                }
                return response;
            }

            let delay = self.policy.delay_for(attempt);
            tracing::warn!(
                operation = ctx.operation(),
                correlation_id = ctx.correlation_id(),
                attempt,
                max_attempts,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = ?response.error(),
                "retrying call"
            );

            let cancellation = ctx.cancellation().clone();
            tokio::select! {
                biased;
                () = cancellation.cancelled() => return Response::failure(ProxyError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use conduit_core::{EndpointResolution, RequestType};
    use futures_util::future::BoxFuture;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::chain::InterceptorChain;
    use crate::dispatch::{Dispatch, Terminal};

    /// Fails with `error` for the first `failures` calls, then succeeds.
    struct Flaky {
        failures: usize,
        error: ProxyError,
        calls: AtomicUsize,
    }

    impl Flaky {
        fn new(failures: usize, error: ProxyError) -> Self {
            Self {
                failures,
                error,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Terminal for Flaky {
        fn dispatch(&self, _dispatch: Dispatch) -> BoxFuture<'static, Result<Payload, ProxyError>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = if n < self.failures {
                Err(self.error.clone())
            } else {
                Ok(json!("ok"))
            };
            Box::pin(async move { outcome })
        }
    }

    fn transient() -> ProxyError {
        ProxyError::RetryableTransport {
            status: Some(503),
            message: "unavailable".into(),
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            jitter: false,
        }
    }

    fn chain(policy: RetryPolicy) -> InterceptorChain {
        InterceptorChain::new(vec![Arc::new(RetryInterceptor::new(policy)) as Arc<dyn Interceptor>])
    }

    fn ctx() -> RequestContext {
        RequestContext::new("GetUser", RequestType::named("GetUserRequest"))
    }

    fn call() -> Call {
        Call::new(EndpointResolution::Local, json!({}))
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt() {
        let terminal = Flaky::new(2, transient());
        let mut ctx = ctx();
        let resp = chain(policy(3)).execute(&mut ctx, &call(), &terminal).await;

        assert_eq!(resp, Response::success(json!("ok")));
        assert_eq!(terminal.calls.load(Ordering::SeqCst), 3);
        assert_eq!(ctx.metadata().get("retry_attempts").map(String::as_str), Some("3"));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let terminal = Flaky::new(10, transient());
        let resp = chain(policy(3)).execute(&mut ctx(), &call(), &terminal).await;

        assert_eq!(resp.error(), Some(&transient()));
        assert_eq!(terminal.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn business_errors_are_not_retried() {
        let err = ProxyError::business("invalid", "bad id");
        let terminal = Flaky::new(10, err.clone());
        let resp = chain(policy(5)).execute(&mut ctx(), &call(), &terminal).await;

        assert_eq!(resp.error(), Some(&err));
        assert_eq!(terminal.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_backoff() {
        let terminal = Flaky::new(10, transient());
        let token = CancellationToken::new();
        token.cancel();
        let mut ctx = ctx().with_cancellation(token);

        let resp = chain(policy(5)).execute(&mut ctx, &call(), &terminal).await;
        assert_eq!(resp.error(), Some(&ProxyError::Cancelled));
        assert_eq!(terminal.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = policy(10);
        assert_eq!(policy.delay_for(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for(2), Duration::from_millis(20));
        assert_eq!(policy.delay_for(4), Duration::from_millis(80));
        assert_eq!(policy.delay_for(5), Duration::from_millis(100));
        assert_eq!(policy.delay_for(40), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_half_to_full_delay() {
        let policy = RetryPolicy {
            jitter: true,
            ..policy(10)
        };
        for retry in 1..6 {
            let capped = RetryPolicy { jitter: false, ..policy }.delay_for(retry);
            let jittered = policy.delay_for(retry);
            assert!(jittered >= capped / 2 && jittered <= capped);
        }
    }
}
