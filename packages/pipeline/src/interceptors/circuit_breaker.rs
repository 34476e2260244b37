//! Per-service circuit breaking.
//!
//! Each target service has its own breaker:
//!
//! - `Closed`: calls pass; consecutive retryable failures are counted and the
//!   breaker opens at `failure_threshold`.
//! - `Open`: calls fail fast with `ProxyError::CircuitOpen` until
//!   `open_duration` has elapsed.
//! - `HalfOpen`: exactly one probe call passes; its outcome closes or
//!   re-opens the breaker. Other calls fail fast while it is in flight.
//!
//! Only retryable failures count. Business errors and other
//! non-retryable outcomes mean the peer answered, so they reset the count.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conduit_core::{Payload, ProxyError, RequestContext, Response};
use dashmap::DashMap;
use tokio::time::Instant;

use crate::chain::{order, Call, Interceptor, Next};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed { failures: u32 },
    Open { until: Instant },
    HalfOpen { probe_in_flight: bool },
}

/// Admission decision for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Pass,
    Probe,
    Reject,
}

#[derive(Debug)]
struct Breakers {
    states: DashMap<String, BreakerState>,
    failure_threshold: u32,
    open_duration: Duration,
}

impl Breakers {
    fn admit(&self, key: &str) -> Admission {
        let mut state = self
            .states
            .entry(key.to_string())
            .or_insert(BreakerState::Closed { failures: 0 });
        let current = *state;
        match current {
            BreakerState::Closed { .. } => Admission::Pass,
            BreakerState::Open { until } if Instant::now() < until => Admission::Reject,
            BreakerState::Open { .. } | BreakerState::HalfOpen { probe_in_flight: false } => {
                *state = BreakerState::HalfOpen {
                    probe_in_flight: true,
                };
                Admission::Probe
            }
            BreakerState::HalfOpen {
                probe_in_flight: true,
            } => Admission::Reject,
        }
    }

    fn record(&self, key: &str, admission: Admission, tripped: bool) {
        let mut state = self
            .states
            .entry(key.to_string())
            .or_insert(BreakerState::Closed { failures: 0 });
        let next = match (admission, *state) {
            (Admission::Probe, _) if tripped => self.open(key),
            (Admission::Probe, _) => {
                tracing::info!(service = key, "circuit closed after successful probe");
                BreakerState::Closed { failures: 0 }
            }
            (_, BreakerState::Closed { failures }) if tripped => {
                let failures = failures.saturating_add(1);
                if failures >= self.failure_threshold {
                    self.open(key)
                } else {
                    BreakerState::Closed { failures }
                }
            }
            (_, BreakerState::Closed { .. }) => BreakerState::Closed { failures: 0 },
            // A call admitted while closed finished after another call moved
            // the breaker on; that newer state wins.
            (_, other) => other,
        };
        *state = next;
    }

    fn open(&self, key: &str) -> BreakerState {
        tracing::warn!(
            service = key,
            open_ms = u64::try_from(self.open_duration.as_millis()).unwrap_or(u64::MAX),
            "circuit opened"
        );
        BreakerState::Open {
            until: Instant::now() + self.open_duration,
        }
    }

    /// Releases a probe slot whose call never completed.
    fn abandon_probe(&self, key: &str) {
        if let Some(mut state) = self.states.get_mut(key) {
            if *state == (BreakerState::HalfOpen { probe_in_flight: true }) {
                *state = BreakerState::HalfOpen {
                    probe_in_flight: false,
                };
            }
        }
    }
}

/// Frees the half-open probe slot if the probe call is dropped mid-flight.
struct ProbeGuard<'a> {
    breakers: &'a Breakers,
    key: &'a str,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breakers.abandon_probe(self.key);
        }
    }
}

// ---------------------------------------------------------------------------
// CircuitBreakerInterceptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CircuitBreakerInterceptor {
    breakers: Arc<Breakers>,
}

impl CircuitBreakerInterceptor {
    /// # Panics
    ///
    /// Panics if `failure_threshold` is zero.
    #[must_use]
    pub fn new(failure_threshold: u32, open_duration: Duration) -> Self {
        assert!(failure_threshold > 0, "failure_threshold must be positive");
        Self {
            breakers: Arc::new(Breakers {
                states: DashMap::new(),
                failure_threshold,
                open_duration,
            }),
        }
    }

    /// Breaker key for a call: the remote service name, or `local:{type}`.
    fn key_for(ctx: &RequestContext, call: &Call) -> String {
        match call.resolution.service_name() {
            Some(service) => service.to_string(),
            None => format!("local:{}", ctx.request_type().path()),
        }
    }

    /// `true` when calls to `service` are currently rejected.
    #[must_use]
    pub fn is_open(&self, service: &str) -> bool {
        self.breakers.states.get(service).is_some_and(|state| {
            matches!(*state, BreakerState::Open { until } if Instant::now() < until)
        })
    }
}

#[async_trait]
impl Interceptor for CircuitBreakerInterceptor {
    fn name(&self) -> &'static str {
        "circuit_breaker"
    }

    fn order(&self) -> i32 {
        order::RESILIENCE
    }

    async fn intercept(
        &self,
        ctx: &mut RequestContext,
        call: &Call,
        next: Next<'_>,
    ) -> Response<Payload> {
        let key = Self::key_for(ctx, call);
        let admission = self.breakers.admit(&key);
        if admission == Admission::Reject {
            tracing::debug!(service = %key, operation = ctx.operation(), "circuit open, failing fast");
            return Response::failure(ProxyError::CircuitOpen { service: key });
        }

        let mut guard = ProbeGuard {
            breakers: &self.breakers,
            key: &key,
            armed: admission == Admission::Probe,
        };
        let response = next.run(ctx, call).await;
        guard.armed = false;
        drop(guard);

        if matches!(response.error(), Some(ProxyError::Cancelled)) {
            if admission == Admission::Probe {
                self.breakers.abandon_probe(&key);
            }
            return response;
        }
        let tripped = response.error().is_some_and(ProxyError::is_retryable);
        self.breakers.record(&key, admission, tripped);
        response
    }
}
