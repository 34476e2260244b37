//! Response caching for cacheable calls.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conduit_core::{Payload, ProxyError, RequestContext, Response};
use serde::Deserialize;

use crate::cache::{CacheError, CacheKeyStrategy, CacheStore, OperationKeyStrategy};
use crate::chain::{order, Call, Interceptor, Next};

/// What a cache store failure does to the call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheFailurePolicy {
    /// The call fails with `ProxyError::CacheUnavailable`.
    #[default]
    Fail,
    /// The failure is logged; a failed read is treated as a miss and a
    /// failed write is ignored.
    Bypass,
}

/// Serves cacheable calls from a [`CacheStore`].
///
/// Only calls whose context is marked cacheable and for which the key
/// strategy yields a key are considered. On a hit the cached value is
/// returned without running any inner stage; on a miss the inner chain runs
/// once and a successful result is stored with the configured TTL. Failures
/// are never cached.
#[derive(Clone)]
pub struct CachingInterceptor {
    store: Arc<dyn CacheStore>,
    keys: Arc<dyn CacheKeyStrategy>,
    ttl: Option<Duration>,
    on_failure: CacheFailurePolicy,
}

impl CachingInterceptor {
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, ttl: Option<Duration>) -> Self {
        Self {
            store,
            keys: Arc::new(OperationKeyStrategy::default()),
            ttl,
            on_failure: CacheFailurePolicy::default(),
        }
    }

    #[must_use]
    pub fn with_key_strategy(mut self, keys: Arc<dyn CacheKeyStrategy>) -> Self {
        self.keys = keys;
        self
    }

    #[must_use]
    pub fn with_failure_policy(mut self, on_failure: CacheFailurePolicy) -> Self {
        self.on_failure = on_failure;
        self
    }

    fn unavailable(err: &CacheError) -> ProxyError {
        ProxyError::CacheUnavailable {
            message: err.to_string(),
        }
    }
}

impl std::fmt::Debug for CachingInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingInterceptor")
            .field("ttl", &self.ttl)
            .field("on_failure", &self.on_failure)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Interceptor for CachingInterceptor {
    fn name(&self) -> &'static str {
        "cache"
    }

    fn order(&self) -> i32 {
        order::CACHE
    }

    async fn intercept(
        &self,
        ctx: &mut RequestContext,
        call: &Call,
        next: Next<'_>,
    ) -> Response<Payload> {
        if !ctx.is_cacheable() {
            return next.run(ctx, call).await;
        }
        let Some(key) = self.keys.key(ctx) else {
            return next.run(ctx, call).await;
        };

        match self.store.get(&key).await {
            Ok(Some(value)) => {
                tracing::debug!(key = %key, operation = ctx.operation(), "cache hit");
                ctx.insert_metadata("cache", "hit");
                return Response::success(value);
            }
            Ok(None) => {
                ctx.insert_metadata("cache", "miss");
            }
            Err(err) => match self.on_failure {
                CacheFailurePolicy::Fail => return Response::failure(Self::unavailable(&err)),
                CacheFailurePolicy::Bypass => {
                    tracing::warn!(key = %key, error = %err, "cache read failed, treating as miss");
                    ctx.insert_metadata("cache", "bypass");
                }
            },
        }

        let response = next.run(ctx, call).await;
        let Some(value) = response.value().cloned() else {
            return response;
        };

        if let Err(err) = self.store.set(&key, value, self.ttl).await {
            match self.on_failure {
                CacheFailurePolicy::Fail => return Response::failure(Self::unavailable(&err)),
                CacheFailurePolicy::Bypass => {
                    tracing::warn!(key = %key, error = %err, "cache write failed");
                }
            }
        }
        response
    }
}
