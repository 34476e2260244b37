//! Load-shedding interceptor.
//!
//! Rejects calls when the number in flight reaches `max_concurrent` with
//! `ProxyError::Overloaded` instead of queueing them.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{Payload, ProxyError, RequestContext, Response};
use tokio::sync::Semaphore;

use crate::chain::{order, Call, Interceptor, Next};

/// Concurrency limiter built on a semaphore.
///
/// A permit is held for the whole inner chain and released when it returns.
#[derive(Debug, Clone)]
pub struct LoadShedInterceptor {
    semaphore: Arc<Semaphore>,
}

impl LoadShedInterceptor {
    #[must_use]
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Permits currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[async_trait]
impl Interceptor for LoadShedInterceptor {
    fn name(&self) -> &'static str {
        "load_shed"
    }

    fn order(&self) -> i32 {
        order::LOAD_SHED
    }

    async fn intercept(
        &self,
        ctx: &mut RequestContext,
        call: &Call,
        next: Next<'_>,
    ) -> Response<Payload> {
        let Ok(_permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
            tracing::warn!(operation = ctx.operation(), "call shed: too many in flight");
            return Response::failure(ProxyError::Overloaded);
        };
        next.run(ctx, call).await
    }
}
