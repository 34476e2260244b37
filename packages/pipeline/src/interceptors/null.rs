//! Inert interceptors: behaviorally identical to absence from the chain.
//!
//! Production chains leave disabled concerns out entirely; these exist as
//! placeholders for tests and fixtures.

use async_trait::async_trait;
use conduit_core::{Payload, RequestContext, Response};

use crate::chain::{order, Call, Interceptor, Next};

/// Cross-cutting concerns with a reserved order band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Concern {
    Security,
    Telemetry,
    Correlation,
    Logging,
    Resilience,
    Retry,
    Audit,
}

impl Concern {
    /// The band the built-in stage for this concern uses.
    #[must_use]
    pub fn default_order(self) -> i32 {
        match self {
            Self::Security => order::SECURITY,
            Self::Telemetry => order::TELEMETRY,
            Self::Correlation => order::CORRELATION,
            Self::Logging => order::LOGGING,
            Self::Resilience => order::RESILIENCE,
            Self::Retry => order::RETRY,
            Self::Audit => order::AUDIT,
        }
    }
}

/// Calls `next` exactly once with the unmodified context and returns its
/// result untouched.
#[derive(Debug, Clone, Copy)]
pub struct NullInterceptor {
    concern: Concern,
    order: i32,
}

impl NullInterceptor {
    #[must_use]
    pub fn new(concern: Concern) -> Self {
        Self {
            concern,
            order: concern.default_order(),
        }
    }

    #[must_use]
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    #[must_use]
    pub fn security() -> Self {
        Self::new(Concern::Security)
    }

    #[must_use]
    pub fn telemetry() -> Self {
        Self::new(Concern::Telemetry)
    }

    #[must_use]
    pub fn correlation() -> Self {
        Self::new(Concern::Correlation)
    }

    #[must_use]
    pub fn logging() -> Self {
        Self::new(Concern::Logging)
    }

    #[must_use]
    pub fn resilience() -> Self {
        Self::new(Concern::Resilience)
    }

    #[must_use]
    pub fn retry() -> Self {
        Self::new(Concern::Retry)
    }

    #[must_use]
    pub fn audit() -> Self {
        Self::new(Concern::Audit)
    }

    #[must_use]
    pub fn concern(&self) -> Concern {
        self.concern
    }
}

#[async_trait]
impl Interceptor for NullInterceptor {
    fn name(&self) -> &'static str {
        match self.concern {
            Concern::Security => "null_security",
            Concern::Telemetry => "null_telemetry",
            Concern::Correlation => "null_correlation",
            Concern::Logging => "null_logging",
            Concern::Resilience => "null_resilience",
            Concern::Retry => "null_retry",
            Concern::Audit => "null_audit",
        }
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
        next.run(ctx, call).await
    }
}
