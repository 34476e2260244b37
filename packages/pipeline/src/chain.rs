//! Interceptor chain composition.
//!
//! Stages are sorted ascending by [`Interceptor::order`] (stable, so ties keep
//! registration order) and executed outermost-first. Each stage receives a
//! [`Next`] continuation for the rest of the chain; the last continuation
//! invokes the terminal dispatcher. This is equivalent to folding the stages
//! right-to-left around the terminal.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{EndpointResolution, Payload, RequestContext, Response};
use futures_util::future::BoxFuture;

use crate::dispatch::{Dispatch, Terminal};

/// Reserved order bands used by the built-in interceptors. Lower runs earlier.
pub mod order {
    pub const SECURITY: i32 = -200;
    pub const LOAD_SHED: i32 = -150;
    pub const TELEMETRY: i32 = -50;
    pub const CORRELATION: i32 = 0;
    pub const LOGGING: i32 = 100;
    pub const CACHE: i32 = 150;
    pub const RESILIENCE: i32 = 200;
    pub const TIMEOUT: i32 = 250;
    pub const RETRY: i32 = 300;
    pub const AUDIT: i32 = 400;
}

/// What the chain is dispatching: the routing decision and the encoded request.
#[derive(Debug, Clone)]
pub struct Call {
    pub resolution: EndpointResolution,
    pub body: Payload,
}

impl Call {
    #[must_use]
    pub fn new(resolution: EndpointResolution, body: Payload) -> Self {
        Self { resolution, body }
    }
}

/// One cross-cutting stage wrapped around the terminal dispatcher.
///
/// A stage may enrich the context, short-circuit by returning a failure
/// without calling `next`, call `next` (possibly several times) and
/// post-process its result. Observing stages must return the inner response
/// unchanged.
#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Short name used in logs and chain descriptions.
    fn name(&self) -> &'static str;

    /// Position in the chain; lower runs earlier (outermost).
    fn order(&self) -> i32;

    async fn intercept(
        &self,
        ctx: &mut RequestContext,
        call: &Call,
        next: Next<'_>,
    ) -> Response<Payload>;
}

// ---------------------------------------------------------------------------
// Next
// ---------------------------------------------------------------------------

/// Continuation for the remainder of the chain.
///
/// `Copy`, so a stage may invoke it more than once (retry).
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Interceptor>],
    terminal: &'a dyn Terminal,
}

impl<'a> Next<'a> {
    /// Runs the remaining stages and then the terminal dispatcher.
    ///
    /// The terminal receives a snapshot of the context as it stands at this
    /// point; terminal errors become `Response::failure`.
    pub fn run<'b>(self, ctx: &'b mut RequestContext, call: &'b Call) -> BoxFuture<'b, Response<Payload>>
    where
        'a: 'b,
    {
        if let Some((stage, rest)) = self.stages.split_first() {
            let next = Next {
                stages: rest,
                terminal: self.terminal,
            };
            return stage.intercept(ctx, call, next);
        }

        let dispatched = self.terminal.dispatch(Dispatch {
            context: ctx.clone(),
            resolution: call.resolution.clone(),
            body: call.body.clone(),
        });
        Box::pin(async move { Response::from(dispatched.await) })
    }

    /// Number of stages still to run before the terminal.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.stages.len()
    }
}

// ---------------------------------------------------------------------------
// InterceptorChain
// ---------------------------------------------------------------------------

/// Ordered set of present stages. A disabled concern is simply absent.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    stages: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    /// Builds a chain from stages in registration order.
    #[must_use]
    pub fn new(stages: impl IntoIterator<Item = Arc<dyn Interceptor>>) -> Self {
        let mut stages: Vec<_> = stages.into_iter().collect();
        stages.sort_by_key(|stage| stage.order());
        Self { stages }
    }

    /// Adds a stage; among equal orders it runs after those already present.
    pub fn push(&mut self, stage: Arc<dyn Interceptor>) {
        self.stages.push(stage);
        self.stages.sort_by_key(|stage| stage.order());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// `(name, order)` of each stage in execution order.
    #[must_use]
    pub fn describe(&self) -> Vec<(&'static str, i32)> {
        self.stages
            .iter()
            .map(|stage| (stage.name(), stage.order()))
            .collect()
    }

    /// Executes the composed chain around `terminal`.
    pub async fn execute(
        &self,
        ctx: &mut RequestContext,
        call: &Call,
        terminal: &dyn Terminal,
    ) -> Response<Payload> {
        Next {
            stages: &self.stages,
            terminal,
        }
        .run(ctx, call)
        .await
    }
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.describe()).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use conduit_core::{ProxyError, RequestType};
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::interceptors::{Concern, NullInterceptor};

    /// Terminal returning a fixed outcome and counting invocations.
    struct FixedTerminal {
        outcome: Result<Payload, ProxyError>,
        calls: AtomicUsize,
    }

    impl FixedTerminal {
        fn new(outcome: Result<Payload, ProxyError>) -> Self {
            Self {
                outcome,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Terminal for FixedTerminal {
        fn dispatch(&self, _dispatch: Dispatch) -> BoxFuture<'static, Result<Payload, ProxyError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = self.outcome.clone();
            Box::pin(async move { outcome })
        }
    }

    /// Stage that appends its label to a shared log on the way in and out.
    struct Recorder {
        label: String,
        order: i32,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Interceptor for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
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
            self.log.lock().push(format!("in:{}", self.label));
            let resp = next.run(ctx, call).await;
            self.log.lock().push(format!("out:{}", self.label));
            resp
        }
    }

    /// Stage that rejects without calling `next`.
    struct Reject;

    #[async_trait]
    impl Interceptor for Reject {
        fn name(&self) -> &'static str {
            "reject"
        }

        fn order(&self) -> i32 {
            0
        }

        async fn intercept(
            &self,
            _ctx: &mut RequestContext,
            _call: &Call,
            _next: Next<'_>,
        ) -> Response<Payload> {
            Response::failure(ProxyError::Unauthorized {
                reason: "denied".into(),
            })
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new("Ping", RequestType::named("PingRequest"))
    }

    fn call() -> Call {
        Call::new(EndpointResolution::Local, json!({}))
    }

    fn recorder(label: &str, order: i32, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Interceptor> {
        Arc::new(Recorder {
            label: label.to_string(),
            order,
            log: Arc::clone(log),
        })
    }

    fn entered(log: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
        log.lock()
            .iter()
            .filter_map(|entry| entry.strip_prefix("in:").map(str::to_string))
            .collect()
    }

    #[tokio::test]
    async fn executes_in_ascending_order_and_unwinds_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new(vec![
            recorder("c", 30, &log),
            recorder("a", -10, &log),
            recorder("b", 5, &log),
        ]);
        let terminal = FixedTerminal::new(Ok(json!("ok")));

        let resp = chain.execute(&mut ctx(), &call(), &terminal).await;

        assert_eq!(resp, Response::success(json!("ok")));
        assert_eq!(
            *log.lock(),
            vec!["in:a", "in:b", "in:c", "out:c", "out:b", "out:a"]
        );
        assert_eq!(terminal.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ties_keep_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = InterceptorChain::new(vec![recorder("first", 7, &log)]);
        chain.push(recorder("second", 7, &log));
        chain.push(recorder("early", -7, &log));

        chain
            .execute(&mut ctx(), &call(), &FixedTerminal::new(Ok(json!(1))))
            .await;
        assert_eq!(entered(&log), vec!["early", "first", "second"]);
    }

    #[tokio::test]
    async fn short_circuit_skips_inner_stages_and_terminal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = InterceptorChain::new(vec![
            recorder("outer", -1, &log),
            Arc::new(Reject),
            recorder("inner", 1, &log),
        ]);
        let terminal = FixedTerminal::new(Ok(json!("ok")));

        let resp = chain.execute(&mut ctx(), &call(), &terminal).await;

        assert!(matches!(resp.error(), Some(ProxyError::Unauthorized { .. })));
        assert_eq!(entered(&log), vec!["outer"]);
        assert_eq!(terminal.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn terminal_error_becomes_failure_response() {
        let chain = InterceptorChain::default();
        let terminal = FixedTerminal::new(Err(ProxyError::HandlerNotFound {
            request_type: "PingRequest".into(),
        }));
        let resp = chain.execute(&mut ctx(), &call(), &terminal).await;
        assert_eq!(
            resp.error(),
            Some(&ProxyError::HandlerNotFound {
                request_type: "PingRequest".into()
            })
        );
    }

    #[test]
    fn describe_lists_stages_in_execution_order() {
        let chain = InterceptorChain::new(vec![
            Arc::new(NullInterceptor::new(Concern::Audit)) as Arc<dyn Interceptor>,
            Arc::new(NullInterceptor::new(Concern::Security)),
        ]);
        assert_eq!(
            chain.describe(),
            vec![("null_security", order::SECURITY), ("null_audit", order::AUDIT)]
        );
    }

    fn arb_outcome() -> impl Strategy<Value = Result<Payload, ProxyError>> {
        prop_oneof![
            any::<i64>().prop_map(|v| Ok(json!(v))),
            Just(Err(ProxyError::Cancelled)),
            Just(Err(ProxyError::business("invalid", "bad input"))),
            Just(Err(ProxyError::RetryableTransport {
                status: Some(503),
                message: "busy".into()
            })),
            Just(Err(ProxyError::HandlerNotFound {
                request_type: "PingRequest".into()
            })),
        ]
    }

    fn block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(fut)
    }

    proptest! {
        #[test]
        fn any_registration_order_executes_by_ascending_order(
            orders in proptest::collection::vec(-5i32..5, 1..8),
        ) {
            let log = Arc::new(Mutex::new(Vec::new()));
            let stages: Vec<_> = orders
                .iter()
                .enumerate()
                .map(|(i, order)| recorder(&i.to_string(), *order, &log))
                .collect();
            let chain = InterceptorChain::new(stages);

            block_on(chain.execute(&mut ctx(), &call(), &FixedTerminal::new(Ok(json!(0)))));

            // Expected: indices sorted by order, ties by registration index.
            let mut expected: Vec<usize> = (0..orders.len()).collect();
            expected.sort_by_key(|&i| (orders[i], i));
            let expected: Vec<String> = expected.iter().map(ToString::to_string).collect();
            prop_assert_eq!(entered(&log), expected);
        }

        #[test]
        fn null_stage_is_transparent(
            outcome in arb_outcome(),
            position in -300i32..500,
        ) {
            let log = Arc::new(Mutex::new(Vec::new()));
            let base = vec![recorder("x", -100, &log), recorder("y", 100, &log)];

            let without = InterceptorChain::new(base.clone());
            let mut with = InterceptorChain::new(base);
            with.push(Arc::new(NullInterceptor::new(Concern::Logging).with_order(position)));

            let terminal = FixedTerminal::new(outcome);
            let a = block_on(without.execute(&mut ctx(), &call(), &terminal));
            let b = block_on(with.execute(&mut ctx(), &call(), &terminal));

            prop_assert_eq!(a, b);
            prop_assert_eq!(terminal.calls.load(Ordering::SeqCst), 2);
        }
    }
}
