//! In-process dispatch: invokes the handler bound to a request type.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use conduit_core::{Payload, ProxyError, Request, RequestContext, RequestType};
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tower::Service;

use super::Dispatch;

/// Typed in-process handler for request type `R`.
#[async_trait]
pub trait Handler<R: Request>: Send + Sync + 'static {
    async fn handle(&self, request: R, ctx: &RequestContext) -> Result<R::Response, ProxyError>;
}

type HandlerFuture = BoxFuture<'static, Result<Payload, ProxyError>>;

type ErasedHandler = Arc<dyn Fn(Payload, RequestContext) -> HandlerFuture + Send + Sync>;

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// Handler lookup consumed by the local dispatcher.
///
/// Typed handlers are erased on registration: the adapter decodes the payload
/// into `R`, runs the handler and encodes `R::Response` back into a payload.
/// Registering a second handler for the same type replaces the first.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<RequestType, ErasedHandler>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a typed handler to `R`.
    pub fn register<R, H>(&self, handler: H)
    where
        R: Request,
        H: Handler<R>,
    {
        let handler = Arc::new(handler);
        self.insert(
            R::request_type(),
            Arc::new(move |body: Payload, ctx: RequestContext| -> HandlerFuture {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let request = decode_request::<R>(body)?;
                    let response = handler.handle(request, &ctx).await?;
                    encode_response::<R>(&response)
                })
            }),
        );
    }

    /// Binds an async closure to `R`.
    pub fn register_fn<R, F, Fut>(&self, f: F)
    where
        R: Request,
        F: Fn(R, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R::Response, ProxyError>> + Send + 'static,
    {
        self.insert(
            R::request_type(),
            Arc::new(move |body: Payload, ctx: RequestContext| -> HandlerFuture {
                match decode_request::<R>(body) {
                    Ok(request) => {
                        let fut = f(request, ctx);
                        Box::pin(async move { encode_response::<R>(&fut.await?) })
                    }
                    Err(err) => Box::pin(async move { Err(err) }),
                }
            }),
        );
    }

    /// Binds an untyped payload handler to `request_type`.
    pub fn register_raw<F, Fut>(&self, request_type: RequestType, f: F)
    where
        F: Fn(Payload, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Payload, ProxyError>> + Send + 'static,
    {
        self.insert(
            request_type,
            Arc::new(move |body: Payload, ctx: RequestContext| -> HandlerFuture {
                Box::pin(f(body, ctx))
            }),
        );
    }

    fn insert(&self, request_type: RequestType, handler: ErasedHandler) {
        if self.handlers.insert(request_type, handler).is_some() {
            tracing::warn!(
                request_type = request_type.name(),
                "handler replaced for request type"
            );
        }
    }

    #[must_use]
    pub fn contains(&self, request_type: RequestType) -> bool {
        self.handlers.contains_key(&request_type)
    }

    fn get(&self, request_type: RequestType) -> Option<ErasedHandler> {
        self.handlers
            .get(&request_type)
            .map(|entry| Arc::clone(entry.value()))
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

fn decode_request<R: Request>(body: Payload) -> Result<R, ProxyError> {
    serde_json::from_value(body).map_err(|err| {
        ProxyError::internal(format!(
            "failed to decode {} payload: {err}",
            R::request_type()
        ))
    })
}

fn encode_response<R: Request>(response: &R::Response) -> Result<Payload, ProxyError> {
    serde_json::to_value(response).map_err(|err| {
        ProxyError::internal(format!(
            "failed to encode {} response: {err}",
            R::request_type()
        ))
    })
}

// ---------------------------------------------------------------------------
// LocalDispatcher
// ---------------------------------------------------------------------------

/// Terminal dispatcher for locally resolved calls.
///
/// Fails with `HandlerNotFound` when no handler is bound, and with
/// `Cancelled` when the call's cancellation token fires before the handler
/// completes (the handler future is dropped). A handler that panics fails
/// the call with `Internal`; the panic never unwinds into the caller.
#[derive(Debug, Clone)]
pub struct LocalDispatcher {
    handlers: Arc<HandlerRegistry>,
}

impl LocalDispatcher {
    #[must_use]
    pub fn new(handlers: Arc<HandlerRegistry>) -> Self {
        Self { handlers }
    }
}

impl Service<Dispatch> for LocalDispatcher {
    type Response = Payload;
    type Error = ProxyError;
    type Future = BoxFuture<'static, Result<Payload, ProxyError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, dispatch: Dispatch) -> Self::Future {
        let request_type = dispatch.context.request_type();
        let Some(handler) = self.handlers.get(request_type) else {
            return Box::pin(async move {
                Err(ProxyError::HandlerNotFound {
                    request_type: request_type.name().to_string(),
                })
            });
        };

        let cancellation = dispatch.context.cancellation().clone();
        let started = std::panic::catch_unwind(AssertUnwindSafe(|| {
            handler(dispatch.body, dispatch.context)
        }));
        let fut = match started {
            Ok(fut) => AssertUnwindSafe(fut).catch_unwind(),
            Err(panic) => {
                let err = handler_panicked(request_type, &*panic);
                return Box::pin(async move { Err(err) });
            }
        };
        Box::pin(async move {
            tokio::select! {
                biased;
                () = cancellation.cancelled() => Err(ProxyError::Cancelled),
                result = fut => result.unwrap_or_else(|panic| {
                    Err(handler_panicked(request_type, &*panic))
                }),
            }
        })
    }
}

fn handler_panicked(request_type: RequestType, panic: &(dyn Any + Send)) -> ProxyError {
    let message = panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload");
    tracing::error!(
        request_type = request_type.name(),
        panic = message,
        "handler panicked"
    );
    ProxyError::internal(format!("handler for {request_type} panicked: {message}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
