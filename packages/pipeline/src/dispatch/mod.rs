//! Terminal dispatchers: the innermost operation that actually produces a
//! result, either by running an in-process handler or by forwarding the call
//! over a transport.
//!
//! Dispatchers are Tower services over [`Dispatch`]. The chain reaches them
//! through the object-safe [`Terminal`] adapter, so any
//! `Service<Dispatch>` (including one wrapped in Tower layers) can terminate a
//! chain.

pub mod local;
pub mod remote;
pub mod transport;

use std::task::{Context, Poll};

use conduit_core::{EndpointResolution, Payload, ProxyError, RequestContext};
use futures_util::future::BoxFuture;
use tower::{Service, ServiceExt};

pub use local::{Handler, HandlerRegistry, LocalDispatcher};
pub use remote::{RemoteDispatcher, WireFormat};
pub use transport::{HttpTransport, Transport, TransportError, TransportRequest, TransportResponse};

/// One terminal invocation: an immutable snapshot of the call context, the
/// routing decision and the encoded request body.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub context: RequestContext,
    pub resolution: EndpointResolution,
    pub body: Payload,
}

// ---------------------------------------------------------------------------
// Terminal (type-erased adapter)
// ---------------------------------------------------------------------------

/// Object-safe view of a terminal dispatcher.
///
/// Implemented for every cloneable `tower::Service<Dispatch>`; each call
/// drives a fresh clone to readiness with `oneshot`.
pub trait Terminal: Send + Sync {
    fn dispatch(&self, dispatch: Dispatch) -> BoxFuture<'static, Result<Payload, ProxyError>>;
}

impl<S> Terminal for S
where
    S: Service<Dispatch, Response = Payload, Error = ProxyError> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    fn dispatch(&self, dispatch: Dispatch) -> BoxFuture<'static, Result<Payload, ProxyError>> {
        Box::pin(self.clone().oneshot(dispatch))
    }
}

// ---------------------------------------------------------------------------
// DispatchRouter
// ---------------------------------------------------------------------------

/// Routes a [`Dispatch`] to the local or remote dispatcher according to its
/// resolution.
///
/// A remote resolution with no remote dispatcher configured fails with
/// `ProxyError::Internal`: that is a wiring defect, not a transport failure.
#[derive(Clone)]
pub struct DispatchRouter {
    local: LocalDispatcher,
    remote: Option<RemoteDispatcher>,
}

impl DispatchRouter {
    #[must_use]
    pub fn new(local: LocalDispatcher, remote: Option<RemoteDispatcher>) -> Self {
        Self { local, remote }
    }
}

impl Service<Dispatch> for DispatchRouter {
    type Response = Payload;
    type Error = ProxyError;
    type Future = BoxFuture<'static, Result<Payload, ProxyError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Both dispatchers are always ready; readiness is checked per call.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, dispatch: Dispatch) -> Self::Future {
        if dispatch.resolution.is_local() {
            return self.local.call(dispatch);
        }
        match self.remote.as_mut() {
            Some(remote) => remote.call(dispatch),
            None => {
                let message = format!(
                    "no transport configured for remote service {}",
                    dispatch.resolution.service_name().unwrap_or("-")
                );
                Box::pin(async move { Err(ProxyError::Internal { message }) })
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

    use conduit_core::RequestType;
    use http::Uri;
    use serde_json::json;

    use super::*;

    fn make_dispatch(resolution: EndpointResolution) -> Dispatch {
        Dispatch {
            context: RequestContext::new("Echo", RequestType::named("EchoRequest")),
            resolution,
            body: json!({"text": "hi"}),
        }
    }

    fn local_router() -> DispatchRouter {
        let handlers = Arc::new(HandlerRegistry::new());
        handlers.register_raw(RequestType::named("EchoRequest"), |body, _ctx| async move {
            Ok(body)
        });
        DispatchRouter::new(LocalDispatcher::new(handlers), None)
    }

    #[tokio::test]
    async fn routes_local_resolution_to_handler() {
        let router = local_router();
        let out = router
            .oneshot(make_dispatch(EndpointResolution::Local))
            .await
            .unwrap();
        assert_eq!(out, json!({"text": "hi"}));
    }

    #[tokio::test]
    async fn remote_without_transport_is_internal_error() {
        let router = local_router();
        let err = router
            .oneshot(make_dispatch(EndpointResolution::Remote {
                service_name: "echo".into(),
                uri: Uri::from_static("http://echo:80"),
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Internal { message } if message.contains("echo")));
    }

    #[tokio::test]
    async fn router_is_usable_as_terminal() {
        let router = local_router();
        let terminal: &dyn Terminal = &router;
        let out = terminal
            .dispatch(make_dispatch(EndpointResolution::Local))
            .await
            .unwrap();
        assert_eq!(out["text"], "hi");
    }
}
