//! Typed entry point: resolves, encodes, runs the chain and decodes.

use std::sync::Arc;
use std::time::Duration;

use conduit_core::{EndpointResolution, Payload, ProxyError, Request, RequestContext, Response};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Uri};
use tokio_util::sync::CancellationToken;

use crate::builder::PipelineBuilder;
use crate::chain::{Call, InterceptorChain};
use crate::config::{ConfigError, PipelineConfig};
use crate::dispatch::remote::endpoint_url;
use crate::dispatch::{DispatchRouter, HandlerRegistry};
use crate::resolver::EndpointResolver;

/// Per-call inputs that are not part of the request itself.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub correlation_id: Option<String>,
    pub headers: HeaderMap,
    /// Overrides the configured default time budget for this call.
    pub timeout: Option<Duration>,
    pub cancellation: Option<CancellationToken>,
}

impl CallOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// A composed dispatch pipeline.
///
/// Holds no call-scoped state: every call gets its own [`RequestContext`],
/// so one `Pipeline` (usually behind an `Arc`) serves concurrent callers.
pub struct Pipeline {
    resolver: EndpointResolver,
    chain: InterceptorChain,
    router: DispatchRouter,
    handlers: Arc<HandlerRegistry>,
    path_prefix: String,
}

impl Pipeline {
    pub(crate) fn from_parts(
        resolver: EndpointResolver,
        chain: InterceptorChain,
        router: DispatchRouter,
        handlers: Arc<HandlerRegistry>,
        path_prefix: String,
    ) -> Self {
        Self {
            resolver,
            chain,
            router,
            handlers,
            path_prefix,
        }
    }

    /// Builder with no stages and local-only routing.
    #[must_use]
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Assembles the stages, registry and transport `config` describes.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` for invalid routes, headers, credentials or a
    /// transport that cannot be initialized.
    pub fn from_config(config: PipelineConfig) -> Result<Self, ConfigError> {
        PipelineBuilder::new().config(config).build()
    }

    /// Handlers served in-process. New handlers may be bound at any time.
    #[must_use]
    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    #[must_use]
    pub fn chain(&self) -> &InterceptorChain {
        &self.chain
    }

    #[must_use]
    pub fn resolver(&self) -> &EndpointResolver {
        &self.resolver
    }

    /// Dispatches `request` with default options.
    pub async fn invoke<R: Request>(&self, request: R) -> Response<R::Response> {
        self.invoke_with(request, CallOptions::default()).await
    }

    /// Dispatches `request` through the chain and decodes the typed response.
    ///
    /// Every outcome, including encoding and routing failures, is reported
    /// through the returned `Response`; the response always carries the
    /// call's correlation id (when one was assigned) and elapsed time.
    pub async fn invoke_with<R: Request>(
        &self,
        request: R,
        options: CallOptions,
    ) -> Response<R::Response> {
        let request_type = R::request_type();
        let resolution = self.resolver.resolve(request_type);

        let mut ctx = RequestContext::new(R::OPERATION, request_type)
            .with_method(R::method())
            .with_correlation_id(options.correlation_id)
            .with_headers(options.headers)
            .with_parameters(request.cache_key_parts())
            .with_cacheable(R::CACHEABLE)
            .with_timeout(options.timeout)
            .with_cancellation(options.cancellation.unwrap_or_default());

        let response = match self.prepare(&request, &resolution) {
            Ok((target, body)) => {
                ctx = ctx.with_target_url(target);
                let call = Call::new(resolution, body);
                self.chain.execute(&mut ctx, &call, &self.router).await
            }
            Err(err) => Response::failure(err),
        };

        response
            .try_map(decode_response::<R>)
            .with_correlation_id(ctx.correlation_id().map(str::to_string))
            .with_duration(ctx.elapsed())
    }

    fn prepare<R: Request>(
        &self,
        request: &R,
        resolution: &EndpointResolution,
    ) -> Result<(Option<Uri>, Payload), ProxyError> {
        let target = resolution
            .uri()
            .map(|base| endpoint_url(base, &self.path_prefix, R::OPERATION))
            .transpose()?;
        let body = serde_json::to_value(request).map_err(|err| {
            ProxyError::internal(format!("failed to encode {}: {err}", R::request_type()))
        })?;
        Ok((target, body))
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("chain", &self.chain)
            .field("resolver", &self.resolver)
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

fn decode_response<R: Request>(payload: Payload) -> Result<R::Response, ProxyError> {
    serde_json::from_value(payload).map_err(|err| {
        ProxyError::internal(format!(
            "failed to decode {} response: {err}",
            R::request_type()
        ))
    })
}

#[cfg(test)]
mod tests {
    use conduit_core::{KeyPart, RequestType, ServiceEntry};
    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::registry::StaticServiceRegistry;

    #[derive(Debug, Serialize, Deserialize)]
    struct GetUserRequest {
        id: i64,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct User {
        id: i64,
        name: String,
    }

    impl Request for GetUserRequest {
        type Response = User;
        const OPERATION: &'static str = "GetUser";
        const CACHEABLE: bool = true;

        fn cache_key_parts(&self) -> Vec<KeyPart> {
            vec![KeyPart::from(self.id)]
        }
    }

    #[tokio::test]
    async fn local_call_round_trips_typed_values() {
        let pipeline = Pipeline::builder().build().unwrap();
        pipeline
            .handlers()
            .register_fn(|req: GetUserRequest, _ctx| async move {
                Ok(User {
                    id: req.id,
                    name: "Ada".into(),
                })
            });

        let resp = pipeline
            .invoke_with(
                GetUserRequest { id: 42 },
                CallOptions::new().with_correlation_id("c-42"),
            )
            .await;
        assert_eq!(
            resp.value(),
            Some(&User {
                id: 42,
                name: "Ada".into()
            })
        );
        assert_eq!(resp.correlation_id(), Some("c-42"));
        assert!(resp.duration().is_some());
    }

    #[tokio::test]
    async fn unbound_local_type_is_handler_not_found() {
        let pipeline = Pipeline::builder().build().unwrap();
        let resp = pipeline.invoke(GetUserRequest { id: 1 }).await;
        assert_eq!(
            resp.error(),
            Some(&ProxyError::HandlerNotFound {
                request_type: "GetUserRequest".into()
            })
        );
    }

    #[tokio::test]
    async fn mismatched_handler_output_is_internal_error() {
        let pipeline = Pipeline::builder().build().unwrap();
        pipeline
            .handlers()
            .register_raw(GetUserRequest::request_type(), |_body, _ctx| async move {
                Ok(serde_json::json!("not a user"))
            });
        let resp = pipeline.invoke(GetUserRequest { id: 1 }).await;
        assert!(matches!(resp.error(), Some(ProxyError::Internal { .. })));
    }

    #[tokio::test]
    async fn remote_route_without_transport_fails_cleanly() {
        let registry = StaticServiceRegistry::new();
        registry
            .register(
                RequestType::named("GetUserRequest"),
                ServiceEntry::remote("users", Uri::from_static("http://users:8080")),
            )
            .unwrap();
        let pipeline = Pipeline::builder()
            .registry(Arc::new(registry))
            .build()
            .unwrap();

        let resp = pipeline.invoke(GetUserRequest { id: 1 }).await;
        assert!(matches!(resp.error(), Some(ProxyError::Internal { .. })));
    }
}
