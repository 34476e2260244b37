//! Credential attachment.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{Payload, ProxyError, RequestContext, Response};
use http::header::{HeaderValue, AUTHORIZATION};

use crate::chain::{order, Call, Interceptor, Next};

/// Supplies the `Authorization` value for outbound calls.
///
/// `Ok(None)` means the call proceeds without credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self, ctx: &RequestContext) -> anyhow::Result<Option<HeaderValue>>;
}

/// Fixed credential, e.g. a service token from configuration.
#[derive(Clone)]
pub struct StaticCredential {
    value: HeaderValue,
}

impl StaticCredential {
    /// `Authorization: Bearer <token>`.
    ///
    /// # Errors
    ///
    /// Returns an error if the token contains characters not allowed in a
    /// header value.
    pub fn bearer(token: &str) -> anyhow::Result<Self> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
        value.set_sensitive(true);
        Ok(Self { value })
    }
}

impl std::fmt::Debug for StaticCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredential").finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn credential(&self, _ctx: &RequestContext) -> anyhow::Result<Option<HeaderValue>> {
        Ok(Some(self.value.clone()))
    }
}

/// Attaches credentials before anything else runs.
///
/// A provider failure rejects the call with `ProxyError::Unauthorized`
/// without reaching the inner stages.
#[derive(Clone)]
pub struct SecurityInterceptor {
    provider: Arc<dyn CredentialProvider>,
}

impl SecurityInterceptor {
    #[must_use]
    pub fn new(provider: Arc<dyn CredentialProvider>) -> Self {
        Self { provider }
    }
}

impl std::fmt::Debug for SecurityInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityInterceptor").finish_non_exhaustive()
    }
}

#[async_trait]
impl Interceptor for SecurityInterceptor {
    fn name(&self) -> &'static str {
        "security"
    }

    fn order(&self) -> i32 {
        order::SECURITY
    }

    async fn intercept(
        &self,
        ctx: &mut RequestContext,
        call: &Call,
        next: Next<'_>,
    ) -> Response<Payload> {
        match self.provider.credential(ctx).await {
            Ok(Some(mut value)) => {
                value.set_sensitive(true);
                ctx.headers_mut().insert(AUTHORIZATION, value);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    operation = ctx.operation(),
                    error = %err,
                    "credential provider failed"
                );
                return Response::failure(ProxyError::Unauthorized {
                    reason: err.to_string(),
                });
            }
        }
        next.run(ctx, call).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use conduit_core::{EndpointResolution, RequestType};
    use futures_util::future::BoxFuture;
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::chain::InterceptorChain;
    use crate::dispatch::{Dispatch, Terminal};

    /// Captures the headers the terminal was dispatched with.
    #[derive(Default)]
    struct HeaderCapture {
        seen: Mutex<Option<http::HeaderMap>>,
        calls: AtomicUsize,
    }

    impl Terminal for HeaderCapture {
        fn dispatch(&self, dispatch: Dispatch) -> BoxFuture<'static, Result<Payload, ProxyError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen.lock() = Some(dispatch.context.headers().clone());
            Box::pin(async { Ok(json!(true)) })
        }
    }

    struct Failing;

    #[async_trait]
    impl CredentialProvider for Failing {
        async fn credential(&self, _ctx: &RequestContext) -> anyhow::Result<Option<HeaderValue>> {
            anyhow::bail!("token expired")
        }
    }

    fn run_with(provider: Arc<dyn CredentialProvider>, capture: &HeaderCapture) -> Response<Payload> {
        let chain = InterceptorChain::new(vec![
            Arc::new(SecurityInterceptor::new(provider)) as Arc<dyn Interceptor>
        ]);
        let mut ctx = RequestContext::new("Ping", RequestType::named("PingRequest"));
        let call = Call::new(EndpointResolution::Local, json!({}));
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(chain.execute(&mut ctx, &call, capture))
    }

    #[test]
    fn attaches_bearer_token() {
        let capture = HeaderCapture::default();
        let resp = run_with(Arc::new(StaticCredential::bearer("s3cret").unwrap()), &capture);

        assert!(resp.is_success());
        let headers = capture.seen.lock().clone().unwrap();
        let value = &headers[AUTHORIZATION];
        assert_eq!(value, "Bearer s3cret");
        assert!(value.is_sensitive());
    }

    #[test]
    fn provider_failure_rejects_before_dispatch() {
        let capture = HeaderCapture::default();
        let resp = run_with(Arc::new(Failing), &capture);

        assert_eq!(
            resp.error(),
            Some(&ProxyError::Unauthorized {
                reason: "token expired".into()
            })
        );
        assert_eq!(capture.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn debug_output_hides_token() {
        let cred = StaticCredential::bearer("s3cret").unwrap();
        assert!(!format!("{cred:?}").contains("s3cret"));
    }

    #[test]
    fn rejects_token_with_control_characters() {
        assert!(StaticCredential::bearer("bad\ntoken").is_err());
    }
}
