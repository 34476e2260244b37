//! Remote dispatch: encodes the call, sends it through a [`Transport`] and
//! maps every transport outcome into the `ProxyError` taxonomy.

use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use conduit_core::{EndpointResolution, Payload, ProxyError};
use futures_util::future::BoxFuture;
use http::header::{ACCEPT, CONTENT_TYPE};
use http::{HeaderValue, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use tower::Service;

use super::transport::{Transport, TransportError, TransportRequest, TransportResponse};
use super::Dispatch;

/// Body encoding used on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    #[default]
    Json,
    Msgpack,
}

impl WireFormat {
    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Msgpack => "application/msgpack",
        }
    }

    fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>, String> {
        match self {
            Self::Json => serde_json::to_vec(value).map_err(|e| e.to_string()),
            Self::Msgpack => rmp_serde::to_vec_named(value).map_err(|e| e.to_string()),
        }
    }

    fn decode<T: for<'de> Deserialize<'de>>(self, bytes: &[u8]) -> Result<T, String> {
        match self {
            Self::Json => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
            Self::Msgpack => rmp_serde::from_slice(bytes).map_err(|e| e.to_string()),
        }
    }
}

/// Business fault body a peer returns with `422 Unprocessable Entity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFault {
    pub code: String,
    pub message: String,
}

/// Builds `{base}{path_prefix}/{operation}` for a remote endpoint.
///
/// # Errors
///
/// Returns `ProxyError::Internal` if the joined string is not a valid URI.
pub fn endpoint_url(base: &Uri, path_prefix: &str, operation: &str) -> Result<Uri, ProxyError> {
    let base = base.to_string();
    let prefix = path_prefix.trim_matches('/');
    let joined = if prefix.is_empty() {
        format!("{}/{operation}", base.trim_end_matches('/'))
    } else {
        format!("{}/{prefix}/{operation}", base.trim_end_matches('/'))
    };
    joined
        .parse()
        .map_err(|err| ProxyError::internal(format!("invalid endpoint url {joined}: {err}")))
}

// ---------------------------------------------------------------------------
// RemoteDispatcher
// ---------------------------------------------------------------------------

/// Terminal dispatcher for remotely resolved calls.
#[derive(Clone)]
pub struct RemoteDispatcher {
    transport: Arc<dyn Transport>,
    format: WireFormat,
    path_prefix: Arc<str>,
}

impl RemoteDispatcher {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            format: WireFormat::Json,
            path_prefix: Arc::from("/dispatch"),
        }
    }

    #[must_use]
    pub fn with_format(mut self, format: WireFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_path_prefix(mut self, prefix: &str) -> Self {
        self.path_prefix = Arc::from(prefix);
        self
    }

    #[must_use]
    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    fn build_request(&self, dispatch: &Dispatch) -> Result<TransportRequest, ProxyError> {
        let EndpointResolution::Remote { uri, .. } = &dispatch.resolution else {
            return Err(ProxyError::internal(
                "remote dispatcher received a local resolution",
            ));
        };
        let url = endpoint_url(uri, &self.path_prefix, dispatch.context.operation())?;

        let body = self.format.encode(&dispatch.body).map_err(|err| {
            ProxyError::internal(format!("failed to encode request body: {err}"))
        })?;

        let mut headers = dispatch.context.headers().clone();
        let content_type = HeaderValue::from_static(self.format.content_type());
        headers.insert(CONTENT_TYPE, content_type.clone());
        headers.insert(ACCEPT, content_type);

        Ok(TransportRequest {
            method: dispatch.context.method().clone(),
            url,
            headers,
            body: Bytes::from(body),
        })
    }

    /// Interprets the peer's answer.
    fn map_response(format: WireFormat, response: &TransportResponse) -> Result<Payload, ProxyError> {
        let status = response.status;
        if status.is_success() {
            if response.body.is_empty() {
                return Ok(Payload::Null);
            }
            return format.decode(&response.body).map_err(|err| {
                ProxyError::NonRetryableTransport {
                    status: Some(status.as_u16()),
                    message: format!("undecodable response body: {err}"),
                }
            });
        }

        if status == StatusCode::UNPROCESSABLE_ENTITY {
            if let Ok(fault) = format.decode::<RemoteFault>(&response.body) {
                return Err(ProxyError::Business {
                    code: fault.code,
                    message: fault.message,
                });
            }
        }

        let message = String::from_utf8_lossy(&response.body).into_owned();
        if status.is_server_error()
            || status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
        {
            Err(ProxyError::RetryableTransport {
                status: Some(status.as_u16()),
                message,
            })
        } else {
            Err(ProxyError::NonRetryableTransport {
                status: Some(status.as_u16()),
                message,
            })
        }
    }
}

fn map_transport_error(err: TransportError) -> ProxyError {
    match err {
        TransportError::Cancelled => ProxyError::Cancelled,
        TransportError::Timeout => ProxyError::RetryableTransport {
            status: None,
            message: "transport timed out".to_string(),
        },
        TransportError::Connect(message) | TransportError::Io(message) => {
            ProxyError::RetryableTransport {
                status: None,
                message,
            }
        }
    }
}

impl Service<Dispatch> for RemoteDispatcher {
    type Response = Payload;
    type Error = ProxyError;
    type Future = BoxFuture<'static, Result<Payload, ProxyError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, dispatch: Dispatch) -> Self::Future {
        let request = self.build_request(&dispatch);
        let transport = Arc::clone(&self.transport);
        let format = self.format;
        let cancellation = dispatch.context.cancellation().clone();

        Box::pin(async move {
            let request = request?;
            tracing::debug!(
                method = %request.method,
                url = %request.url,
                "forwarding call"
            );
            let sent = tokio::select! {
                biased;
                () = cancellation.cancelled() => return Err(ProxyError::Cancelled),
                sent = transport.send(request, &cancellation) => sent,
            };
            let response = sent.map_err(map_transport_error)?;
            Self::map_response(format, &response)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use conduit_core::{RequestContext, RequestType};
    use http::HeaderMap;
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;

    /// Transport that replays one scripted answer and records what it was sent.
    struct ScriptedTransport {
        answer: Mutex<Option<Result<TransportResponse, TransportError>>>,
        seen: Mutex<Vec<TransportRequest>>,
        delay: Duration,
    }

    impl ScriptedTransport {
        fn answering(answer: Result<TransportResponse, TransportError>) -> Arc<Self> {
            Arc::new(Self {
                answer: Mutex::new(Some(answer)),
                seen: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            })
        }

        fn status(status: u16, body: &'static [u8]) -> Arc<Self> {
            Self::answering(Ok(TransportResponse {
                status: StatusCode::from_u16(status).unwrap(),
                headers: HeaderMap::new(),
                body: Bytes::from_static(body),
            }))
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(
            &self,
            request: TransportRequest,
            _cancellation: &CancellationToken,
        ) -> Result<TransportResponse, TransportError> {
            self.seen.lock().push(request);
            tokio::time::sleep(self.delay).await;
            self.answer
                .lock()
                .take()
                .unwrap_or(Err(TransportError::Io("script exhausted".into())))
        }
    }

    fn remote_dispatch(ctx: RequestContext) -> Dispatch {
        Dispatch {
            context: ctx,
            resolution: EndpointResolution::Remote {
                service_name: "users".into(),
                uri: Uri::from_static("http://users.prod.svc.cluster.local:8080"),
            },
            body: json!({"id": 42}),
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new("GetUser", RequestType::named("GetUserRequest"))
    }

    async fn run(transport: Arc<ScriptedTransport>) -> Result<Payload, ProxyError> {
        RemoteDispatcher::new(transport)
            .oneshot(remote_dispatch(ctx()))
            .await
    }

    #[test]
    fn endpoint_url_joins_prefix_and_operation() {
        let base = Uri::from_static("http://users:8080");
        assert_eq!(
            endpoint_url(&base, "/dispatch", "GetUser").unwrap(),
            Uri::from_static("http://users:8080/dispatch/GetUser")
        );
        assert_eq!(
            endpoint_url(&base, "", "GetUser").unwrap(),
            Uri::from_static("http://users:8080/GetUser")
        );
    }

    #[tokio::test]
    async fn success_decodes_body_and_sends_headers() {
        let transport = ScriptedTransport::status(200, br#"{"id":42,"name":"Ada"}"#);
        let out = run(transport.clone()).await.unwrap();
        assert_eq!(out, json!({"id": 42, "name": "Ada"}));

        let seen = transport.seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            seen[0].url,
            Uri::from_static("http://users.prod.svc.cluster.local:8080/dispatch/GetUser")
        );
        assert_eq!(seen[0].headers[CONTENT_TYPE], "application/json");
        assert_eq!(&seen[0].body[..], br#"{"id":42}"#);
    }

    #[tokio::test]
    async fn msgpack_round_trips_through_transport() {
        let body = rmp_serde::to_vec_named(&json!({"ok": true})).unwrap();
        let transport = ScriptedTransport::answering(Ok(TransportResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from(body),
        }));
        let out = RemoteDispatcher::new(transport.clone())
            .with_format(WireFormat::Msgpack)
            .oneshot(remote_dispatch(ctx()))
            .await
            .unwrap();
        assert_eq!(out, json!({"ok": true}));
        assert_eq!(
            transport.seen.lock()[0].headers[CONTENT_TYPE],
            "application/msgpack"
        );
    }

    #[tokio::test]
    async fn server_errors_are_retryable() {
        let err = run(ScriptedTransport::status(503, b"unavailable")).await.unwrap_err();
        assert_eq!(
            err,
            ProxyError::RetryableTransport {
                status: Some(503),
                message: "unavailable".into()
            }
        );
        let err = run(ScriptedTransport::status(429, b"")).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn client_errors_are_not_retryable() {
        let err = run(ScriptedTransport::status(404, b"no such user")).await.unwrap_err();
        assert_eq!(
            err,
            ProxyError::NonRetryableTransport {
                status: Some(404),
                message: "no such user".into()
            }
        );
    }

    #[tokio::test]
    async fn unprocessable_fault_is_business_error() {
        let err = run(ScriptedTransport::status(
            422,
            br#"{"code":"email_taken","message":"email already registered"}"#,
        ))
        .await
        .unwrap_err();
        assert_eq!(
            err,
            ProxyError::business("email_taken", "email already registered")
        );
    }

    #[tokio::test]
    async fn undecodable_success_is_not_retryable() {
        let err = run(ScriptedTransport::status(200, b"<html>")).await.unwrap_err();
        assert!(matches!(
            err,
            ProxyError::NonRetryableTransport { status: Some(200), .. }
        ));
    }

    #[tokio::test]
    async fn connection_failure_is_retryable() {
        let err = run(ScriptedTransport::answering(Err(TransportError::Connect(
            "refused".into(),
        ))))
        .await
        .unwrap_err();
        assert!(matches!(err, ProxyError::RetryableTransport { status: None, .. }));
    }

    #[tokio::test]
    async fn cancellation_aborts_in_flight_call() {
        let transport = Arc::new(ScriptedTransport {
            answer: Mutex::new(Some(Ok(TransportResponse {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: Bytes::new(),
            }))),
            seen: Mutex::new(Vec::new()),
            delay: Duration::from_secs(30),
        });
        let token = CancellationToken::new();
        let call = tokio::spawn(
            RemoteDispatcher::new(transport)
                .oneshot(remote_dispatch(ctx().with_cancellation(token.clone()))),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        assert_eq!(call.await.unwrap().unwrap_err(), ProxyError::Cancelled);
    }
}
