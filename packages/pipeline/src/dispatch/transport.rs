//! Transport boundary consumed by the remote dispatcher, plus an HTTP
//! implementation on `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};
use tokio_util::sync::CancellationToken;

/// One outbound call as the transport sees it.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Raw answer from the peer. Any status is a successful transport exchange;
/// interpreting it is the dispatcher's job.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Failures of the exchange itself (no usable answer from the peer).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport timed out")]
    Timeout,
    #[error("transport cancelled")]
    Cancelled,
    #[error("transport I/O failure: {0}")]
    Io(String),
}

/// Wire-level sender used by [`RemoteDispatcher`](super::RemoteDispatcher).
///
/// Implementations must abort promptly when `cancellation` fires and report
/// `TransportError::Cancelled`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: TransportRequest,
        cancellation: &CancellationToken,
    ) -> Result<TransportResponse, TransportError>;
}

// ---------------------------------------------------------------------------
// HttpTransport
// ---------------------------------------------------------------------------

/// HTTP transport backed by a shared `reqwest::Client` (connection pooling is
/// per transport instance).
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport whose requests time out after `request_timeout`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Io` if the HTTP client cannot be initialized
    /// (e.g. the TLS backend fails to load).
    pub fn new(request_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| TransportError::Io(err.to_string()))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn map_reqwest_error(err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Io(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: TransportRequest,
        cancellation: &CancellationToken,
    ) -> Result<TransportResponse, TransportError> {
        let pending = self
            .client
            .request(request.method, request.url.to_string())
            .headers(request.headers)
            .body(request.body)
            .send();

        let exchange = async {
            let response = pending.await.map_err(|err| map_reqwest_error(&err))?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|err| map_reqwest_error(&err))?;
            Ok(TransportResponse {
                status,
                headers,
                body,
            })
        };

        tokio::select! {
            biased;
            () = cancellation.cancelled() => Err(TransportError::Cancelled),
            result = exchange => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_timeout() {
        assert!(HttpTransport::new(Duration::from_secs(5)).is_ok());
    }

    #[tokio::test]
    async fn pre_cancelled_call_reports_cancelled() {
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let err = transport
            .send(
                TransportRequest {
                    method: Method::POST,
                    // Reserved TEST-NET address: never reached because the token already fired.
                    url: Uri::from_static("http://192.0.2.1:9/dispatch/Ping"),
                    headers: HeaderMap::new(),
                    body: Bytes::from_static(b"{}"),
                },
                &token,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Cancelled));
    }

    #[tokio::test]
    async fn unreachable_peer_is_connect_failure() {
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let err = transport
            .send(
                TransportRequest {
                    method: Method::POST,
                    // Port 1 on loopback: nothing listens there.
                    url: Uri::from_static("http://127.0.0.1:1/dispatch/Ping"),
                    headers: HeaderMap::new(),
                    body: Bytes::new(),
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::Connect(_) | TransportError::Io(_)
        ));
    }
}
