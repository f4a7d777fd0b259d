//! Backend HTTP transport: the [`BackendClient`] seam and its reqwest
//! implementation.
//!
//! Dispatchers talk to storage nodes exclusively through [`BackendClient`],
//! so fan-out behavior is testable against scripted backends
//! (see [`crate::testing`]).

use std::fmt;
use std::io;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::BoxStream;
use http::{HeaderMap, Method};

use crate::error::ProxyError;
use crate::response::Response;

/// Dial timeout for backend connections.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Idle pooled connections are dropped after this long.
pub const IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
/// Total timeout for control-path requests (HEAD/POST/DELETE, metadata).
pub const CONTROL_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Total timeout for object body transfers.
pub const OBJECT_TRANSFER_TIMEOUT: Duration = Duration::from_secs(120 * 60);

/// Body of a backend request.
pub enum BackendBody {
    /// No body.
    Empty,
    /// A streamed body; polled only once the backend wants it.
    Stream(BoxStream<'static, Result<Bytes, io::Error>>),
}

impl fmt::Debug for BackendBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendBody::Empty => write!(f, "Empty"),
            BackendBody::Stream(_) => write!(f, "Stream"),
        }
    }
}

/// One wire request against a backend device.
#[derive(Debug)]
pub struct BackendRequest {
    /// HTTP method (including the extension method `GREP`).
    pub method: Method,
    /// Fully-formed backend URL:
    /// `scheme://host:port/device/partition/account[/container[/object]]`.
    pub url: String,
    /// Headers to send.
    pub headers: HeaderMap,
    /// Request body.
    pub body: BackendBody,
    /// Total per-request timeout.
    pub timeout: Duration,
}

impl BackendRequest {
    /// A bodyless request with the control-path timeout.
    pub fn new(method: Method, url: String) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: BackendBody::Empty,
            timeout: CONTROL_REQUEST_TIMEOUT,
        }
    }
}

/// Transport seam between the dispatchers and the cluster.
///
/// `Err` means the request never produced an HTTP response (dial failure,
/// reset, timeout); the dispatchers treat that as a retryable 500.
#[async_trait::async_trait]
pub trait BackendClient: Send + Sync {
    /// Execute one backend request to completion of its response head.
    async fn execute(&self, req: BackendRequest) -> Result<Response, ProxyError>;
}

/// The production [`BackendClient`]: a shared reqwest client with the
/// cluster dial/idle tuning.
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    /// Build the backend HTTP client.
    pub fn new() -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(IDLE_CONNECTION_TIMEOUT)
            .build()
            .map_err(|e| ProxyError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl BackendClient for HttpBackend {
    async fn execute(&self, req: BackendRequest) -> Result<Response, ProxyError> {
        let mut builder = self
            .client
            .request(req.method, &req.url)
            .headers(req.headers)
            .timeout(req.timeout);
        builder = match req.body {
            BackendBody::Empty => builder,
            BackendBody::Stream(stream) => builder.body(reqwest::Body::wrap_stream(stream)),
        };
        let resp = builder
            .send()
            .await
            .map_err(|e| ProxyError::Transport(e.to_string()))?;
        Ok(Response::from_backend(resp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_request_defaults() {
        let req = BackendRequest::new(Method::HEAD, "http://10.0.0.1:6000/sda/1/a".to_string());
        assert_eq!(req.timeout, CONTROL_REQUEST_TIMEOUT);
        assert!(matches!(req.body, BackendBody::Empty));
        assert!(req.headers.is_empty());
    }

    #[test]
    fn test_http_backend_builds() {
        assert!(HttpBackend::new().is_ok());
    }
}
