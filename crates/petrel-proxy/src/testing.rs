//! Scripted in-process backend for exercising the dispatchers.
//!
//! Tests register one reply per (method, endpoint) pair; the backend records
//! every request it serves, draining streamed bodies the way a real object
//! server would so the 100-continue pipeline runs end to end.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use http::{HeaderMap, Method, StatusCode};
use tokio::sync::Mutex;

use crate::backend::{BackendBody, BackendClient, BackendRequest};
use crate::error::ProxyError;
use crate::response::Response;

/// One scripted reply.
pub struct ScriptedReply {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    delay: Duration,
    read_body: bool,
    hang: bool,
    transport_error: bool,
}

impl ScriptedReply {
    /// Reply with the given status after draining any request body.
    pub fn status(code: u16) -> Self {
        Self {
            status: StatusCode::from_u16(code).expect("valid status code"),
            headers: HeaderMap::new(),
            body: Bytes::new(),
            delay: Duration::ZERO,
            read_body: true,
            hang: false,
            transport_error: false,
        }
    }

    /// Fail at the transport layer (no HTTP response at all).
    pub fn transport_error() -> Self {
        let mut reply = Self::status(500);
        reply.transport_error = true;
        reply.read_body = false;
        reply
    }

    /// Never respond.
    pub fn hang() -> Self {
        let mut reply = Self::status(500);
        reply.hang = true;
        reply.read_body = false;
        reply
    }

    /// Add a response header.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        crate::builder::set_header(&mut self.headers, name, value);
        self
    }

    /// Set the response body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Delay before responding.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Respond without ever polling the request body, like a replica
    /// refusing the 100-continue handshake.
    pub fn refuse_body(mut self) -> Self {
        self.read_body = false;
        self
    }
}

/// A request as the scripted backend observed it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// Request method.
    pub method: Method,
    /// Full request URL.
    pub url: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Drained request body (empty when the reply refused it).
    pub body: Bytes,
}

struct Rule {
    method: Method,
    endpoint: String,
    reply: ScriptedReply,
}

/// Scripted [`BackendClient`] implementation.
#[derive(Default)]
pub struct ScriptedBackend {
    rules: Vec<Rule>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedBackend {
    /// An empty script; unmatched requests answer 404.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a reply for requests of `method` whose URL contains
    /// `endpoint` (typically a `host:port` pair).
    pub fn on(mut self, method: &str, endpoint: &str, reply: ScriptedReply) -> Self {
        self.rules.push(Rule {
            method: Method::from_bytes(method.as_bytes()).expect("valid method"),
            endpoint: endpoint.to_string(),
            reply,
        });
        self
    }

    /// Every request served so far.
    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().await.clone()
    }

    /// Number of requests served so far.
    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    fn find(&self, method: &Method, url: &str) -> Option<&Rule> {
        self.rules
            .iter()
            .find(|r| r.method == *method && url.contains(&r.endpoint))
    }
}

#[async_trait::async_trait]
impl BackendClient for ScriptedBackend {
    async fn execute(&self, req: BackendRequest) -> Result<Response, ProxyError> {
        let Some(rule) = self.find(&req.method, &req.url) else {
            return Ok(Response::stub(StatusCode::NOT_FOUND, "unscripted endpoint"));
        };

        let mut body = BytesMut::new();
        if let BackendBody::Stream(mut stream) = req.body
            && rule.reply.read_body
        {
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => body.extend_from_slice(&bytes),
                    Err(e) => return Err(ProxyError::Transport(e.to_string())),
                }
            }
        }

        self.requests.lock().await.push(RecordedRequest {
            method: req.method,
            url: req.url,
            headers: req.headers,
            body: body.freeze(),
        });

        if rule.reply.hang {
            std::future::pending::<()>().await;
        }
        if rule.reply.delay > Duration::ZERO {
            tokio::time::sleep(rule.reply.delay).await;
        }
        if rule.reply.transport_error {
            return Err(ProxyError::Transport("scripted transport error".to_string()));
        }
        Ok(Response::with_body(
            rule.reply.status,
            rule.reply.headers.clone(),
            rule.reply.body.clone(),
        ))
    }
}
