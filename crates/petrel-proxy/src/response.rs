//! The [`Response`] value every dispatch operation returns.

use std::fmt;
use std::io;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use http::{HeaderMap, StatusCode};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::error::ProxyError;

/// A client-visible response assembled by a dispatcher.
///
/// Either wraps a live backend response (status, headers, and a streaming
/// body) or is a *stub*: a synthetic response with an empty body and the
/// textual reason kept in the detail field, used to signal errors without a
/// backend round-trip.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
    detail: Option<String>,
}

enum ResponseBody {
    Empty,
    Bytes(Bytes),
    Backend(reqwest::Response),
}

impl Response {
    /// A synthetic response with no backend round-trip behind it.
    pub fn stub(status: StatusCode, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self {
            status,
            headers: HeaderMap::new(),
            body: ResponseBody::Empty,
            detail: if detail.is_empty() { None } else { Some(detail) },
        }
    }

    /// Wrap a backend response, keeping its body streamable.
    pub fn from_backend(resp: reqwest::Response) -> Self {
        Self {
            status: resp.status(),
            headers: resp.headers().clone(),
            body: ResponseBody::Backend(resp),
            detail: None,
        }
    }

    /// A response with an in-memory body (test doubles, local surfaces).
    pub fn with_body(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body: ResponseBody::Bytes(body),
            detail: None,
        }
    }

    /// HTTP status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Status class: `status / 100`.
    pub fn status_class(&self) -> u16 {
        self.status.as_u16() / 100
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable response headers (normalization by the dispatcher).
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The stub reason, when this response never reached a backend.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Collect the whole body.
    pub async fn bytes(self) -> Result<Bytes, ProxyError> {
        match self.body {
            ResponseBody::Empty => Ok(Bytes::new()),
            ResponseBody::Bytes(b) => Ok(b),
            ResponseBody::Backend(resp) => resp
                .bytes()
                .await
                .map_err(|e| ProxyError::Transport(e.to_string())),
        }
    }

    /// The body as a byte stream, consuming the response.
    pub fn into_stream(self) -> BoxStream<'static, Result<Bytes, io::Error>> {
        match self.body {
            ResponseBody::Empty => futures::stream::empty().boxed(),
            ResponseBody::Bytes(b) => futures::stream::once(async move { Ok(b) }).boxed(),
            ResponseBody::Backend(resp) => resp.bytes_stream().map(|r| r.map_err(io::Error::other)).boxed(),
        }
    }

    /// The body as an async reader, consuming the response.
    pub fn into_reader(self) -> impl AsyncRead + Send + Unpin {
        StreamReader::new(self.into_stream())
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("detail", &self.detail)
            .finish_non_exhaustive()
    }
}
