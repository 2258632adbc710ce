//! Response accumulation and the standard error body.
//!
//! # Responsibilities
//! - Buffer status, headers and body written by handlers
//! - Track bytes written for access logging
//! - Hold a streaming body when a handler forwards one (proxy, files)
//! - Produce the final `Response<Body>` once the chain returns
//!
//! # Design Decisions
//! - Nothing reaches the socket until the chain returns, so an abort after
//!   a partial write can still replace the body
//! - Bodies are dropped for 1xx, 204 and 304

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use bytes::{Bytes, BytesMut};
use serde::Serialize;

use crate::error::BoxError;

/// Whether `status` may carry a response body.
pub fn body_allowed_for_status(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

#[derive(Debug, Default)]
enum ResponseBody {
    #[default]
    Empty,
    Buffered(BytesMut),
    Stream(Body),
}

/// Response state owned by a Context.
#[derive(Debug, Default)]
pub struct ResponseWriter {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: ResponseBody,
    size: usize,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status set so far; 200 when nothing was set.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Append bytes to the buffered body.
    pub fn write(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        match &mut self.body {
            ResponseBody::Buffered(buf) => buf.extend_from_slice(chunk),
            body => *body = ResponseBody::Buffered(BytesMut::from(chunk)),
        }
        self.size += chunk.len();
    }

    /// Replace the body with a stream; its size comes from Content-Length.
    pub fn write_stream(&mut self, body: Body) {
        self.size = self
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        self.body = ResponseBody::Stream(body);
    }

    /// Copy a complete response (status, headers, body) into the writer.
    pub fn write_response(&mut self, response: Response<Body>) {
        let (parts, body) = response.into_parts();
        self.status = Some(parts.status);
        for (name, value) in &parts.headers {
            self.headers.append(name.clone(), value.clone());
        }
        self.write_stream(body);
    }

    /// True once any body (buffered or streaming) was written.
    pub fn written(&self) -> bool {
        !matches!(self.body, ResponseBody::Empty)
    }

    /// Bytes written so far.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Discard a buffered or streaming body, keeping status and headers.
    pub fn clear_body(&mut self) {
        self.body = ResponseBody::Empty;
        self.size = 0;
    }

    /// Reset to the pristine state for pool reuse.
    pub fn reset(&mut self) {
        self.status = None;
        self.headers.clear();
        self.body = ResponseBody::Empty;
        self.size = 0;
    }

    /// Build the final response, leaving the writer empty.
    pub fn take_response(&mut self) -> Response<Body> {
        let status = self.status();
        let headers = std::mem::take(&mut self.headers);
        let body = std::mem::take(&mut self.body);
        self.reset();

        let body = if !body_allowed_for_status(status) {
            Body::empty()
        } else {
            match body {
                ResponseBody::Empty => Body::empty(),
                ResponseBody::Buffered(buf) => Body::from(buf.freeze()),
                ResponseBody::Stream(stream) => stream,
            }
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }

    #[cfg(test)]
    pub(crate) fn buffered(&self) -> Bytes {
        match &self.body {
            ResponseBody::Buffered(buf) => Bytes::copy_from_slice(buf),
            _ => Bytes::new(),
        }
    }
}

/// The JSON body written on every error path.
#[derive(Debug, Serialize)]
pub struct DefaultResponseBody {
    pub code: u16,
    pub status: &'static str,
    pub message: String,
    #[serde(skip)]
    pub internal: Option<BoxError>,
}

impl DefaultResponseBody {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        let status = if code.is_success() { "success" } else { "error" };
        Self {
            code: code.as_u16(),
            status,
            message: message.into(),
            internal: None,
        }
    }

    /// Body whose message is the canonical reason phrase of `code`.
    pub fn for_status(code: StatusCode) -> Self {
        Self::new(code, code.canonical_reason().unwrap_or("Unknown"))
    }

    pub fn with_internal(mut self, err: impl Into<BoxError>) -> Self {
        self.internal = Some(err.into());
        self
    }
}

impl std::fmt::Display for DefaultResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.internal {
            Some(internal) => write!(
                f,
                "code={}, message={}, internal={}",
                self.code, self.message, internal
            ),
            None => write!(f, "code={}, message={}", self.code, self.message),
        }
    }
}

impl std::error::Error for DefaultResponseBody {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.internal
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}
