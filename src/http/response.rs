//! Buffered responses returned by [`RequestHandle::send`](crate::http::RequestHandle::send).
//!
//! # Design Decisions
//! - Body is fully buffered (bounded by `max_response_body_bytes`)
//! - The originating request travels with the response so redirect
//!   policies can resolve `Location` against it

use std::borrow::Cow;

use bytes::Bytes;
use hyper::header::{HeaderMap, LOCATION};
use hyper::{Method, StatusCode, Version};

use crate::http::request::RequestId;

/// What a response was produced for.
#[derive(Debug, Clone)]
pub struct RequestSummary {
    pub request_id: RequestId,
    pub method: Method,
    /// Absolute URI of the request, used as the base for `Location`.
    pub absolute_uri: String,
}

/// A completed response.
#[derive(Debug, Clone)]
pub struct ClientResponse {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    request: RequestSummary,
}

impl ClientResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes, request: RequestSummary) -> Self {
        Self {
            status,
            version: Version::HTTP_11,
            headers,
            body,
            request,
        }
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Raw `Location` header, if present and valid UTF-8.
    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn request(&self) -> &RequestSummary {
        &self.request
    }
}
