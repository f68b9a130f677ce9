//! Request handles and the exchange they drive.
//!
//! # Responsibilities
//! - Carry one dispatched request (target, headers, body) until it is sent
//! - Generate a unique request ID for tracing
//! - Acquire a connection exactly once per hop and run the HTTP/1 exchange
//! - Follow redirects through the client's policy, bounded by `max_redirects`
//!
//! # Design Decisions
//! - `send` consumes the handle, so acquisition cannot run twice for it
//! - Policy errors and panics end the send; no partial redirect happens

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use axum::body::Body;
use bytes::Bytes;
use futures_util::FutureExt;
use hyper::header::{HeaderMap, HeaderValue, HOST};
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};
use crate::http::client::HttpClient;
use crate::http::response::{ClientResponse, RequestSummary};
use crate::observability::metrics;

/// Unique ID attached to every dispatched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Resolved target of a request handle.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub host: String,
    pub port: u16,
    pub ssl: bool,
    pub uri: String,
    pub connect_host: String,
    pub connect_port: u16,
    pub host_header: String,
}

/// One dispatched request. Nothing touches the network until [`send`](Self::send).
pub struct RequestHandle {
    client: HttpClient,
    id: RequestId,
    method: Method,
    target: Target,
    headers: Option<HeaderMap>,
    body: Bytes,
    follow_redirects: bool,
}

impl RequestHandle {
    pub(crate) fn new(client: HttpClient, method: Method, target: Target, headers: Option<HeaderMap>) -> Self {
        let follow_redirects = client.config().follow_redirects;
        Self {
            client,
            id: RequestId::new(),
            method,
            target,
            headers,
            body: Bytes::new(),
            follow_redirects,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request target as written on the wire (absolute form when tunneled).
    pub fn uri(&self) -> &str {
        &self.target.uri
    }

    /// Origin host.
    pub fn host(&self) -> &str {
        &self.target.host
    }

    /// Origin port.
    pub fn port(&self) -> u16 {
        self.target.port
    }

    pub fn is_ssl(&self) -> bool {
        self.target.ssl
    }

    /// Host the connection is opened to; the proxy when tunneling.
    pub fn connect_host(&self) -> &str {
        &self.target.connect_host
    }

    pub fn connect_port(&self) -> u16 {
        self.target.connect_port
    }

    /// Value sent in the `Host` header.
    pub fn host_header(&self) -> &str {
        &self.target.host_header
    }

    /// Headers set so far, `None` when nothing was ever set.
    pub fn headers(&self) -> Option<&HeaderMap> {
        self.headers.as_ref()
    }

    /// Mutable headers, created on first use.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.headers.get_or_insert_with(HeaderMap::new)
    }

    /// Full URI of the request.
    pub fn absolute_uri(&self) -> String {
        if self.target.uri.starts_with("http://") || self.target.uri.starts_with("https://") {
            return self.target.uri.clone();
        }
        let scheme = if self.target.ssl { "https" } else { "http" };
        format!("{}://{}{}", scheme, self.target.host_header, self.target.uri)
    }

    pub fn follow_redirects(&self) -> bool {
        self.follow_redirects
    }

    pub fn set_follow_redirects(&mut self, follow: bool) -> &mut Self {
        self.follow_redirects = follow;
        self
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) -> &mut Self {
        self.body = body.into();
        self
    }

    /// Send the request and follow redirects when enabled.
    pub async fn send(self) -> ClientResult<ClientResponse> {
        let client = self.client.clone();
        let limit = client.config().max_redirects;
        let mut current = self;
        let mut hops = 0u32;

        loop {
            let follow = current.follow_redirects;
            let last_uri = current.absolute_uri();
            let response = current.exchange().await?;

            if !follow {
                return Ok(response);
            }

            let policy = client.redirect_policy();
            let decided = AssertUnwindSafe(async { policy.decide(&client, &response).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(ClientError::RedirectPolicy(panic_message(panic))));

            let Some(mut next) = decided? else {
                return Ok(response);
            };

            hops += 1;
            if hops > limit {
                tracing::warn!(limit, last_uri = %last_uri, "Redirect limit exceeded");
                return Err(ClientError::TooManyRedirects { limit, last_uri });
            }

            metrics::record_redirect(response.status().as_u16());
            tracing::debug!(
                request_id = %response.request().request_id,
                status = response.status().as_u16(),
                from = %last_uri,
                to = %next.absolute_uri(),
                method = %next.method,
                "Following redirect"
            );

            next.follow_redirects = true;
            current = next;
        }
    }

    async fn exchange(self) -> ClientResult<ClientResponse> {
        let start = Instant::now();
        let absolute_uri = self.absolute_uri();
        let Target {
            ssl,
            uri,
            connect_host,
            connect_port,
            host_header,
            ..
        } = self.target;

        let conn = self.client.acquire(ssl, &connect_host, connect_port)?.await?;
        let connection_id = conn.id();

        let mut request = Request::builder()
            .method(self.method.clone())
            .uri(uri.as_str())
            .body(Body::from(self.body))
            .map_err(|e| ClientError::InvalidArgument(format!("invalid request {}: {}", uri, e)))?;
        if let Some(headers) = self.headers {
            request.headers_mut().extend(headers);
        }
        let host = HeaderValue::from_str(&host_header)
            .map_err(|e| ClientError::InvalidArgument(format!("invalid host {}: {}", host_header, e)))?;
        request.headers_mut().insert(HOST, host);

        tracing::debug!(
            request_id = %self.id,
            connection_id = %connection_id,
            method = %self.method,
            uri = %uri,
            "Sending request"
        );

        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(conn)).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(connection_id = %connection_id, error = %e, "Connection closed with error");
            }
        });

        let response = sender.send_request(request).await?;
        let (parts, incoming) = response.into_parts();
        let body = axum::body::to_bytes(Body::new(incoming), self.client.config().max_response_body_bytes)
            .await
            .map_err(|e| ClientError::Body(e.to_string()))?;

        metrics::record_request(self.method.as_str(), parts.status.as_u16(), start);
        tracing::debug!(
            request_id = %self.id,
            status = parts.status.as_u16(),
            bytes = body.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Response received"
        );

        let summary = RequestSummary {
            request_id: self.id,
            method: self.method,
            absolute_uri,
        };
        Ok(ClientResponse::new(parts.status, parts.headers, body, summary).with_version(parts.version))
    }
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("target", &self.target)
            .field("headers", &self.headers)
            .field("follow_redirects", &self.follow_redirects)
            .finish()
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "redirect policy panicked".to_string()
    }
}
