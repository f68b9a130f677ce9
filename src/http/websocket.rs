//! Lazy WebSocket upgrades.
//!
//! # Data Flow
//! ```text
//! HttpClient::websocket_stream(options)     (no I/O)
//!     → handler(f)                           (first call only)
//!     → acquire_websocket() → Waiter          (submitted synchronously)
//!     → raw Connection on the caller's context
//!         - invalid? re-acquire once
//!     → WebSocket handshake over the connection
//!     → handler(ws) then end_handler()  |  exception_handler(err)
//! ```
//!
//! # Design Decisions
//! - Single subscription: later `handler` calls are ignored
//! - Exception and end handlers are captured when the upgrade starts
//! - Unhandled failures are logged, never panicked on

use std::fmt;

use hyper::header::{HeaderMap, HeaderName, HeaderValue, SEC_WEBSOCKET_PROTOCOL, SEC_WEBSOCKET_VERSION};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::WebSocketStream;

use crate::error::{ClientError, ClientResult, ConnectError};
use crate::http::client::HttpClient;
use crate::lifecycle::Context;
use crate::net::host::{authority_host, bare_host};
use crate::net::{Acquisition, Connection};
use crate::observability::metrics;

/// Re-acquisitions allowed when a delivered connection is already invalid.
pub const MAX_UPGRADE_RETRIES: u32 = 1;

/// An upgraded WebSocket over a pooled connection.
pub type WebSocket = WebSocketStream<Connection>;

type SuccessHandler = Box<dyn FnOnce(WebSocket) + Send>;
type ExceptionHandler = Box<dyn FnOnce(ClientError) + Send>;
type EndHandler = Box<dyn FnOnce() + Send>;

/// WebSocket protocol versions offered in `Sec-WebSocket-Version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WebSocketVersion {
    V08,
    #[default]
    V13,
}

impl WebSocketVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebSocketVersion::V08 => "8",
            WebSocketVersion::V13 => "13",
        }
    }
}

/// Where and how to open a WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnectOptions {
    host: Option<String>,
    port: Option<u16>,
    uri: String,
    headers: HeaderMap,
    version: WebSocketVersion,
    sub_protocols: Vec<String>,
    ssl: Option<bool>,
}

impl WebSocketConnectOptions {
    /// Options for `uri` on the client's default host and port.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            host: None,
            port: None,
            uri: uri.into(),
            headers: HeaderMap::new(),
            version: WebSocketVersion::default(),
            sub_protocols: Vec::new(),
            ssl: None,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn version(mut self, version: WebSocketVersion) -> Self {
        self.version = version;
        self
    }

    pub fn sub_protocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sub_protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Override the client's TLS default.
    pub fn ssl(mut self, ssl: bool) -> Self {
        self.ssl = Some(ssl);
        self
    }
}

/// Single-subscription WebSocket upgrade.
pub struct WebSocketUpgradeStream {
    client: HttpClient,
    options: WebSocketConnectOptions,
    exception_handler: Option<ExceptionHandler>,
    end_handler: Option<EndHandler>,
    subscribed: bool,
}

impl WebSocketUpgradeStream {
    pub(crate) fn new(client: HttpClient, options: WebSocketConnectOptions) -> Self {
        Self {
            client,
            options,
            exception_handler: None,
            end_handler: None,
            subscribed: false,
        }
    }

    /// Whether the upgrade has been started.
    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn exception_handler<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnOnce(ClientError) + Send + 'static,
    {
        self.exception_handler = Some(Box::new(handler));
        self
    }

    pub fn end_handler<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.end_handler = Some(Box::new(handler));
        self
    }

    /// Start the upgrade, delivering the socket to `handler`.
    ///
    /// Only the first call has an effect. Fails synchronously with
    /// `ClientClosed` or `InvalidArgument`; everything later goes to the
    /// exception handler.
    pub fn handler<F>(&mut self, handler: F) -> ClientResult<()>
    where
        F: FnOnce(WebSocket) + Send + 'static,
    {
        if self.subscribed {
            tracing::trace!(uri = %self.options.uri, "WebSocket handler already set, ignoring");
            return Ok(());
        }
        self.subscribed = true;

        let config = self.client.config();
        let target = UpgradeTarget {
            client: self.client.clone(),
            host: bare_host(self.options.host.as_deref().unwrap_or(&config.default_host)).to_string(),
            port: self.options.port.unwrap_or(config.default_port),
            ssl: self.options.ssl.unwrap_or(config.ssl),
            options: self.options.clone(),
        };

        if target.host.is_empty() {
            return Err(ClientError::InvalidArgument("no empty host accepted".to_string()));
        }
        if target.options.uri.is_empty() {
            return Err(ClientError::InvalidArgument("no empty uri accepted".to_string()));
        }

        let acquisition = target.acquire()?;
        let upgrade = Upgrade {
            target,
            handler: Box::new(handler),
            exception_handler: self.exception_handler.take(),
            end_handler: self.end_handler.take(),
        };

        match Context::current() {
            Some(ctx) => {
                if !ctx.spawn(upgrade.run(acquisition)) {
                    tracing::warn!(context = %ctx.id(), "Context closed, WebSocket upgrade dropped");
                }
            }
            None => {
                tokio::spawn(upgrade.run(acquisition));
            }
        }
        Ok(())
    }

    /// No-op; the upgrade has no backpressure.
    pub fn pause(&mut self) -> &mut Self {
        self
    }

    /// No-op; the upgrade has no backpressure.
    pub fn resume(&mut self) -> &mut Self {
        self
    }
}

impl fmt::Debug for WebSocketUpgradeStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketUpgradeStream")
            .field("options", &self.options)
            .field("subscribed", &self.subscribed)
            .finish()
    }
}

struct UpgradeTarget {
    client: HttpClient,
    host: String,
    port: u16,
    ssl: bool,
    options: WebSocketConnectOptions,
}

struct Upgrade {
    target: UpgradeTarget,
    handler: SuccessHandler,
    exception_handler: Option<ExceptionHandler>,
    end_handler: Option<EndHandler>,
}

impl Upgrade {
    async fn run(self, mut acquisition: Acquisition) {
        let mut retries = 0;
        let result = loop {
            let conn = match acquisition.await {
                Ok(conn) => conn,
                Err(err) => break Err(ClientError::from(err)),
            };

            if conn.is_valid() {
                break self.target.handshake(conn).await;
            }

            if retries >= MAX_UPGRADE_RETRIES {
                break Err(ConnectError::Invalidated {
                    endpoint: conn.endpoint().to_string(),
                }
                .into());
            }
            retries += 1;
            tracing::debug!(
                endpoint = %conn.endpoint(),
                connection_id = %conn.id(),
                "Connection invalidated before upgrade, re-acquiring"
            );
            drop(conn);

            acquisition = match self.target.acquire() {
                Ok(acquisition) => acquisition,
                Err(err) => break Err(err),
            };
        };

        match result {
            Ok(ws) => {
                metrics::record_websocket_upgrade("success");
                (self.handler)(ws);
                if let Some(end) = self.end_handler {
                    end();
                }
            }
            Err(err) => {
                metrics::record_websocket_upgrade("failure");
                match self.exception_handler {
                    Some(handler) => handler(err),
                    None => tracing::error!(
                        host = %self.target.host,
                        port = self.target.port,
                        uri = %self.target.options.uri,
                        error = %err,
                        "WebSocket upgrade failed"
                    ),
                }
            }
        }
    }
}

impl UpgradeTarget {
    fn acquire(&self) -> ClientResult<Acquisition> {
        self.client.acquire_websocket(self.ssl, &self.host, self.port)
    }

    async fn handshake(&self, conn: Connection) -> ClientResult<WebSocket> {
        let scheme = if self.ssl { "wss" } else { "ws" };
        let url = format!("{}://{}:{}{}", scheme, authority_host(&self.host), self.port, self.options.uri);
        let mut request = url.as_str().into_client_request()?;

        let headers = request.headers_mut();
        for (name, value) in self.options.headers.iter() {
            headers.append(name.clone(), value.clone());
        }
        if !self.options.sub_protocols.is_empty() {
            let protocols = HeaderValue::from_str(&self.options.sub_protocols.join(","))
                .map_err(|e| ClientError::InvalidArgument(format!("invalid sub-protocols: {}", e)))?;
            headers.insert(SEC_WEBSOCKET_PROTOCOL, protocols);
        }
        headers.insert(SEC_WEBSOCKET_VERSION, HeaderValue::from_static(self.options.version.as_str()));

        let config = WebSocketConfig::default().max_frame_size(Some(self.client.config().max_websocket_frame_size));

        tracing::debug!(url = %url, connection_id = %conn.id(), "Upgrading connection to WebSocket");
        let (ws, response) = tokio_tungstenite::client_async_with_config(request, conn, Some(config)).await?;
        tracing::debug!(url = %url, status = response.status().as_u16(), "WebSocket upgraded");
        Ok(ws)
    }
}
