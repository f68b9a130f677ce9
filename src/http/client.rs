//! The HTTP client: dispatch entry points and lifecycle.
//!
//! # Responsibilities
//! - Validate configuration and the creating context at construction
//! - Build request handles, applying forward-proxy tunneling
//! - Submit waiters to the connection pool on the caller's context
//! - Close exactly once, releasing the pool
//!
//! # Design Decisions
//! - Cheap to clone; every clone shares one client
//! - The closed flag and waiter submission share a lock, so no waiter is
//!   created after close
//! - Drop without close is logged and still shuts the pool down

use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use arc_swap::ArcSwap;
use hyper::header::HeaderMap;
use hyper::Method;

use crate::config::{validate_config, ClientConfig, HttpVersion};
use crate::error::{ClientError, ClientResult};
use crate::http::redirect::{DefaultRedirectPolicy, RedirectPolicy};
use crate::http::request::{RequestHandle, Target};
use crate::http::websocket::{WebSocketConnectOptions, WebSocketUpgradeStream};
use crate::lifecycle::{Context, ContextKind, HookId};
use crate::net::host::{authority, bare_host, url_host};
use crate::net::{Acquisition, Endpoint, ProxyTunnel, Purpose, TlsConnector, TlsOptions, Waiter};
use crate::pool::{ConnectionPool, PoolMetrics, TcpConnectionPool};

const DEFAULT_PLAIN_PORT: u16 = 80;
const DEFAULT_TLS_PORT: u16 = 443;

/// Asynchronous HTTP/WebSocket client.
#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    pool: Arc<dyn ConnectionPool>,
    tunnel: Option<ProxyTunnel>,
    tls_options: TlsOptions,
    redirect_policy: ArcSwap<Arc<dyn RedirectPolicy>>,
    state: Mutex<ClientState>,
    context: Option<Context>,
    close_hook: Option<HookId>,
}

#[derive(Debug, Default)]
struct ClientState {
    closed: bool,
}

impl HttpClient {
    /// Create a client on top of `pool`.
    ///
    /// When called on a [`Context`], the client closes itself when that
    /// context closes.
    pub fn new(config: ClientConfig, pool: Arc<dyn ConnectionPool>) -> ClientResult<Self> {
        validate_config(&config).map_err(|errors| {
            let message = errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
            ClientError::InvalidConfiguration(message)
        })?;

        let context = Context::current();
        if let Some(ctx) = &context {
            match ctx.kind() {
                ContextKind::MultiThreadedWorker => {
                    return Err(ClientError::InvalidConfiguration(
                        "cannot use HttpClient in a multi-threaded worker context".to_string(),
                    ));
                }
                ContextKind::Worker if config.protocol_version == HttpVersion::Http2 => {
                    return Err(ClientError::InvalidConfiguration(
                        "cannot use HTTP/2 from a worker context".to_string(),
                    ));
                }
                _ => {}
            }
        }

        let tunnel = ProxyTunnel::from_config(&config);
        let tls_options = TlsOptions::from_config(&config);

        let inner = Arc::new_cyclic(|weak: &Weak<ClientInner>| {
            let close_hook = context.as_ref().map(|ctx| {
                let weak = weak.clone();
                ctx.add_close_hook(move || {
                    if let Some(inner) = weak.upgrade() {
                        let _ = HttpClient { inner }.close();
                    }
                })
            });

            ClientInner {
                config,
                pool,
                tunnel,
                tls_options,
                redirect_policy: ArcSwap::from_pointee(Arc::new(DefaultRedirectPolicy) as Arc<dyn RedirectPolicy>),
                state: Mutex::new(ClientState::default()),
                context,
                close_hook,
            }
        });

        tracing::debug!(
            default_host = %inner.config.default_host,
            default_port = inner.config.default_port,
            ssl = inner.config.ssl,
            tunneling = inner.tunnel.is_some(),
            context = ?inner.context.as_ref().map(Context::id),
            "HTTP client created"
        );

        Ok(Self { inner })
    }

    /// Create a client backed by the bundled [`TcpConnectionPool`].
    pub fn with_tcp_pool(config: ClientConfig, tls: Option<Arc<dyn TlsConnector>>) -> ClientResult<Self> {
        let pool = TcpConnectionPool::new(config.pool.clone(), TlsOptions::from_config(&config), tls);
        Self::new(config, Arc::new(pool))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Negotiated-protocol list handed to the TLS layer.
    pub fn tls_options(&self) -> &TlsOptions {
        &self.inner.tls_options
    }

    /// Build a request for `host:port` + `uri`. `ssl = None` uses the client default.
    pub fn dispatch(
        &self,
        method: Method,
        host: &str,
        port: u16,
        ssl: Option<bool>,
        uri: &str,
        headers: Option<HeaderMap>,
    ) -> ClientResult<RequestHandle> {
        let host = bare_host(host);
        if host.is_empty() {
            return Err(ClientError::InvalidArgument("no empty host accepted".to_string()));
        }
        if uri.is_empty() {
            return Err(ClientError::InvalidArgument("no empty uri accepted".to_string()));
        }
        self.check_open()?;

        let ssl = ssl.unwrap_or(self.inner.config.ssl);
        let (target, headers) = match &self.inner.tunnel {
            Some(tunnel) if !ssl => {
                let rewrite = tunnel.rewrite(host, port, uri, headers)?;
                let target = Target {
                    host: host.to_string(),
                    port,
                    ssl,
                    uri: rewrite.uri,
                    connect_host: rewrite.connect_host,
                    connect_port: rewrite.connect_port,
                    host_header: rewrite.host_header,
                };
                (target, rewrite.headers)
            }
            _ => {
                let target = Target {
                    host: host.to_string(),
                    port,
                    ssl,
                    uri: uri.to_string(),
                    connect_host: host.to_string(),
                    connect_port: port,
                    host_header: host_header(host, port, ssl),
                };
                (target, headers)
            }
        };

        Ok(RequestHandle::new(self.clone(), method, target, headers))
    }

    /// Build a request from an absolute URI.
    ///
    /// Schemes ending in `p` are plain (default port 80), schemes ending in
    /// `s` are secure (default port 443).
    pub fn dispatch_absolute(&self, method: Method, absolute_uri: &str) -> ClientResult<RequestHandle> {
        let url = url::Url::parse(absolute_uri)
            .map_err(|e| ClientError::InvalidArgument(format!("invalid url {}: {}", absolute_uri, e)))?;

        let scheme = url.scheme();
        let ssl = if scheme.ends_with('p') {
            false
        } else if scheme.ends_with('s') {
            true
        } else {
            return Err(ClientError::InvalidArgument(format!("unsupported scheme {}", scheme)));
        };

        let host = url_host(&url)
            .ok_or_else(|| ClientError::InvalidArgument(format!("no host in {}", absolute_uri)))?;
        let port = url
            .port()
            .unwrap_or(if ssl { DEFAULT_TLS_PORT } else { DEFAULT_PLAIN_PORT });

        let mut uri = url.path().to_string();
        if let Some(query) = url.query() {
            uri.push('?');
            uri.push_str(query);
        }

        self.dispatch(method, &host, port, Some(ssl), &uri, None)
    }

    /// Build a request for `uri` on the configured default host and port.
    pub fn request(&self, method: Method, uri: &str) -> ClientResult<RequestHandle> {
        let config = &self.inner.config;
        self.dispatch(method, &config.default_host, config.default_port, None, uri, None)
    }

    /// Open a lazy WebSocket upgrade; nothing happens until a handler is set.
    pub fn websocket_stream(&self, options: WebSocketConnectOptions) -> WebSocketUpgradeStream {
        WebSocketUpgradeStream::new(self.clone(), options)
    }

    /// Ask the pool for a request connection to `host:port`.
    pub fn acquire(&self, ssl: bool, host: &str, port: u16) -> ClientResult<Acquisition> {
        self.submit(Purpose::Request, ssl, host, port)
    }

    /// Ask the pool for a raw connection to upgrade to a WebSocket.
    pub fn acquire_websocket(&self, ssl: bool, host: &str, port: u16) -> ClientResult<Acquisition> {
        self.submit(Purpose::WebSocket, ssl, host, port)
    }

    fn submit(&self, purpose: Purpose, ssl: bool, host: &str, port: u16) -> ClientResult<Acquisition> {
        let state = self.inner.state.lock().expect("client state mutex poisoned");
        if state.closed {
            return Err(ClientError::ClientClosed);
        }

        let (waiter, acquisition) = Waiter::new(
            Endpoint::new(host, port, ssl),
            self.inner.config.protocol_version,
            purpose,
            Context::current(),
        );
        tracing::trace!(endpoint = %waiter.endpoint(), purpose = ?purpose, "Submitting waiter");

        match purpose {
            Purpose::Request => self.inner.pool.acquire_request_connection(waiter),
            Purpose::WebSocket => self.inner.pool.acquire_websocket_connection(waiter),
        }
        Ok(acquisition)
    }

    /// The active redirect policy.
    pub fn redirect_policy(&self) -> Arc<dyn RedirectPolicy> {
        let current = self.inner.redirect_policy.load();
        Arc::clone(&**current)
    }

    /// Replace the redirect policy; `None` restores [`DefaultRedirectPolicy`].
    pub fn set_redirect_policy(&self, policy: Option<Arc<dyn RedirectPolicy>>) {
        let policy = policy.unwrap_or_else(|| Arc::new(DefaultRedirectPolicy));
        self.inner.redirect_policy.store(Arc::new(policy));
    }

    /// Close the client and shut its pool down.
    ///
    /// Only the first call succeeds; later calls fail with `ClientClosed`.
    /// In-flight acquisitions are left to the pool.
    pub fn close(&self) -> ClientResult<()> {
        {
            let mut state = self.inner.state.lock().expect("client state mutex poisoned");
            if state.closed {
                return Err(ClientError::ClientClosed);
            }
            state.closed = true;
        }

        self.inner.remove_close_hook();
        self.inner.pool.shutdown();
        tracing::debug!("HTTP client closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().expect("client state mutex poisoned").closed
    }

    /// Pool usage snapshot.
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.pool.metrics()
    }

    fn check_open(&self) -> ClientResult<()> {
        if self.is_closed() {
            return Err(ClientError::ClientClosed);
        }
        Ok(())
    }
}

impl ClientInner {
    fn remove_close_hook(&self) {
        if let (Some(ctx), Some(hook)) = (&self.context, self.close_hook) {
            ctx.remove_close_hook(hook);
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        let closed = self.state.get_mut().map(|state| state.closed).unwrap_or(true);
        if !closed {
            tracing::warn!(
                default_host = %self.config.default_host,
                "HttpClient dropped without close(), shutting down its pool"
            );
            self.remove_close_hook();
            self.pool.shutdown();
        }
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("default_host", &self.inner.config.default_host)
            .field("default_port", &self.inner.config.default_port)
            .field("ssl", &self.inner.config.ssl)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn host_header(host: &str, port: u16, ssl: bool) -> String {
    let default_port = if ssl { DEFAULT_TLS_PORT } else { DEFAULT_PLAIN_PORT };
    authority(host, port, default_port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyOptions;
    use hyper::header::PROXY_AUTHORIZATION;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Pool that records calls and never resolves.
    #[derive(Default)]
    struct CountingPool {
        acquisitions: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    impl ConnectionPool for CountingPool {
        fn acquire_request_connection(&self, _waiter: Waiter) {
            self.acquisitions.fetch_add(1, Ordering::SeqCst);
        }

        fn acquire_websocket_connection(&self, _waiter: Waiter) {
            self.acquisitions.fetch_add(1, Ordering::SeqCst);
        }

        fn shutdown(&self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }

        fn metrics(&self) -> PoolMetrics {
            PoolMetrics::default()
        }
    }

    fn client(config: ClientConfig) -> (HttpClient, Arc<CountingPool>) {
        let pool = Arc::new(CountingPool::default());
        let client = HttpClient::new(config, pool.clone()).unwrap();
        (client, pool)
    }

    #[test]
    fn direct_dispatch_keeps_target() {
        let (client, _) = client(ClientConfig::default());
        let req = client.dispatch(Method::GET, "h", 8080, None, "/p?q=1", None).unwrap();
        assert_eq!(req.uri(), "/p?q=1");
        assert_eq!((req.connect_host(), req.connect_port()), ("h", 8080));
        assert_eq!(req.host_header(), "h:8080");
        assert_eq!(req.absolute_uri(), "http://h:8080/p?q=1");
        assert!(req.headers().is_none());
    }

    #[test]
    fn empty_host_or_uri_rejected() {
        let (client, pool) = client(ClientConfig::default());
        assert!(matches!(
            client.dispatch(Method::GET, "", 80, None, "/", None),
            Err(ClientError::InvalidArgument(_))
        ));
        assert!(matches!(
            client.dispatch(Method::GET, "h", 80, None, "", None),
            Err(ClientError::InvalidArgument(_))
        ));
        assert_eq!(pool.acquisitions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn absolute_uri_schemes_and_default_ports() {
        let (client, _) = client(ClientConfig::default());

        let plain = client.dispatch_absolute(Method::GET, "http://h/a?b=c").unwrap();
        assert_eq!((plain.port(), plain.is_ssl(), plain.uri()), (80, false, "/a?b=c"));

        let secure = client.dispatch_absolute(Method::GET, "https://h/").unwrap();
        assert_eq!((secure.port(), secure.is_ssl()), (443, true));
        assert_eq!(secure.host_header(), "h");

        let explicit = client.dispatch_absolute(Method::GET, "https://h:8443/x").unwrap();
        assert_eq!(explicit.port(), 8443);

        assert!(matches!(
            client.dispatch_absolute(Method::GET, "gopher://h/"),
            Err(ClientError::InvalidArgument(_))
        ));
        assert!(matches!(
            client.dispatch_absolute(Method::GET, "not a url"),
            Err(ClientError::InvalidArgument(_))
        ));
    }

    #[test]
    fn ipv6_literals_dial_bare_and_write_bracketed() {
        let (client, _) = client(ClientConfig::default());

        let absolute = client.dispatch_absolute(Method::GET, "http://[::1]:8080/x").unwrap();
        assert_eq!(absolute.host(), "::1");
        assert_eq!(absolute.connect_host(), "::1");
        assert_eq!(absolute.host_header(), "[::1]:8080");
        assert_eq!(absolute.absolute_uri(), "http://[::1]:8080/x");

        let direct = client.dispatch(Method::GET, "[::1]", 80, None, "/", None).unwrap();
        assert_eq!(direct.connect_host(), "::1");
        assert_eq!(direct.host_header(), "[::1]");
    }

    #[test]
    fn proxy_tunnels_only_plain_requests() {
        let config = ClientConfig {
            proxy: Some(ProxyOptions::http("proxy", 3128).with_credentials("user", "pass")),
            ..ClientConfig::default()
        };
        let (client, _) = client(config);

        let plain = client.dispatch_absolute(Method::GET, "http://origin:8080/p").unwrap();
        assert_eq!(plain.uri(), "http://origin:8080/p");
        assert_eq!((plain.connect_host(), plain.connect_port()), ("proxy", 3128));
        assert_eq!(plain.host_header(), "origin:8080");
        assert_eq!(plain.headers().unwrap()[PROXY_AUTHORIZATION], "Basic dXNlcjpwYXNz");
        assert_eq!(plain.absolute_uri(), "http://origin:8080/p");

        let secure = client.dispatch_absolute(Method::GET, "https://origin:8443/p").unwrap();
        assert_eq!(secure.uri(), "/p");
        assert_eq!((secure.connect_host(), secure.connect_port()), ("origin", 8443));
        assert!(secure.headers().is_none());
    }

    #[test]
    fn request_uses_default_host() {
        let config = ClientConfig {
            default_host: "api.local".to_string(),
            default_port: 9000,
            ..ClientConfig::default()
        };
        let (client, _) = client(config);
        let req = client.request(Method::DELETE, "/items/1").unwrap();
        assert_eq!((req.host(), req.port()), ("api.local", 9000));
        assert_eq!(req.method(), &Method::DELETE);
    }

    #[test]
    fn alpn_without_ssl_is_invalid_configuration() {
        let config = ClientConfig {
            use_alpn: true,
            ..ClientConfig::default()
        };
        let result = HttpClient::new(config, Arc::new(CountingPool::default()));
        assert!(matches!(result, Err(ClientError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn closed_client_rejects_everything() {
        let (client, pool) = client(ClientConfig::default());
        client.close().unwrap();

        assert!(matches!(client.close(), Err(ClientError::ClientClosed)));
        assert!(matches!(
            client.dispatch(Method::GET, "h", 80, None, "/", None),
            Err(ClientError::ClientClosed)
        ));
        assert!(matches!(client.acquire(false, "h", 80), Err(ClientError::ClientClosed)));
        assert!(matches!(client.acquire_websocket(false, "h", 80), Err(ClientError::ClientClosed)));
        assert_eq!(pool.acquisitions.load(Ordering::SeqCst), 0);
        assert_eq!(pool.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handle_built_before_close_fails_on_send() {
        let (client, pool) = client(ClientConfig::default());
        let req = client.dispatch(Method::GET, "h", 80, None, "/", None).unwrap();
        client.close().unwrap();

        assert!(matches!(req.send().await, Err(ClientError::ClientClosed)));
        assert_eq!(pool.acquisitions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn drop_without_close_shuts_pool_down() {
        let (client, pool) = client(ClientConfig::default());
        let clone = client.clone();
        drop(client);
        assert_eq!(pool.shutdowns.load(Ordering::SeqCst), 0);
        drop(clone);
        assert_eq!(pool.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_after_close_does_not_shut_down_again() {
        let (client, pool) = client(ClientConfig::default());
        client.close().unwrap();
        drop(client);
        assert_eq!(pool.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn setting_none_restores_default_policy() {
        let (client, _) = client(ClientConfig::default());
        let custom = |_: &HttpClient, _: &crate::http::ClientResponse| -> ClientResult<Option<RequestHandle>> {
            Ok(None)
        };
        let custom: Arc<dyn RedirectPolicy> = Arc::new(custom);
        let default = client.redirect_policy();
        client.set_redirect_policy(Some(custom.clone()));
        let installed = client.redirect_policy();
        assert!(!Arc::ptr_eq(&default, &installed));
        assert!(Arc::ptr_eq(&custom, &installed));

        client.set_redirect_policy(None);
        let restored = client.redirect_policy();
        assert!(!Arc::ptr_eq(&installed, &restored));
    }

    #[tokio::test]
    async fn context_rules_and_close_hook() {
        let worker = Context::new(ContextKind::MultiThreadedWorker);
        let (tx, rx) = tokio::sync::oneshot::channel();
        worker.execute(move || {
            let result = HttpClient::new(ClientConfig::default(), Arc::new(CountingPool::default()));
            let _ = tx.send(matches!(result, Err(ClientError::InvalidConfiguration(_))));
        });
        assert!(rx.await.unwrap());

        let worker = Context::new(ContextKind::Worker);
        let (tx, rx) = tokio::sync::oneshot::channel();
        worker.execute(move || {
            let config = ClientConfig {
                protocol_version: HttpVersion::Http2,
                ..ClientConfig::default()
            };
            let result = HttpClient::new(config, Arc::new(CountingPool::default()));
            let _ = tx.send(matches!(result, Err(ClientError::InvalidConfiguration(_))));
        });
        assert!(rx.await.unwrap());

        let ctx = Context::new(ContextKind::EventLoop);
        let pool = Arc::new(CountingPool::default());
        let (tx, rx) = tokio::sync::oneshot::channel();
        let p = pool.clone();
        ctx.execute(move || {
            let _ = tx.send(HttpClient::new(ClientConfig::default(), p));
        });
        let client = rx.await.unwrap().unwrap();

        ctx.close();
        assert!(client.is_closed());
        assert_eq!(pool.shutdowns.load(Ordering::SeqCst), 1);
    }
}
