//! Connections handed from the pool to the dispatch core.
//!
//! # Responsibilities
//! - Wrap the negotiated byte stream (plain or TLS) behind one type
//! - Generate unique connection IDs for tracing
//! - Carry the pool lease so the endpoint slot is released on drop
//! - Expose validity so a connection closed or reused after hand-off is detected

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::config::HttpVersion;
use crate::net::host::authority_host;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Byte stream a connection can be built on.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Boxed byte stream.
pub type BoxedIo = Box<dyn Io>;

/// Network endpoint a connection is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub ssl: bool,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, ssl: bool) -> Self {
        Self {
            host: host.into(),
            port,
            ssl,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.ssl { "tls" } else { "tcp" };
        write!(f, "{}://{}:{}", scheme, authority_host(&self.host), self.port)
    }
}

/// A live stream delivered through a waiter.
pub struct Connection {
    id: ConnectionId,
    endpoint: Endpoint,
    protocol: HttpVersion,
    io: BoxedIo,
    valid: Arc<AtomicBool>,
    _lease: Option<Box<dyn Send>>,
}

impl Connection {
    /// Wrap a stream connected to `endpoint`.
    pub fn new<T: Io>(io: T, endpoint: Endpoint) -> Self {
        Self::from_boxed(Box::new(io), endpoint)
    }

    /// Wrap an already boxed stream, such as one returned by a TLS connector.
    pub fn from_boxed(io: BoxedIo, endpoint: Endpoint) -> Self {
        Self {
            id: ConnectionId::new(),
            endpoint,
            protocol: HttpVersion::Http11,
            io,
            valid: Arc::new(AtomicBool::new(true)),
            _lease: None,
        }
    }

    /// Record the protocol negotiated for this stream.
    pub fn with_protocol(mut self, protocol: HttpVersion) -> Self {
        self.protocol = protocol;
        self
    }

    /// Attach a value dropped together with the connection.
    pub fn with_lease<L: Send + 'static>(mut self, lease: L) -> Self {
        self._lease = Some(Box::new(lease));
        self
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn protocol(&self) -> HttpVersion {
        self.protocol
    }

    /// Whether the connection may still be used.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Handle that lets the owner of the stream invalidate it later.
    pub fn invalidation_handle(&self) -> InvalidationHandle {
        InvalidationHandle {
            valid: Arc::clone(&self.valid),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("protocol", &self.protocol)
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().io).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
    }
}

/// Marks a handed-off connection as closed or reused.
#[derive(Debug, Clone)]
pub struct InvalidationHandle {
    valid: Arc<AtomicBool>,
}

impl InvalidationHandle {
    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct Lease(Arc<AtomicUsize>);

    impl Drop for Lease {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn delegates_io_and_releases_lease() {
        let released = Arc::new(AtomicUsize::new(0));
        let (client, mut server) = tokio::io::duplex(64);
        let mut conn = Connection::new(client, Endpoint::new("h", 80, false))
            .with_lease(Lease(released.clone()));

        conn.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        assert_eq!(released.load(Ordering::SeqCst), 0);
        drop(conn);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalidation_is_visible() {
        let (client, _server) = tokio::io::duplex(8);
        let conn = Connection::new(client, Endpoint::new("h", 443, true));
        assert!(conn.is_valid());
        conn.invalidation_handle().invalidate();
        assert!(!conn.is_valid());
        assert_eq!(conn.endpoint().to_string(), "tls://h:443");
    }
}
