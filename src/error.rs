//! Error types surfaced by the dispatch core.

use thiserror::Error;

/// Errors delivered through a waiter's failure path.
///
/// These are produced by the pool and propagated unchanged; the dispatch
/// core never retries them.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// Connection establishment exceeded the configured timeout.
    #[error("connect to {endpoint} timed out after {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u64 },

    /// Host name could not be resolved.
    #[error("failed to resolve {host}: {reason}")]
    Dns { host: String, reason: String },

    /// Socket level failure.
    #[error("connect to {endpoint} failed: {source}")]
    Io {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// TLS handshake failed or TLS is unavailable.
    #[error("TLS handshake with {endpoint} failed: {reason}")]
    Handshake { endpoint: String, reason: String },

    /// Per-endpoint limit reached and the wait queue is full.
    #[error("connection pool exhausted for {endpoint} (max {max_connections}, wait queue {max_waiters})")]
    PoolExhausted {
        endpoint: String,
        max_connections: usize,
        max_waiters: usize,
    },

    /// The pool was shut down while the acquisition was pending.
    #[error("connection pool is shut down")]
    PoolClosed,

    /// The connection was closed or reused before it could be used.
    #[error("connection to {endpoint} was invalidated before use")]
    Invalidated { endpoint: String },

    /// The waiter was dropped by the pool without being resolved.
    #[error("connection request was abandoned")]
    Abandoned,
}

/// Errors returned by the dispatch core.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Malformed or missing call input. Raised before any I/O.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Contradictory options at construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Dispatch or acquisition attempted after `close()`.
    #[error("client is closed")]
    ClientClosed,

    /// Connection acquisition failed.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// HTTP exchange over an acquired connection failed.
    #[error("HTTP exchange failed: {0}")]
    Http(#[from] hyper::Error),

    /// WebSocket handshake failed.
    #[error("WebSocket handshake failed: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// Response body could not be read.
    #[error("failed to read response body: {0}")]
    Body(String),

    /// The redirect hop bound was exceeded.
    #[error("too many redirects ({limit}) while fetching {last_uri}")]
    TooManyRedirects { limit: u32, last_uri: String },

    /// A redirect policy failed while deciding.
    #[error("redirect policy failed: {0}")]
    RedirectPolicy(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::WebSocket(Box::new(err))
    }
}

/// Result alias used throughout the crate.
pub type ClientResult<T> = Result<T, ClientError>;
