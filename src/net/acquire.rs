//! Connection acquisition protocol.
//!
//! # Data Flow
//! ```text
//! HttpClient::acquire()
//!     → Waiter::new() → (Waiter, Acquisition)
//!     → Waiter submitted to ConnectionPool
//!     → pool resolves exactly once: on_connection_established | on_failure
//!     → result published on the owning Context
//!     → Acquisition future completes for the caller
//! ```
//!
//! # Design Decisions
//! - Resolution consumes the waiter, so a second resolution cannot compile
//! - Dropping or cancelling the Acquisition cancels the waiter
//! - Cancellation is re-checked on the context right before delivery

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::Poll;

use tokio::sync::oneshot;

use crate::config::HttpVersion;
use crate::error::ConnectError;
use crate::lifecycle::Context;
use crate::net::connection::{Connection, Endpoint};

type Resolution = Result<Connection, ConnectError>;

/// What the acquired connection will be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    /// Request/response exchange.
    Request,
    /// Raw connection for a WebSocket upgrade.
    WebSocket,
}

/// One pending request for a connection, owned by the pool until resolved.
#[derive(Debug)]
pub struct Waiter {
    endpoint: Endpoint,
    protocol: HttpVersion,
    purpose: Purpose,
    context: Option<Context>,
    cancelled: Arc<AtomicBool>,
    resolver: oneshot::Sender<Resolution>,
}

impl Waiter {
    /// Create a waiter and the future its resolution is observed through.
    pub fn new(
        endpoint: Endpoint,
        protocol: HttpVersion,
        purpose: Purpose,
        context: Option<Context>,
    ) -> (Waiter, Acquisition) {
        let (resolver, rx) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let acquisition = Acquisition {
            rx,
            cancelled: Arc::clone(&cancelled),
            endpoint: endpoint.clone(),
        };
        let waiter = Waiter {
            endpoint,
            protocol,
            purpose,
            context,
            cancelled,
            resolver,
        };
        (waiter, acquisition)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn host(&self) -> &str {
        &self.endpoint.host
    }

    pub fn port(&self) -> u16 {
        self.endpoint.port
    }

    pub fn is_ssl(&self) -> bool {
        self.endpoint.ssl
    }

    pub fn protocol_version(&self) -> HttpVersion {
        self.protocol
    }

    pub fn purpose(&self) -> Purpose {
        self.purpose
    }

    /// Context the result is delivered on.
    pub fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    /// Whether the requester has given up. Pools should check this before
    /// dialing and may check it again before resolving.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || self.resolver.is_closed()
    }

    /// Completes once the requester has dropped its [`Acquisition`].
    pub async fn closed(&mut self) {
        self.resolver.closed().await
    }

    /// Hand over a connection.
    ///
    /// Returns the connection back when the waiter was already cancelled, so
    /// the pool can recycle it.
    pub fn on_connection_established(self, conn: Connection) -> Result<(), Connection> {
        if self.is_cancelled() {
            tracing::trace!(endpoint = %self.endpoint, connection_id = %conn.id(), "Waiter cancelled, returning connection");
            return Err(conn);
        }
        self.deliver(Ok(conn));
        Ok(())
    }

    /// Report that no connection could be obtained.
    ///
    /// Returns the error back when the waiter was already cancelled.
    pub fn on_failure(self, err: ConnectError) -> Result<(), ConnectError> {
        if self.is_cancelled() {
            tracing::trace!(endpoint = %self.endpoint, error = %err, "Waiter cancelled, dropping failure");
            return Err(err);
        }
        self.deliver(Err(err));
        Ok(())
    }

    fn deliver(self, result: Resolution) {
        let Waiter {
            endpoint,
            context,
            cancelled,
            resolver,
            ..
        } = self;

        match context {
            Some(ctx) => {
                let submitted = ctx.execute(move || {
                    if cancelled.load(Ordering::Acquire) {
                        return;
                    }
                    let _ = resolver.send(result);
                });
                if !submitted {
                    tracing::debug!(endpoint = %endpoint, context = %ctx.id(), "Context closed before delivery");
                }
            }
            None => {
                let _ = resolver.send(result);
            }
        }
    }
}

/// Caller side of a waiter. Resolves to the delivered connection or failure.
#[derive(Debug)]
pub struct Acquisition {
    rx: oneshot::Receiver<Resolution>,
    cancelled: Arc<AtomicBool>,
    endpoint: Endpoint,
}

impl Acquisition {
    /// Give up on this acquisition; the pool will not deliver to it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Future for Acquisition {
    type Output = Resolution;

    fn poll(mut self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        if self.is_cancelled() {
            return Poll::Ready(Err(ConnectError::Abandoned));
        }
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(resolution)) => Poll::Ready(resolution),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ConnectError::Abandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        self.cancel();
    }
}
