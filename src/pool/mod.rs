//! Connection pool subsystem.
//!
//! # Data Flow
//! ```text
//! HttpClient::acquire() → Waiter
//!     → ConnectionPool::acquire_request_connection / acquire_websocket_connection
//!     → endpoint.rs (per-endpoint slot: limit + bounded wait queue)
//!     → tcp.rs (DNS → connect with timeout → optional TLS)
//!     → Waiter resolved exactly once
//! ```
//!
//! # Design Decisions
//! - The dispatch core only sees the [`ConnectionPool`] trait
//! - Slots are released by dropping the connection's lease
//! - No keep-alive reuse in the bundled pool; every acquisition dials

use serde::Serialize;

use crate::net::Waiter;

pub mod endpoint;
pub mod tcp;

pub use endpoint::{EndpointLease, EndpointSlot};
pub use tcp::TcpConnectionPool;

/// Supplier of connections to the dispatch core.
///
/// Implementations must resolve every waiter they accept exactly once, unless
/// it is cancelled, and must not block the caller.
pub trait ConnectionPool: Send + Sync + 'static {
    /// Obtain a connection for a request/response exchange.
    fn acquire_request_connection(&self, waiter: Waiter);

    /// Obtain a raw connection for a WebSocket upgrade.
    fn acquire_websocket_connection(&self, waiter: Waiter);

    /// Stop handing out connections. Pending waiters fail with `PoolClosed`.
    fn shutdown(&self);

    /// Snapshot of pool usage.
    fn metrics(&self) -> PoolMetrics;
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolMetrics {
    /// Endpoints the pool has seen.
    pub endpoints: usize,
    /// Connections currently leased out.
    pub active_connections: usize,
    /// Acquisitions queued for a free slot.
    pub waiting: usize,
    /// Connections delivered since creation.
    pub total_established: u64,
    /// Acquisitions that ended in a failure.
    pub total_failed: u64,
    pub closed: bool,
}
