//! Per-endpoint slot accounting.
//!
//! # Responsibilities
//! - Enforce the per-endpoint connection limit
//! - Bound the number of acquisitions waiting for a slot
//! - Track live connections so shutdown can invalidate them

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::error::ConnectError;
use crate::net::{ConnectionId, Endpoint, InvalidationHandle};

/// Connection slots for a single endpoint.
#[derive(Debug)]
pub struct EndpointSlot {
    pub endpoint: Endpoint,
    /// Maximum concurrent connections allowed.
    pub max_connections: usize,
    /// Maximum acquisitions allowed to queue.
    pub max_waiters: usize,
    permits: Arc<Semaphore>,
    active_connections: AtomicUsize,
    waiting: AtomicUsize,
    live: DashMap<ConnectionId, InvalidationHandle>,
}

impl EndpointSlot {
    pub fn new(endpoint: Endpoint, max_connections: usize, max_waiters: usize) -> Self {
        Self {
            endpoint,
            max_connections,
            max_waiters,
            permits: Arc::new(Semaphore::new(max_connections)),
            active_connections: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            live: DashMap::new(),
        }
    }

    /// Number of connections currently leased out.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Number of acquisitions queued for a slot.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }

    /// Reserve a slot, queueing when the endpoint is at its limit.
    pub async fn reserve(&self) -> Result<OwnedSemaphorePermit, ConnectError> {
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => return Err(ConnectError::PoolClosed),
            Err(TryAcquireError::NoPermits) => {}
        }

        let _queued = self.try_queue().ok_or_else(|| ConnectError::PoolExhausted {
            endpoint: self.endpoint.to_string(),
            max_connections: self.max_connections,
            max_waiters: self.max_waiters,
        })?;

        tracing::debug!(endpoint = %self.endpoint, waiting = self.waiting(), "Endpoint at limit, queueing");

        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ConnectError::PoolClosed)
    }

    fn try_queue(&self) -> Option<QueueGuard<'_>> {
        let mut prev = self.waiting.load(Ordering::Relaxed);
        loop {
            if prev >= self.max_waiters {
                return None;
            }
            match self.waiting.compare_exchange_weak(prev, prev + 1, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => break,
                Err(x) => prev = x,
            }
        }
        Some(QueueGuard { slot: self })
    }

    /// Turn a reserved slot into a lease tied to a live connection.
    pub fn lease(
        self: &Arc<Self>,
        permit: OwnedSemaphorePermit,
        id: ConnectionId,
        handle: InvalidationHandle,
    ) -> EndpointLease {
        self.live.insert(id, handle);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        EndpointLease {
            slot: Arc::clone(self),
            id,
            _permit: permit,
        }
    }

    /// Refuse further reservations and invalidate every live connection.
    pub fn close(&self) {
        self.permits.close();
        for entry in self.live.iter() {
            entry.value().invalidate();
        }
        tracing::debug!(endpoint = %self.endpoint, live = self.live.len(), "Endpoint slot closed");
    }
}

struct QueueGuard<'a> {
    slot: &'a EndpointSlot,
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        self.slot.waiting.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Held by a delivered connection; dropping it frees the endpoint slot.
#[derive(Debug)]
pub struct EndpointLease {
    slot: Arc<EndpointSlot>,
    id: ConnectionId,
    _permit: OwnedSemaphorePermit,
}

impl Drop for EndpointLease {
    fn drop(&mut self) {
        self.slot.live.remove(&self.id);
        self.slot.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Connection;

    fn slot(max_connections: usize, max_waiters: usize) -> Arc<EndpointSlot> {
        Arc::new(EndpointSlot::new(Endpoint::new("h", 80, false), max_connections, max_waiters))
    }

    fn connection() -> Connection {
        let (io, _) = tokio::io::duplex(8);
        Connection::new(io, Endpoint::new("h", 80, false))
    }

    #[tokio::test]
    async fn lease_tracks_active_connections() {
        let slot = slot(2, 0);
        let conn = connection();
        let permit = slot.reserve().await.unwrap();
        let lease = slot.lease(permit, conn.id(), conn.invalidation_handle());
        assert_eq!(slot.active_connections(), 1);

        drop(lease);
        assert_eq!(slot.active_connections(), 0);
    }

    #[tokio::test]
    async fn full_queue_is_exhausted() {
        let slot = slot(1, 0);
        let _held = slot.reserve().await.unwrap();

        let err = slot.reserve().await.unwrap_err();
        assert!(matches!(err, ConnectError::PoolExhausted { max_connections: 1, .. }));
        assert_eq!(slot.waiting(), 0);
    }

    #[tokio::test]
    async fn close_invalidates_and_refuses() {
        let slot = slot(1, 1);
        let conn = connection();
        let permit = slot.reserve().await.unwrap();
        let _lease = slot.lease(permit, conn.id(), conn.invalidation_handle());

        slot.close();
        assert!(!conn.is_valid());
        assert!(matches!(slot.reserve().await, Err(ConnectError::PoolClosed)));
    }
}
