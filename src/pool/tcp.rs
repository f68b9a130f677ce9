//! Bundled TCP connection pool.
//!
//! # Responsibilities
//! - Resolve endpoints and dial them within the connect timeout
//! - Hand TLS endpoints to a pluggable [`TlsConnector`]
//! - Apply per-endpoint limits through [`EndpointSlot`]
//! - Fail pending and future acquisitions after shutdown
//! - Drop slots of endpoints with no leases and no queued acquisitions

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::net::TcpStream;
use tokio::runtime::Handle;

use crate::config::{HttpVersion, PoolConfig};
use crate::error::ConnectError;
use crate::net::{Connection, Endpoint, TlsConnector, TlsOptions, Waiter};
use crate::observability::metrics;
use crate::pool::endpoint::EndpointSlot;
use crate::pool::{ConnectionPool, PoolMetrics};

/// Per-endpoint limited pool dialing a fresh TCP connection per acquisition.
#[derive(Clone)]
pub struct TcpConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: PoolConfig,
    tls_options: TlsOptions,
    tls: Option<Arc<dyn TlsConnector>>,
    slots: DashMap<Endpoint, Arc<EndpointSlot>>,
    closed: AtomicBool,
    established: AtomicU64,
    failed: AtomicU64,
}

impl TcpConnectionPool {
    /// Create a pool. TLS endpoints fail with a handshake error unless a
    /// connector is supplied.
    pub fn new(config: PoolConfig, tls_options: TlsOptions, tls: Option<Arc<dyn TlsConnector>>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                tls_options,
                tls,
                slots: DashMap::new(),
                closed: AtomicBool::new(false),
                established: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn submit(&self, waiter: Waiter) {
        if self.is_closed() {
            self.inner.fail(waiter, ConnectError::PoolClosed);
            return;
        }

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(Arc::clone(&self.inner).serve(waiter));
            }
            Err(_) => {
                let err = ConnectError::Io {
                    endpoint: waiter.endpoint().to_string(),
                    source: io::Error::new(io::ErrorKind::Other, "no Tokio runtime to dial on"),
                };
                self.inner.fail(waiter, err);
            }
        }
    }
}

impl PoolInner {
    fn slot(&self, endpoint: &Endpoint) -> Arc<EndpointSlot> {
        self.slots
            .entry(endpoint.clone())
            .or_insert_with(|| {
                Arc::new(EndpointSlot::new(
                    endpoint.clone(),
                    self.config.max_pool_size,
                    self.config.max_wait_queue_size,
                ))
            })
            .clone()
    }

    /// Remove slots nobody references besides the map itself.
    ///
    /// Leases and in-flight acquisitions hold the slot, and `slot()` clones
    /// under the shard lock, so a slot seen unreferenced here is idle.
    fn evict_idle(&self) {
        self.slots.retain(|endpoint, slot| {
            let idle = Arc::strong_count(slot) == 1;
            if idle {
                tracing::trace!(endpoint = %endpoint, "Evicting idle endpoint slot");
            }
            !idle
        });
    }

    async fn serve(self: Arc<Self>, mut waiter: Waiter) {
        let endpoint = waiter.endpoint().clone();
        if waiter.is_cancelled() {
            tracing::trace!(endpoint = %endpoint, "Waiter cancelled before dialing");
            return;
        }

        self.evict_idle();
        let slot = self.slot(&endpoint);
        let reserved = tokio::select! {
            reserved = slot.reserve() => reserved,
            _ = waiter.closed() => {
                tracing::trace!(endpoint = %endpoint, "Waiter dropped while queued");
                return;
            }
        };
        let permit = match reserved {
            Ok(permit) => permit,
            Err(err) => return self.fail(waiter, err),
        };

        if waiter.is_cancelled() {
            return;
        }

        let conn = match self.dial(&endpoint, waiter.protocol_version()).await {
            Ok(conn) => conn,
            Err(err) => return self.fail(waiter, err),
        };

        let lease = slot.lease(permit, conn.id(), conn.invalidation_handle());
        let conn = conn.with_lease(lease);

        if self.closed.load(Ordering::Acquire) {
            conn.invalidation_handle().invalidate();
            return self.fail(waiter, ConnectError::PoolClosed);
        }

        let id = conn.id();
        match waiter.on_connection_established(conn) {
            Ok(()) => {
                self.established.fetch_add(1, Ordering::Relaxed);
                metrics::record_acquisition("established");
                tracing::debug!(endpoint = %endpoint, connection_id = %id, "Connection established");
            }
            Err(conn) => {
                // No reuse: dropping releases the slot.
                tracing::trace!(endpoint = %endpoint, connection_id = %conn.id(), "Connection returned by cancelled waiter");
            }
        }
    }

    async fn dial(&self, endpoint: &Endpoint, protocol: HttpVersion) -> Result<Connection, ConnectError> {
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let stream = tokio::time::timeout(timeout, connect_tcp(endpoint))
            .await
            .map_err(|_| ConnectError::Timeout {
                endpoint: endpoint.to_string(),
                timeout_ms: self.config.connect_timeout_ms,
            })??;

        if !endpoint.ssl {
            let protocol = match protocol {
                HttpVersion::Http10 => HttpVersion::Http10,
                _ => HttpVersion::Http11,
            };
            return Ok(Connection::new(stream, endpoint.clone()).with_protocol(protocol));
        }

        let connector = self.tls.as_ref().ok_or_else(|| ConnectError::Handshake {
            endpoint: endpoint.to_string(),
            reason: "no TLS connector configured".to_string(),
        })?;

        let (io, negotiated) = connector
            .connect(endpoint.host.clone(), stream, self.tls_options.clone())
            .await
            .map_err(|e| ConnectError::Handshake {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Connection::from_boxed(io, endpoint.clone()).with_protocol(negotiated))
    }

    fn fail(&self, waiter: Waiter, err: ConnectError) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        metrics::record_acquisition("failed");
        tracing::debug!(endpoint = %waiter.endpoint(), error = %err, "Connection acquisition failed");
        let _ = waiter.on_failure(err);
    }
}

async fn connect_tcp(endpoint: &Endpoint) -> Result<TcpStream, ConnectError> {
    let addrs: Vec<_> = tokio::net::lookup_host((endpoint.host.as_str(), endpoint.port))
        .await
        .map_err(|e| ConnectError::Dns {
            host: endpoint.host.clone(),
            reason: e.to_string(),
        })?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            Err(e) => {
                tracing::trace!(address = %addr, error = %e, "Connect attempt failed");
                last_err = Some(e);
            }
        }
    }

    Err(match last_err {
        Some(source) => ConnectError::Io {
            endpoint: endpoint.to_string(),
            source,
        },
        None => ConnectError::Dns {
            host: endpoint.host.clone(),
            reason: "no addresses found".to_string(),
        },
    })
}

impl ConnectionPool for TcpConnectionPool {
    fn acquire_request_connection(&self, waiter: Waiter) {
        self.submit(waiter);
    }

    fn acquire_websocket_connection(&self, waiter: Waiter) {
        self.submit(waiter);
    }

    fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for slot in self.inner.slots.iter() {
            slot.value().close();
        }
        tracing::info!(endpoints = self.inner.slots.len(), "Connection pool shut down");
    }

    fn metrics(&self) -> PoolMetrics {
        let mut metrics = PoolMetrics {
            endpoints: self.inner.slots.len(),
            total_established: self.inner.established.load(Ordering::Relaxed),
            total_failed: self.inner.failed.load(Ordering::Relaxed),
            closed: self.is_closed(),
            ..PoolMetrics::default()
        };
        for slot in self.inner.slots.iter() {
            metrics.active_connections += slot.active_connections();
            metrics.waiting += slot.waiting();
        }
        metrics
    }
}
