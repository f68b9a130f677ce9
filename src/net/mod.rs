//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatch target
//!     → host.rs (bare host for dialing, bracketed inside authorities)
//!     → proxy.rs (tunnel decision, absolute-form rewrite)
//!     → acquire.rs (Waiter handed to the pool, Acquisition awaited)
//!     → tls.rs (negotiated-protocol options for the TLS layer)
//!     → connection.rs (stream + lease + validity handed back)
//!     → Hand off to HTTP exchange or WebSocket upgrade
//! ```
//!
//! # Design Decisions
//! - Acquisition never blocks the calling thread
//! - Exactly one resolution per waiter, enforced by ownership
//! - TLS is optional and handled behind a trait

pub mod acquire;
pub mod connection;
pub mod host;
pub mod proxy;
pub mod tls;

pub use acquire::{Acquisition, Purpose, Waiter};
pub use connection::{BoxedIo, Connection, ConnectionId, Endpoint, InvalidationHandle, Io};
pub use proxy::{ProxyRewrite, ProxyTunnel};
pub use tls::{TlsConnector, TlsOptions};
