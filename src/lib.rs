//! Request-dispatch and connection-acquisition core of an async
//! HTTP/WebSocket client.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────────────────────────────────────────┐
//!                  │                       HttpClient                         │
//!                  │                                                          │
//!   dispatch()     │  ┌──────────┐    ┌──────────────┐    ┌───────────────┐   │
//!   ───────────────┼─▶│  proxy   │───▶│RequestHandle │───▶│    Waiter     │───┼──▶ ConnectionPool
//!                  │  │ tunnel   │    │   send()     │    │ (acquisition) │   │    (TCP / TLS)
//!                  │  └──────────┘    └──────┬───────┘    └───────┬───────┘   │
//!                  │                         │                    │           │
//!                  │                         ▼                    ▼           │
//!   ClientResponse │                  ┌──────────────┐    ┌───────────────┐   │
//!   ◀──────────────┼──────────────────│   redirect   │◀───│  HTTP/1 or    │   │
//!                  │                  │    policy    │    │  WS upgrade   │   │
//!                  │                  └──────────────┘    └───────────────┘   │
//!                  │                                                          │
//!                  │  ┌────────────────────────────────────────────────────┐  │
//!                  │  │   config  ·  lifecycle (contexts)  ·  observability │  │
//!                  │  └────────────────────────────────────────────────────┘  │
//!                  └──────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod pool;

pub use config::ClientConfig;
pub use error::{ClientError, ClientResult, ConnectError};
pub use http::{ClientResponse, HttpClient, RequestHandle, WebSocketConnectOptions, WebSocketUpgradeStream};
pub use lifecycle::{Context, ContextKind};
pub use pool::{ConnectionPool, PoolMetrics, TcpConnectionPool};
