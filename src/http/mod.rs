//! HTTP client subsystem.
//!
//! # Data Flow
//! ```text
//! Caller
//!     → client.rs (validate, closed check, proxy rewrite)
//!     → request.rs (RequestHandle; send → acquire → HTTP/1 exchange)
//!     → response.rs (buffered ClientResponse)
//!     → redirect.rs (policy decides next RequestHandle, loop)
//!
//! Caller
//!     → client.rs (websocket_stream)
//!     → websocket.rs (first handler → acquire → upgrade handshake)
//! ```

pub mod client;
pub mod redirect;
pub mod request;
pub mod response;
pub mod websocket;

pub use client::HttpClient;
pub use redirect::{resolve_redirect, DefaultRedirectPolicy, RedirectDecision, RedirectPolicy};
pub use request::{RequestHandle, RequestId};
pub use response::{ClientResponse, RequestSummary};
pub use websocket::{
    WebSocket, WebSocketConnectOptions, WebSocketUpgradeStream, WebSocketVersion, MAX_UPGRADE_RETRIES,
};
