//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for an [`HttpClient`](crate::http::HttpClient).
///
/// Copied into the client at construction and never mutated afterwards.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Host used when a call does not name one.
    pub default_host: String,

    /// Port used when a call does not name one.
    pub default_port: u16,

    /// Default TLS flag for requests that do not override it.
    pub ssl: bool,

    /// Negotiate the application protocol with ALPN (requires `ssl`).
    pub use_alpn: bool,

    /// Protocols offered through ALPN. Empty means derive from `protocol_version`.
    pub alpn_versions: Vec<HttpVersion>,

    /// Protocol version requested from the pool.
    pub protocol_version: HttpVersion,

    /// Optional forward proxy.
    pub proxy: Option<ProxyOptions>,

    /// Maximum WebSocket frame size in bytes.
    pub max_websocket_frame_size: usize,

    /// Whether request handles follow redirects unless told otherwise.
    pub follow_redirects: bool,

    /// Maximum redirect hops followed for a single send.
    pub max_redirects: u32,

    /// Maximum response body size buffered by `send`.
    pub max_response_body_bytes: usize,

    /// Settings for the bundled TCP pool.
    pub pool: PoolConfig,

    /// Logging settings.
    pub observability: ObservabilityConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_host: "localhost".to_string(),
            default_port: 80,
            ssl: false,
            use_alpn: false,
            alpn_versions: Vec::new(),
            protocol_version: HttpVersion::Http11,
            proxy: None,
            max_websocket_frame_size: 65_536,
            follow_redirects: false,
            max_redirects: 16,
            max_response_body_bytes: 8 * 1024 * 1024, // 8MB
            pool: PoolConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// HTTP protocol versions understood by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpVersion {
    Http10,
    Http11,
    Http2,
}

impl HttpVersion {
    /// ALPN protocol identifier.
    pub fn alpn_id(&self) -> &'static str {
        match self {
            HttpVersion::Http10 => "http/1.0",
            HttpVersion::Http11 => "http/1.1",
            HttpVersion::Http2 => "h2",
        }
    }
}

impl From<HttpVersion> for hyper::Version {
    fn from(version: HttpVersion) -> Self {
        match version {
            HttpVersion::Http10 => hyper::Version::HTTP_10,
            HttpVersion::Http11 => hyper::Version::HTTP_11,
            HttpVersion::Http2 => hyper::Version::HTTP_2,
        }
    }
}

/// Kind of forward proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    Http,
    Socks4,
    Socks5,
}

/// Forward proxy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyOptions {
    /// Proxy host.
    pub host: String,

    /// Proxy port.
    #[serde(default = "default_proxy_port")]
    pub port: u16,

    /// Proxy protocol.
    #[serde(default = "default_proxy_type")]
    pub kind: ProxyType,

    /// Username for `Proxy-Authorization`.
    #[serde(default)]
    pub username: Option<String>,

    /// Password for `Proxy-Authorization`.
    #[serde(default)]
    pub password: Option<String>,
}

impl ProxyOptions {
    /// An HTTP proxy without credentials.
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            kind: ProxyType::Http,
            username: None,
            password: None,
        }
    }

    /// Attach basic credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

fn default_proxy_port() -> u16 {
    3128
}

fn default_proxy_type() -> ProxyType {
    ProxyType::Http
}

/// Connection pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum concurrent connections per endpoint.
    pub max_pool_size: usize,

    /// Maximum acquisitions allowed to wait for a slot per endpoint.
    pub max_wait_queue_size: usize,

    /// Connection establishment timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: 5,
            max_wait_queue_size: 64,
            connect_timeout_ms: 60_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: ClientConfig = toml::from_str("default_host = \"example.com\"").unwrap();
        assert_eq!(config.default_host, "example.com");
        assert_eq!(config.default_port, 80);
        assert_eq!(config.protocol_version, HttpVersion::Http11);
        assert_eq!(config.max_redirects, 16);
        assert!(config.proxy.is_none());
    }

    #[test]
    fn proxy_section_parses() {
        let config: ClientConfig = toml::from_str(
            r#"
            protocol_version = "http2"

            [proxy]
            host = "proxy.local"
            port = 8888
            kind = "http"
            username = "user"
            password = "pass"
            "#,
        )
        .unwrap();
        let proxy = config.proxy.unwrap();
        assert_eq!(proxy.kind, ProxyType::Http);
        assert_eq!(proxy.port, 8888);
        assert_eq!(proxy.username.as_deref(), Some("user"));
        assert_eq!(config.protocol_version, HttpVersion::Http2);
    }
}
