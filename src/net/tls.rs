//! TLS seam between the pool and the TLS/ALPN layer.
//!
//! The dispatch core only carries the negotiated-protocol list; the
//! handshake itself belongs to whatever [`TlsConnector`] is plugged in.

use std::io;

use futures_util::future::BoxFuture;
use tokio::net::TcpStream;

use crate::config::{ClientConfig, HttpVersion};
use crate::net::connection::BoxedIo;

/// Negotiated-protocol configuration handed to the TLS layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsOptions {
    pub use_alpn: bool,
    pub alpn_versions: Vec<HttpVersion>,
}

impl TlsOptions {
    /// Derive the ALPN list: explicit versions win, otherwise HTTP/2 clients
    /// offer `h2` then `http/1.1` and everything else offers its own version.
    pub fn from_config(config: &ClientConfig) -> Self {
        let alpn_versions = if config.alpn_versions.is_empty() {
            match config.protocol_version {
                HttpVersion::Http2 => vec![HttpVersion::Http2, HttpVersion::Http11],
                other => vec![other],
            }
        } else {
            config.alpn_versions.clone()
        };

        Self {
            use_alpn: config.use_alpn,
            alpn_versions,
        }
    }

    /// ALPN identifiers in preference order.
    pub fn alpn_protocols(&self) -> Vec<&'static str> {
        self.alpn_versions.iter().map(HttpVersion::alpn_id).collect()
    }
}

/// Performs the client TLS handshake over an established TCP stream.
pub trait TlsConnector: Send + Sync + 'static {
    /// Returns the encrypted stream and the protocol selected through ALPN.
    fn connect(
        &self,
        server_name: String,
        stream: TcpStream,
        options: TlsOptions,
    ) -> BoxFuture<'static, io::Result<(BoxedIo, HttpVersion)>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http2_offers_fallback() {
        let config = ClientConfig {
            protocol_version: HttpVersion::Http2,
            ..ClientConfig::default()
        };
        let options = TlsOptions::from_config(&config);
        assert_eq!(options.alpn_protocols(), vec!["h2", "http/1.1"]);
    }

    #[test]
    fn http11_offers_itself() {
        let options = TlsOptions::from_config(&ClientConfig::default());
        assert_eq!(options.alpn_versions, vec![HttpVersion::Http11]);
    }

    #[test]
    fn explicit_list_wins() {
        let config = ClientConfig {
            alpn_versions: vec![HttpVersion::Http10],
            protocol_version: HttpVersion::Http2,
            ..ClientConfig::default()
        };
        assert_eq!(TlsOptions::from_config(&config).alpn_protocols(), vec!["http/1.0"]);
    }
}
