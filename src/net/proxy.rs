//! Forward-proxy tunneling decisions.
//!
//! # Responsibilities
//! - Decide whether a client tunnels plain HTTP through a forward proxy
//! - Rewrite the request target to absolute form
//! - Redirect the connect target to the proxy
//! - Inject `Proxy-Authorization` when credentials are configured
//!
//! # Design Decisions
//! - Pure: derived from config + target, never persisted
//! - Only plain traffic through an `http` proxy is rewritten; TLS and SOCKS
//!   traffic connect directly at this layer

use base64::Engine;
use hyper::header::{HeaderMap, HeaderValue, PROXY_AUTHORIZATION};

use crate::config::{ClientConfig, ProxyOptions, ProxyType};
use crate::error::ClientError;
use crate::net::host::authority;

const DEFAULT_PLAIN_PORT: u16 = 80;

/// Result of rewriting one request for the proxy.
#[derive(Debug, Clone)]
pub struct ProxyRewrite {
    /// Absolute-form request target.
    pub uri: String,
    /// Headers to send; only created when something had to be injected.
    pub headers: Option<HeaderMap>,
    /// Host the connection is opened to (the proxy).
    pub connect_host: String,
    /// Port the connection is opened to (the proxy).
    pub connect_port: u16,
    /// Logical `Host` header of the origin.
    pub host_header: String,
}

/// Tunneling setup of a client, present only when tunneling applies.
#[derive(Debug, Clone)]
pub struct ProxyTunnel {
    proxy: ProxyOptions,
    authorization: Option<HeaderValue>,
}

impl ProxyTunnel {
    /// Tunneling applies to plain clients with an `http` proxy.
    pub fn from_config(config: &ClientConfig) -> Option<Self> {
        let proxy = config.proxy.as_ref()?;
        if config.ssl || proxy.kind != ProxyType::Http {
            return None;
        }

        let authorization = match (&proxy.username, &proxy.password) {
            (Some(user), Some(pass)) => {
                let token = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, pass));
                HeaderValue::from_str(&format!("Basic {}", token)).ok()
            }
            _ => None,
        };

        Some(Self {
            proxy: proxy.clone(),
            authorization,
        })
    }

    pub fn proxy(&self) -> &ProxyOptions {
        &self.proxy
    }

    /// Rewrite a plain request for `host:port` + `uri`.
    pub fn rewrite(
        &self,
        host: &str,
        port: u16,
        uri: &str,
        headers: Option<HeaderMap>,
    ) -> Result<ProxyRewrite, ClientError> {
        if host.is_empty() {
            return Err(ClientError::InvalidArgument("no empty host accepted".to_string()));
        }

        let authority = authority(host, port, DEFAULT_PLAIN_PORT);

        let headers = match &self.authorization {
            Some(value) => {
                let mut headers = headers.unwrap_or_default();
                headers.insert(PROXY_AUTHORIZATION, value.clone());
                Some(headers)
            }
            None => headers,
        };

        tracing::trace!(
            origin = %authority,
            proxy_host = %self.proxy.host,
            proxy_port = self.proxy.port,
            "Tunneling request through proxy"
        );

        Ok(ProxyRewrite {
            uri: format!("http://{}{}", authority, uri),
            headers,
            connect_host: self.proxy.host.clone(),
            connect_port: self.proxy.port,
            host_header: authority,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(proxy: ProxyOptions) -> ClientConfig {
        ClientConfig {
            proxy: Some(proxy),
            ..ClientConfig::default()
        }
    }

    #[test]
    fn rewrites_with_credentials() {
        let config = config_with(ProxyOptions::http("proxy", 3128).with_credentials("user", "pass"));
        let tunnel = ProxyTunnel::from_config(&config).unwrap();

        let rewrite = tunnel.rewrite("origin", 8080, "/p", None).unwrap();
        assert_eq!(rewrite.uri, "http://origin:8080/p");
        assert_eq!(rewrite.connect_host, "proxy");
        assert_eq!(rewrite.connect_port, 3128);
        assert_eq!(rewrite.host_header, "origin:8080");

        let headers = rewrite.headers.unwrap();
        assert_eq!(headers.get_all(PROXY_AUTHORIZATION).iter().count(), 1);
        // base64("user:pass")
        assert_eq!(headers[PROXY_AUTHORIZATION], "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn default_port_is_elided() {
        let tunnel = ProxyTunnel::from_config(&config_with(ProxyOptions::http("proxy", 3128))).unwrap();
        let rewrite = tunnel.rewrite("origin", 80, "/a?b=c", None).unwrap();
        assert_eq!(rewrite.uri, "http://origin/a?b=c");
        assert_eq!(rewrite.host_header, "origin");
    }

    #[test]
    fn ipv6_origin_is_bracketed() {
        let tunnel = ProxyTunnel::from_config(&config_with(ProxyOptions::http("proxy", 3128))).unwrap();
        let rewrite = tunnel.rewrite("::1", 8080, "/x", None).unwrap();
        assert_eq!(rewrite.uri, "http://[::1]:8080/x");
        assert_eq!(rewrite.host_header, "[::1]:8080");
        assert_eq!(rewrite.connect_host, "proxy");
    }

    #[test]
    fn headers_created_only_when_needed() {
        let tunnel = ProxyTunnel::from_config(&config_with(ProxyOptions::http("proxy", 3128))).unwrap();
        let rewrite = tunnel.rewrite("origin", 80, "/", None).unwrap();
        assert!(rewrite.headers.is_none());
    }

    #[test]
    fn existing_authorization_is_replaced() {
        let config = config_with(ProxyOptions::http("proxy", 3128).with_credentials("user", "pass"));
        let tunnel = ProxyTunnel::from_config(&config).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(PROXY_AUTHORIZATION, HeaderValue::from_static("Basic stale"));
        headers.insert("x-trace", HeaderValue::from_static("1"));

        let headers = tunnel.rewrite("origin", 80, "/", Some(headers)).unwrap().headers.unwrap();
        assert_eq!(headers.get_all(PROXY_AUTHORIZATION).iter().count(), 1);
        assert_eq!(headers[PROXY_AUTHORIZATION], "Basic dXNlcjpwYXNz");
        assert_eq!(headers["x-trace"], "1");
    }

    #[test]
    fn no_tunnel_for_ssl_or_socks() {
        let mut ssl = config_with(ProxyOptions::http("proxy", 3128));
        ssl.ssl = true;
        assert!(ProxyTunnel::from_config(&ssl).is_none());

        let mut socks = ProxyOptions::http("proxy", 1080);
        socks.kind = ProxyType::Socks5;
        assert!(ProxyTunnel::from_config(&config_with(socks)).is_none());

        assert!(ProxyTunnel::from_config(&ClientConfig::default()).is_none());
    }
}
