//! Host name forms.
//!
//! Hosts are carried bare (`::1`, `example.com`) so they can be resolved and
//! dialed. Brackets are added back only where a host is written into an
//! authority (`Host` header, absolute URIs, WebSocket URLs).

use std::borrow::Cow;

use url::{Host, Url};

/// Host of `url` in dialable form.
pub fn url_host(url: &Url) -> Option<String> {
    match url.host()? {
        Host::Domain(domain) => Some(domain.to_string()),
        Host::Ipv4(addr) => Some(addr.to_string()),
        Host::Ipv6(addr) => Some(addr.to_string()),
    }
}

/// Strip the brackets of an IPv6 literal given in authority form.
pub fn bare_host(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(host)
}

/// Host as written inside an authority.
pub fn authority_host(host: &str) -> Cow<'_, str> {
    if host.contains(':') && !host.starts_with('[') {
        Cow::Owned(format!("[{}]", host))
    } else {
        Cow::Borrowed(host)
    }
}

/// `host[:port]`, leaving out a port equal to `default_port`.
pub fn authority(host: &str, port: u16, default_port: u16) -> String {
    if port == default_port {
        authority_host(host).into_owned()
    } else {
        format!("{}:{}", authority_host(host), port)
    }
}
