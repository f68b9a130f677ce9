//! Redirect policies.
//!
//! # Responsibilities
//! - Decide whether a completed response leads to another request
//! - Resolve `Location` against the request that produced the response
//! - Apply the method rewrite rules of 301/302/303/307
//!
//! # Design Decisions
//! - A policy is a strategy object swapped atomically on the client
//! - Decisions are asynchronous so policies may consult other services
//! - An unusable `Location` means "no redirect", never an error

use futures_util::future::BoxFuture;
use hyper::{Method, StatusCode};
use url::Url;

use crate::error::ClientResult;
use crate::http::client::HttpClient;
use crate::http::request::RequestHandle;
use crate::http::response::ClientResponse;
use crate::net::host::url_host;

/// Maps a completed response to the next request, if any.
pub trait RedirectPolicy: Send + Sync + 'static {
    fn decide<'a>(
        &'a self,
        client: &'a HttpClient,
        response: &'a ClientResponse,
    ) -> BoxFuture<'a, ClientResult<Option<RequestHandle>>>;
}

impl<F> RedirectPolicy for F
where
    F: Fn(&HttpClient, &ClientResponse) -> ClientResult<Option<RequestHandle>> + Send + Sync + 'static,
{
    fn decide<'a>(
        &'a self,
        client: &'a HttpClient,
        response: &'a ClientResponse,
    ) -> BoxFuture<'a, ClientResult<Option<RequestHandle>>> {
        Box::pin(async move { self(client, response) })
    }
}

/// Where a redirect leads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectDecision {
    pub method: Method,
    pub host: String,
    pub port: u16,
    pub ssl: bool,
    /// Path plus `?query`.
    pub uri: String,
}

/// Resolve a response into a redirect target using the standard rules.
///
/// Only 301, 302, 303 and 307 redirect. 301/302/303 switch to `GET`; 307
/// keeps the original method. The target must be `http` or `https`.
pub fn resolve_redirect(response: &ClientResponse) -> Option<RedirectDecision> {
    let method = match response.status() {
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER => Method::GET,
        StatusCode::TEMPORARY_REDIRECT => response.request().method.clone(),
        _ => return None,
    };

    let location = response.location()?;
    let base = &response.request().absolute_uri;

    let target = match Url::parse(base).and_then(|base| base.join(location)) {
        Ok(target) => target,
        Err(e) => {
            tracing::debug!(location = %location, base = %base, error = %e, "Ignoring unresolvable redirect");
            return None;
        }
    };

    let ssl = match target.scheme() {
        "http" => false,
        "https" => true,
        other => {
            tracing::debug!(location = %location, scheme = %other, "Ignoring redirect to unsupported scheme");
            return None;
        }
    };

    let host = url_host(&target)?;
    let port = target.port_or_known_default()?;
    let mut uri = target.path().to_string();
    if let Some(query) = target.query() {
        uri.push('?');
        uri.push_str(query);
    }

    Some(RedirectDecision {
        method,
        host,
        port,
        ssl,
        uri,
    })
}

/// Follows redirects with [`resolve_redirect`], building the next request
/// through the client with a fresh header set.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRedirectPolicy;

impl RedirectPolicy for DefaultRedirectPolicy {
    fn decide<'a>(
        &'a self,
        client: &'a HttpClient,
        response: &'a ClientResponse,
    ) -> BoxFuture<'a, ClientResult<Option<RequestHandle>>> {
        Box::pin(async move {
            let Some(decision) = resolve_redirect(response) else {
                return Ok(None);
            };
            client
                .dispatch(decision.method, &decision.host, decision.port, Some(decision.ssl), &decision.uri, None)
                .map(Some)
        })
    }
}
