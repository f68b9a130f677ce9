//! Metrics collection.
//!
//! # Metrics
//! - `client_requests_total` (counter): dispatched exchanges by method, status
//! - `client_request_duration_seconds` (histogram): exchange latency
//! - `client_redirects_total` (counter): followed redirects by status
//! - `client_acquisitions_total` (counter): pool acquisitions by outcome
//! - `client_websocket_upgrades_total` (counter): upgrades by outcome
//!
//! Recording goes through the `metrics` facade; nothing is exported unless
//! the embedding application installs a recorder.

use std::time::Instant;

/// Record a completed request/response exchange.
pub fn record_request(method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "client_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("client_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

/// Record a redirect hop that was followed.
pub fn record_redirect(status: u16) {
    metrics::counter!("client_redirects_total", "status" => status.to_string()).increment(1);
}

/// Record the outcome of a connection acquisition.
pub fn record_acquisition(outcome: &'static str) {
    metrics::counter!("client_acquisitions_total", "outcome" => outcome).increment(1);
}

/// Record the outcome of a WebSocket upgrade.
pub fn record_websocket_upgrade(outcome: &'static str) {
    metrics::counter!("client_websocket_upgrades_total", "outcome" => outcome).increment(1);
}
