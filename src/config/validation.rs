//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Reject contradictory options (ALPN without TLS)
//! - Validate value ranges (ports, sizes, timeouts)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into a client

use crate::config::schema::ClientConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check a configuration for contradictory or out-of-range values.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.use_alpn && !config.ssl {
        errors.push(ValidationError::new("use_alpn", "must enable SSL when using ALPN"));
    }
    if config.default_port == 0 {
        errors.push(ValidationError::new("default_port", "must be non-zero"));
    }
    if config.max_websocket_frame_size == 0 {
        errors.push(ValidationError::new("max_websocket_frame_size", "must be greater than zero"));
    }
    if let Some(proxy) = &config.proxy {
        if proxy.host.is_empty() {
            errors.push(ValidationError::new("proxy.host", "must not be empty"));
        }
        if proxy.port == 0 {
            errors.push(ValidationError::new("proxy.port", "must be non-zero"));
        }
    }
    if config.pool.max_pool_size == 0 {
        errors.push(ValidationError::new("pool.max_pool_size", "must be greater than zero"));
    }
    if config.pool.connect_timeout_ms == 0 {
        errors.push(ValidationError::new("pool.connect_timeout_ms", "must be greater than zero"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
