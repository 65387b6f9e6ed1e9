//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and the
//! relationships between fields. Every violation is collected so a
//! misconfigured deployment sees all of its problems at once.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::AppConfig;

/// Upper bound for collaborator lookups. Anything longer stalls requests.
const MAX_LOOKUP_TIMEOUT_MS: u64 = 10_000;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Error)]
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

/// Validate a parsed configuration, returning every violation found.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than zero"));
    }

    let limiter = &config.limiter;
    if !limiter.requests_per_second.is_finite() || limiter.requests_per_second <= 0.0 {
        errors.push(ValidationError::new(
            "limiter.requests_per_second",
            "must be a positive number",
        ));
    }
    if limiter.burst_size == 0 {
        errors.push(ValidationError::new("limiter.burst_size", "must be at least 1"));
    }
    if limiter.sweep_interval_secs == 0 {
        errors.push(ValidationError::new(
            "limiter.sweep_interval_secs",
            "must be at least 1 second",
        ));
    }
    if limiter.stale_after_secs < limiter.sweep_interval_secs {
        errors.push(ValidationError::new(
            "limiter.stale_after_secs",
            "must not be shorter than the sweep interval",
        ));
    }

    if config.auth.lookup_timeout_ms == 0 || config.auth.lookup_timeout_ms > MAX_LOOKUP_TIMEOUT_MS {
        errors.push(ValidationError::new(
            "auth.lookup_timeout_ms",
            format!("must be between 1 and {MAX_LOOKUP_TIMEOUT_MS}"),
        ));
    }

    for origin in &config.cors.trusted_origins {
        if origin.trim().is_empty() {
            errors.push(ValidationError::new("cors.trusted_origins", "must not contain empty entries"));
        } else if origin.ends_with('/') {
            errors.push(ValidationError::new(
                "cors.trusted_origins",
                format!("'{origin}' must not end with '/'; browsers send origins without a path"),
            ));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
