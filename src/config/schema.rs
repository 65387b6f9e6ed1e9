//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the API service.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Deployment environment label (development, staging, production).
    pub env: String,

    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Per-client rate limiting.
    pub limiter: RateLimitConfig,

    /// Cross-origin policy.
    pub cors: CorsConfig,

    /// Credential lookup settings.
    pub auth: AuthConfig,

    /// Graceful shutdown policy.
    pub shutdown: ShutdownConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Outbound mail settings.
    pub mail: MailConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            env: "development".to_string(),
            listener: ListenerConfig::default(),
            timeouts: TimeoutConfig::default(),
            limiter: RateLimitConfig::default(),
            cors: CorsConfig::default(),
            auth: AuthConfig::default(),
            shutdown: ShutdownConfig::default(),
            observability: ObservabilityConfig::default(),
            mail: MailConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8100").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8100".to_string(),
        }
    }
}

/// Timeout configuration for request handling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Where the rate limiter takes a client's identity from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClientIdentity {
    /// The TCP peer address. Correct when clients connect directly.
    #[default]
    PeerAddress,
    /// `X-Forwarded-For` / `X-Real-IP`, falling back to the peer address.
    /// Only safe behind a proxy that overwrites these headers.
    ForwardedFor,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Steady refill rate per client, in tokens per second.
    pub requests_per_second: f64,

    /// Burst capacity (maximum bucket size).
    pub burst_size: u32,

    /// How often stale client buckets are swept, in seconds.
    pub sweep_interval_secs: u64,

    /// A bucket not seen for this long is evicted by the next sweep, in seconds.
    pub stale_after_secs: u64,

    /// Source of the per-client key.
    pub client_identity: ClientIdentity,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 2.0,
            burst_size: 4,
            sweep_interval_secs: 60,
            stale_after_secs: 180,
            client_identity: ClientIdentity::default(),
        }
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CorsConfig {
    /// Origins allowed to make cross-origin requests. Matched exactly.
    pub trusted_origins: Vec<String>,
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Deadline for token and permission lookups, in milliseconds.
    pub lookup_timeout_ms: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: 3_000,
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// How long in-flight requests get to finish once the listener stops.
    pub grace_period_secs: u64,

    /// Upper bound on waiting for background tasks. `None` waits forever.
    pub background_deadline_secs: Option<u64>,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 30,
            background_deadline_secs: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Outbound mail configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MailConfig {
    /// From header for outgoing mail.
    pub sender: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            sender: "Movies API <no-reply@movies.example>".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_limits() {
        let config = AppConfig::default();
        assert!(config.limiter.enabled);
        assert_eq!(config.limiter.requests_per_second, 2.0);
        assert_eq!(config.limiter.burst_size, 4);
        assert_eq!(config.shutdown.grace_period_secs, 30);
        assert!(config.shutdown.background_deadline_secs.is_none());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            env = "staging"

            [limiter]
            burst_size = 10
            client_identity = "forwarded_for"

            [cors]
            trusted_origins = ["https://allowed.example"]
            "#,
        )
        .unwrap();

        assert_eq!(config.env, "staging");
        assert_eq!(config.limiter.burst_size, 10);
        assert_eq!(config.limiter.requests_per_second, 2.0);
        assert_eq!(config.limiter.client_identity, ClientIdentity::ForwardedFor);
        assert_eq!(config.cors.trusted_origins, vec!["https://allowed.example"]);
        assert_eq!(config.auth.lookup_timeout_ms, 3_000);
    }
}
