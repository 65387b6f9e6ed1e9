//! Movies API server.
//!
//! ```text
//!   request ─▶ panic recovery ─▶ metrics ─▶ CORS ─▶ rate limit ─▶ authenticate
//!                                                                    │
//!   response ◀──────────────────── handler ◀── permission check ◀────┘
//!
//!   lifecycle: signal ─▶ ShutdownCoordinator ─▶ listener drain ─▶ background drain
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use movies_api::config::{load_config, validate_config, AppConfig, ConfigError};
use movies_api::http::{Collaborators, HttpServer};
use movies_api::lifecycle::signals::spawn_signal_listener;
use movies_api::observability::{logging, metrics};
use movies_api::store::MemoryStore;

#[derive(Parser, Debug)]
#[command(name = "movies-api")]
#[command(about = "Movies catalogue JSON API", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API server port (keeps the configured host).
    #[arg(long)]
    port: Option<u16>,

    /// Environment (development|staging|production).
    #[arg(long)]
    env: Option<String>,

    /// Rate limiter maximum requests per second.
    #[arg(long)]
    limiter_rps: Option<f64>,

    /// Rate limiter maximum burst.
    #[arg(long)]
    limiter_burst: Option<u32>,

    /// Enable or disable the rate limiter.
    #[arg(long)]
    limiter_enabled: Option<bool>,

    /// Trusted CORS origins (space separated).
    #[arg(long)]
    cors_trusted_origins: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut AppConfig) {
        if let Some(port) = self.port {
            let host = config
                .listener
                .bind_address
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            config.listener.bind_address = format!("{host}:{port}");
        }
        if let Some(env) = self.env {
            config.env = env;
        }
        if let Some(rps) = self.limiter_rps {
            config.limiter.requests_per_second = rps;
        }
        if let Some(burst) = self.limiter_burst {
            config.limiter.burst_size = burst;
        }
        if let Some(enabled) = self.limiter_enabled {
            config.limiter.enabled = enabled;
        }
        if let Some(origins) = self.cors_trusted_origins {
            config.cors.trusted_origins = origins.split_whitespace().map(str::to_string).collect();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    cli.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "movies-api starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        env = %config.env,
        limiter_enabled = config.limiter.enabled,
        limiter_rps = config.limiter.requests_per_second,
        limiter_burst = config.limiter.burst_size,
        trusted_origins = config.cors.trusted_origins.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        // Already validated as a socket address.
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_prometheus(addr);
        }
    }

    let store = MemoryStore::new();
    let collaborators = Collaborators::in_memory_with_log_mailer(&store, &config.mail.sender);

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(config, collaborators);
    spawn_signal_listener(server.coordinator());

    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
