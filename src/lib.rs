//! Movies API library.
//!
//! A JSON API over a movies catalogue, fronted by a request pipeline:
//! panic recovery, metrics, CORS, per-client rate limiting, bearer token
//! authentication and per-route permission checks, with coordinated
//! graceful shutdown that drains background work before exit.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod mailer;
pub mod observability;
pub mod resilience;
pub mod security;
pub mod store;

pub use config::AppConfig;
pub use http::HttpServer;
pub use lifecycle::ShutdownCoordinator;
