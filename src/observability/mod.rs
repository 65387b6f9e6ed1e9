//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (request counters, status counts, latency)
//!
//! Consumers:
//!     → stdout (fmt layer)
//!     → GET /debug/vars (JSON snapshot)
//!     → Prometheus scrape (optional)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through all log lines for a request
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;

pub use metrics::{MetricsCollector, MetricsSnapshot};
