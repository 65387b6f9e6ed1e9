//! Request metrics.
//!
//! # Responsibilities
//! - Count requests received before the rest of the pipeline runs
//! - Count responses sent, per status code, once the response is final
//! - Accumulate total processing time
//! - Mirror every observation to the `metrics` facade for Prometheus
//!
//! # Metrics
//! - `http_requests_received_total` (counter)
//! - `http_responses_sent_total` (counter): labelled by status
//! - `http_request_duration_seconds` (histogram)
//!
//! # Design Decisions
//! - Exact in-process counters back `/debug/vars`; the facade is best effort
//! - The status recorded is the one on the response handed back up the
//!   stack, so later body writes can never change it
//! - Atomic increments only; nothing here can fail a request

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::{body::Body, extract::State, http::Request, middleware::Next, response::Response};
use dashmap::DashMap;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;

#[derive(Debug, Default)]
pub struct MetricsCollector {
    received: AtomicU64,
    sent: AtomicU64,
    processing_micros: AtomicU64,
    by_status: DashMap<u16, AtomicU64>,
}

/// Point-in-time copy of the collector's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests_received: u64,
    pub total_responses_sent: u64,
    pub total_processing_time_us: u64,
    pub total_responses_sent_by_status: BTreeMap<String, u64>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("http_requests_received_total").increment(1);
    }

    pub fn record_sent(&self, status: u16, started: Instant) {
        let elapsed = started.elapsed();
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);

        self.sent.fetch_add(1, Ordering::Relaxed);
        self.processing_micros.fetch_add(micros, Ordering::Relaxed);
        self.by_status
            .entry(status)
            .or_default()
            .fetch_add(1, Ordering::Relaxed);

        metrics::counter!("http_responses_sent_total", "status" => status.to_string()).increment(1);
        metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests_received: self.received.load(Ordering::Relaxed),
            total_responses_sent: self.sent.load(Ordering::Relaxed),
            total_processing_time_us: self.processing_micros.load(Ordering::Relaxed),
            total_responses_sent_by_status: self
                .by_status
                .iter()
                .map(|entry| (entry.key().to_string(), entry.value().load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

pub async fn metrics_middleware(
    State(collector): State<Arc<MetricsCollector>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let started = Instant::now();
    collector.record_received();

    let response = next.run(req).await;

    collector.record_sent(response.status().as_u16(), started);
    response
}

/// Install the Prometheus recorder and its scrape listener.
pub fn init_prometheus(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus exporter listening"),
        Err(e) => tracing::error!(error = %e, address = %addr, "Failed to install Prometheus exporter"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::{middleware, routing::get, Router};
    use tower::ServiceExt;

    #[tokio::test]
    async fn counts_requests_by_final_status() {
        let collector = Arc::new(MetricsCollector::new());
        let app = Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route("/teapot", get(|| async { StatusCode::IM_A_TEAPOT }))
            .layer(middleware::from_fn_with_state(collector.clone(), metrics_middleware));

        for uri in ["/ok", "/ok", "/teapot", "/missing"] {
            app.clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
        }

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.total_requests_received, 4);
        assert_eq!(snapshot.total_responses_sent, 4);
        assert_eq!(snapshot.total_responses_sent_by_status["200"], 2);
        assert_eq!(snapshot.total_responses_sent_by_status["418"], 1);
        assert_eq!(snapshot.total_responses_sent_by_status["404"], 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_are_not_lost() {
        let collector = Arc::new(MetricsCollector::new());
        let handles: Vec<_> = (0..100)
            .map(|i| {
                let collector = collector.clone();
                tokio::spawn(async move {
                    collector.record_received();
                    collector.record_sent(if i % 2 == 0 { 200 } else { 500 }, Instant::now());
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.total_requests_received, 100);
        assert_eq!(snapshot.total_responses_sent, 100);
        assert_eq!(snapshot.total_responses_sent_by_status["200"], 50);
        assert_eq!(snapshot.total_responses_sent_by_status["500"], 50);
    }
}
