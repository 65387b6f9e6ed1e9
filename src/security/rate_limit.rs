//! Per-client token bucket rate limiting.
//!
//! One bucket per client identity, created full on first sight, refilled
//! continuously at the configured rate and capped at the burst size. A
//! sweeper task evicts buckets that have not been seen for the staleness
//! window so churn of distinct clients cannot grow the map without bound.
//!
//! Single-process only: two instances behind a load balancer each keep
//! their own buckets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::{ClientIdentity, RateLimitConfig};
use crate::http::error::ApiError;
use crate::lifecycle::ShutdownState;
use crate::security::client_ip::client_key;

/// Rate limiter state for one client.
#[derive(Debug, Clone)]
struct ClientBucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl ClientBucket {
    fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_refill: now,
            last_seen: now,
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_refill = now;
        self.last_seen = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Shortest sweep period; a zero period would stall the ticker.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Registry of per-client buckets.
///
/// The bucket map is the only shared state; every admission and every
/// sweep takes the same lock, and no I/O happens while it is held.
pub struct RateLimiterRegistry {
    buckets: Mutex<HashMap<String, ClientBucket>>,
    enabled: bool,
    rate: f64,
    burst: f64,
    sweep_interval: Duration,
    stale_after: Duration,
    identity: ClientIdentity,
}

impl RateLimiterRegistry {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            enabled: config.enabled,
            rate: config.requests_per_second,
            burst: f64::from(config.burst_size),
            sweep_interval: Duration::from_secs(config.sweep_interval_secs).max(MIN_SWEEP_INTERVAL),
            stale_after: Duration::from_secs(config.stale_after_secs),
            identity: config.client_identity,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn identity(&self) -> ClientIdentity {
        self.identity
    }

    /// Take one token from `client`'s bucket.
    ///
    /// Always admits without touching the map when the limiter is disabled.
    pub fn admit(&self, client: &str) -> bool {
        if !self.enabled {
            return true;
        }

        let now = Instant::now();
        let mut buckets = self.lock();
        let bucket = buckets
            .entry(client.to_owned())
            .or_insert_with(|| ClientBucket::full(self.burst, now));

        bucket.try_acquire(self.burst, self.rate, now)
    }

    /// Evict buckets idle for longer than the staleness window.
    /// Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut buckets = self.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.last_seen) <= self.stale_after);
        before - buckets.len()
    }

    /// Number of clients currently holding a bucket.
    pub fn tracked_clients(&self) -> usize {
        self.lock().len()
    }

    /// Spawn the periodic sweeper. It exits once shutdown begins.
    pub fn spawn_sweeper(self: &Arc<Self>, mut shutdown: watch::Receiver<ShutdownState>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        // First sweep one interval from now, not from the task's first poll.
        let mut ticker = time::interval_at(Instant::now() + self.sweep_interval, self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tokio::spawn(async move {
            tracing::debug!(
                interval = ?registry.sweep_interval,
                stale_after = ?registry.stale_after,
                "Rate limiter sweeper starting"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = registry.sweep();
                        if evicted > 0 {
                            tracing::debug!(evicted, remaining = registry.tracked_clients(), "Evicted stale rate limiter buckets");
                        }
                    }
                    _ = shutdown.wait_for(|s| *s != ShutdownState::Running) => {
                        tracing::debug!("Rate limiter sweeper received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ClientBucket>> {
        // A panic mid-update leaves at worst one bucket with a stale refill
        // time; the map itself stays usable.
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Middleware rejecting clients that have exhausted their bucket.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiterRegistry>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !limiter.is_enabled() {
        return next.run(request).await;
    }

    let client = client_key(limiter.identity(), &request);
    if limiter.admit(&client) {
        next.run(request).await
    } else {
        tracing::warn!(client = %client, "Rate limit exceeded");
        metrics::counter!("http_rate_limited_total").increment(1);
        ApiError::RateLimitExceeded.into_response()
    }
}
