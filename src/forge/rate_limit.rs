//! Upstream API rate-limit tracking.
//!
//! Reads `X-RateLimit-Remaining` / `X-RateLimit-Reset` (or the standardised
//! `RateLimit-Remaining` / `RateLimit-Reset`) from access query responses so
//! operators can see when lockdown checks are about to start failing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use prometheus_client::metrics::gauge::Gauge;
use tracing::warn;

/// Remaining-call count below which every response logs a warning.
const LOW_WATER: u64 = 100;

/// Shared rate-limit state updated after every upstream response.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    remaining: Arc<AtomicU64>,
    reset_at: Arc<AtomicU64>,
    gauge: Gauge,
}

impl RateLimitState {
    /// Track rate limits, mirroring the remaining count into `gauge`.
    pub fn new(gauge: Gauge) -> Self {
        Self {
            remaining: Arc::new(AtomicU64::new(u64::MAX)),
            reset_at: Arc::new(AtomicU64::new(0)),
            gauge,
        }
    }

    /// Current remaining calls (`u64::MAX` until the first response).
    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::Relaxed)
    }

    /// Unix timestamp when the window resets.
    pub fn reset_at(&self) -> u64 {
        self.reset_at.load(Ordering::Relaxed)
    }

    pub fn update_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        let remaining = header_u64(headers, "X-RateLimit-Remaining", "RateLimit-Remaining");
        let reset = header_u64(headers, "X-RateLimit-Reset", "RateLimit-Reset");

        if let Some(r) = reset {
            self.reset_at.store(r, Ordering::Relaxed);
        }
        if let Some(r) = remaining {
            self.remaining.store(r, Ordering::Relaxed);
            self.gauge.set(i64::try_from(r).unwrap_or(i64::MAX));
            if r < LOW_WATER {
                warn!(
                    remaining = r,
                    reset_in_secs = self.reset_in_secs(),
                    "upstream rate limit nearly exhausted"
                );
            }
        }
    }

    /// Seconds until the window resets, or 0 if it already has.
    pub fn reset_in_secs(&self) -> u64 {
        let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
        self.reset_at().saturating_sub(now)
    }
}

fn header_u64(headers: &reqwest::header::HeaderMap, primary: &str, fallback: &str) -> Option<u64> {
    headers
        .get(primary)
        .or_else(|| headers.get(fallback))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}
