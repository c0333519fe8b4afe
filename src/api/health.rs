//! Shared upstream health state for the /health and /rate-limit/status endpoints.
//! Updated by the upstream client, read by the API.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

/// Process-wide record of whether the marketplace has recently answered 429.
/// Purely observational: the rate limiter does not consult it.
#[derive(Default)]
pub struct UpstreamHealth {
    /// True from the first 429 until the next 200.
    rate_limited: AtomicBool,
    /// Millisecond epoch of the most recent 429 (0 = never).
    rate_limited_at_ms: AtomicU64,
    /// Lifetime count of 429 responses.
    rate_limit_hits: AtomicU64,
}

impl UpstreamHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_rate_limited(&self) {
        self.rate_limited_at_ms.store(now_ms(), Ordering::Relaxed);
        self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
        if !self.rate_limited.swap(true, Ordering::Relaxed) {
            warn!("[RATE LIMIT] upstream answered 429, rate limiting detected");
        }
    }

    pub fn mark_ok(&self) {
        if self.rate_limited.swap(false, Ordering::Relaxed) {
            info!("[RATE LIMIT] upstream recovered, rate limiting cleared");
        }
    }

    pub fn rate_limited(&self) -> bool {
        self.rate_limited.load(Ordering::Relaxed)
    }

    pub fn rate_limit_hits(&self) -> u64 {
        self.rate_limit_hits.load(Ordering::Relaxed)
    }

    /// Milliseconds since the last 429 while still flagged, otherwise 0.
    pub fn ms_since_rate_limit(&self) -> u64 {
        if !self.rate_limited() {
            return 0;
        }
        now_ms().saturating_sub(self.rate_limited_at_ms.load(Ordering::Relaxed))
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_set_by_429_and_cleared_by_200() {
        let health = UpstreamHealth::new();
        assert!(!health.rate_limited());
        assert_eq!(health.ms_since_rate_limit(), 0);

        health.mark_rate_limited();
        health.mark_rate_limited();
        assert!(health.rate_limited());
        assert_eq!(health.rate_limit_hits(), 2);

        health.mark_ok();
        assert!(!health.rate_limited());
        assert_eq!(health.ms_since_rate_limit(), 0);
        assert_eq!(health.rate_limit_hits(), 2);
    }
}
