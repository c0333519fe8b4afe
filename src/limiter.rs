//! Process-wide admission control for upstream marketplace requests.
//!
//! Two independent bounds apply to every request: a sliding window of dispatch
//! timestamps (at most `max_per_window` dispatches in any rolling window) and a
//! counting semaphore capping requests in flight. Callers hold the returned
//! [`RatePermit`] until their request completes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use crate::config::{IN_FLIGHT_FACTOR, RATE_POLL_INTERVAL_MS, RATE_WINDOW_MS};

pub struct RateLimiter {
    /// Dispatch instants still inside the window, oldest first.
    timestamps: Mutex<VecDeque<Instant>>,
    max_per_window: usize,
    window: Duration,
    poll_interval: Duration,
    in_flight: Arc<Semaphore>,
    max_in_flight: usize,
}

/// Held for the lifetime of one upstream request; releases the in-flight slot on drop.
pub struct RatePermit {
    _slot: Option<OwnedSemaphorePermit>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LimiterStatus {
    pub requests_in_window: usize,
    pub requests_per_second: usize,
    pub in_flight: usize,
    pub max_in_flight: usize,
}

impl RateLimiter {
    /// `requests_per_second` dispatches per rolling second, `2 ×` that in flight.
    pub fn new(requests_per_second: usize) -> Arc<Self> {
        Self::with_window(requests_per_second, Duration::from_millis(RATE_WINDOW_MS))
    }

    pub fn with_window(max_per_window: usize, window: Duration) -> Arc<Self> {
        let max_per_window = max_per_window.max(1);
        let max_in_flight = max_per_window * IN_FLIGHT_FACTOR;
        Arc::new(Self {
            timestamps: Mutex::new(VecDeque::with_capacity(max_per_window)),
            max_per_window,
            window,
            poll_interval: Duration::from_millis(RATE_POLL_INTERVAL_MS),
            in_flight: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
        })
    }

    /// Wait until one request may be dispatched. Never fails and never times out;
    /// cancellation is the caller's concern.
    pub async fn acquire(&self) -> RatePermit {
        // The semaphore is never closed, so `ok()` only guards an impossible case.
        let slot = Arc::clone(&self.in_flight).acquire_owned().await.ok();

        let mut waited = false;
        loop {
            if self.try_record(Instant::now()) {
                break;
            }
            if !waited {
                debug!(
                    max_per_window = self.max_per_window,
                    "[RATE LIMIT] window full, waiting for a slot"
                );
                waited = true;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        RatePermit { _slot: slot }
    }

    /// Evict expired entries and, if there is room, record a dispatch at `now`.
    fn try_record(&self, now: Instant) -> bool {
        let mut timestamps = self.timestamps.lock().unwrap_or_else(PoisonError::into_inner);
        while let Some(oldest) = timestamps.front() {
            if now.duration_since(*oldest) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
        if timestamps.len() < self.max_per_window {
            timestamps.push_back(now);
            true
        } else {
            false
        }
    }

    pub fn status(&self) -> LimiterStatus {
        let now = Instant::now();
        let requests_in_window = self
            .timestamps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|t| now.duration_since(**t) < self.window)
            .count();
        LimiterStatus {
            requests_in_window,
            requests_per_second: self.max_per_window,
            in_flight: self.max_in_flight - self.in_flight.available_permits(),
            max_in_flight: self.max_in_flight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn admits_up_to_limit_without_waiting() {
        let limiter = RateLimiter::with_window(3, Duration::from_millis(400));
        let start = std::time::Instant::now();
        let mut permits = Vec::new();
        for _ in 0..3 {
            permits.push(limiter.acquire().await);
        }
        assert!(start.elapsed() < Duration::from_millis(200));
        assert_eq!(limiter.status().requests_in_window, 3);
        assert_eq!(limiter.status().in_flight, 3);
    }

    #[tokio::test]
    async fn excess_requests_wait_for_window_to_roll() {
        let limiter = RateLimiter::with_window(2, Duration::from_millis(300));
        let start = std::time::Instant::now();
        for _ in 0..3 {
            let _permit = limiter.acquire().await;
        }
        // Third dispatch must wait for the first to leave the window.
        assert!(
            start.elapsed() >= Duration::from_millis(300),
            "elapsed {:?}",
            start.elapsed()
        );
    }

    #[tokio::test]
    async fn never_more_than_limit_inside_any_window() {
        let window = Duration::from_millis(200);
        let limiter = RateLimiter::with_window(4, window);
        let mut handles = Vec::new();
        for _ in 0..12 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire().await;
                Instant::now()
            }));
        }
        let mut stamps = Vec::new();
        for h in handles {
            stamps.push(h.await.unwrap());
        }
        stamps.sort();
        // Observed after the admission point, so allow for scheduling jitter.
        let strict = window - Duration::from_millis(40);
        for (i, first) in stamps.iter().enumerate() {
            let inside = stamps[i..]
                .iter()
                .filter(|t| t.duration_since(*first) < strict)
                .count();
            assert!(inside <= 4, "{inside} dispatches inside one window");
        }
    }

    #[tokio::test]
    async fn in_flight_is_capped_at_twice_the_rate() {
        // Short window so only the semaphore can hold the next caller back.
        let limiter = RateLimiter::with_window(2, Duration::from_millis(20));
        let mut held = Vec::new();
        for _ in 0..4 {
            held.push(limiter.acquire().await);
        }
        assert_eq!(limiter.status().in_flight, 4);

        let blocked = tokio::time::timeout(Duration::from_millis(200), limiter.acquire()).await;
        assert!(blocked.is_err(), "fifth request dispatched with four in flight");

        held.pop();
        let admitted = tokio::time::timeout(Duration::from_secs(1), limiter.acquire()).await;
        assert!(admitted.is_ok());
        assert_eq!(limiter.status().in_flight, 4);
    }

    #[tokio::test]
    async fn permit_drop_releases_in_flight_slot() {
        let limiter = RateLimiter::with_window(1, Duration::from_millis(50));
        let permit = limiter.acquire().await;
        assert_eq!(limiter.status().in_flight, 1);
        assert_eq!(limiter.status().max_in_flight, 2);
        drop(permit);
        assert_eq!(limiter.status().in_flight, 0);
    }
}
