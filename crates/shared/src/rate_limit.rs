//! Sliding-window admission gate for outbound API calls.
//!
//! Unlike a token bucket, the window keeps the timestamp of every admitted
//! call, so a burst of `limit` calls is followed by a pause until the oldest
//! call leaves the trailing `period`.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Default window length.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(60);

/// Bounds the number of calls admitted within a trailing time window.
#[derive(Debug)]
pub struct SlidingWindowRateLimiter {
    limit: usize,
    period: Duration,
    /// Admission timestamps, oldest first.
    calls: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowRateLimiter {
    /// Create a limiter admitting `limit` calls per `period`.
    ///
    /// A limit of zero would never admit anything and is treated as one.
    pub fn new(limit: u32, period: Duration) -> Self {
        let limit = limit.max(1) as usize;
        Self {
            limit,
            period,
            calls: Mutex::new(VecDeque::with_capacity(limit)),
        }
    }

    /// Create a limiter admitting `limit` calls per minute.
    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, DEFAULT_PERIOD)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait until one more call fits in the window, then record it.
    ///
    /// The lock is held while waiting, so concurrent callers are admitted
    /// one at a time in the order they reached the lock.
    pub async fn acquire(&self) {
        let mut calls = self.calls.lock().await;
        loop {
            let now = Instant::now();
            while let Some(&oldest) = calls.front() {
                if now.duration_since(oldest) >= self.period {
                    calls.pop_front();
                } else {
                    break;
                }
            }

            if calls.len() < self.limit {
                calls.push_back(now);
                return;
            }

            let Some(&oldest) = calls.front() else {
                continue;
            };
            let wait = self.period.saturating_sub(now.duration_since(oldest));
            debug!(
                wait_ms = wait.as_millis() as u64,
                limit = self.limit,
                "Rate limit window full, waiting"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Number of calls currently inside the window.
    pub async fn calls_in_window(&self) -> usize {
        let calls = self.calls.lock().await;
        let now = Instant::now();
        calls
            .iter()
            .filter(|t| now.duration_since(**t) < self.period)
            .count()
    }
}
