//! In-process rate limit store.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::store::{LimiterError, RateLimitStore};
use super::RateDecision;
use crate::clock;

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    reset_at: Instant,
}

impl RateWindow {
    fn fresh(now: Instant, window: Duration) -> Self {
        Self {
            count: 0,
            reset_at: clock::deadline(now, window),
        }
    }
}

/// Rate limit store backed by a concurrent hash map.
///
/// The entry API holds the shard lock for the whole check, which makes
/// `check_and_consume` atomic per key.
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    windows: DashMap<String, RateWindow>,
}

impl MemoryRateLimitStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn check_and_consume(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
    ) -> Result<RateDecision, LimiterError> {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| RateWindow::fresh(now, window));

        if now >= entry.reset_at {
            *entry = RateWindow::fresh(now, window);
        }

        if entry.count >= max_requests {
            return Ok(RateDecision::denied(max_requests, entry.reset_at));
        }

        entry.count += 1;
        Ok(RateDecision {
            allowed: true,
            remaining: max_requests - entry.count,
            reset_at: entry.reset_at,
            limit: max_requests,
        })
    }

    async fn reset(&self, key: &str) -> Result<(), LimiterError> {
        self.windows.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, LimiterError> {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, w| now < w.reset_at);
        Ok(before.saturating_sub(self.windows.len()))
    }

    async fn len(&self) -> Result<usize, LimiterError> {
        Ok(self.windows.len())
    }
}
