//! Rate limit storage backends.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use super::RateDecision;

/// Rate limit store errors.
#[derive(Debug, Error)]
pub enum LimiterError {
    /// The backing store failed.
    #[error("Rate limit backend error: {0}")]
    Backend(String),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for LimiterError {
    fn from(e: redis::RedisError) -> Self {
        LimiterError::Backend(e.to_string())
    }
}

/// Per-key fixed-window counters.
///
/// `check_and_consume` must be atomic per key: two concurrent calls never
/// both observe the last free slot.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &'static str;

    /// Count one request against `key`, unless the window is already full.
    async fn check_and_consume(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
    ) -> Result<RateDecision, LimiterError>;

    /// Forget the window for `key`.
    async fn reset(&self, key: &str) -> Result<(), LimiterError>;

    /// Remove windows whose reset time has passed. Returns the number removed.
    async fn purge_expired(&self) -> Result<usize, LimiterError>;

    /// Number of tracked windows.
    async fn len(&self) -> Result<usize, LimiterError>;
}
