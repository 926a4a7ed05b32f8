//! Fixed-window rate limiting.
//!
//! Each identity gets a counter that resets once its window has passed.
//! Requests beyond the maximum are rejected and not counted, so a client
//! hammering a full window does not push its own reset further out.
//!
//! Fixed windows are approximate: a client can spend its whole quota at the
//! end of one window and again at the start of the next, briefly reaching
//! twice the configured rate.
//!
//! [`RateLimiter`] fails open. If the store cannot be reached the request is
//! allowed and the fault is logged.

mod memory;
#[cfg(feature = "redis")]
mod redis;
mod store;

pub use memory::MemoryRateLimitStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisRateLimitStore;
pub use store::{LimiterError, RateLimitStore};

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::clock;
use crate::periodic::PeriodicTask;

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the current window.
    pub remaining: u32,
    /// When the current window ends.
    pub reset_at: Instant,
    pub limit: u32,
}

impl RateDecision {
    pub(crate) fn denied(limit: u32, reset_at: Instant) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_at,
            limit,
        }
    }

    /// Time until the current window ends.
    #[must_use]
    pub fn retry_after(&self) -> Duration {
        self.reset_at.saturating_duration_since(Instant::now())
    }

    /// Turn a rejection into an error.
    ///
    /// # Errors
    ///
    /// Returns [`TooManyRequests`] if the request was not allowed.
    pub fn into_result(self) -> Result<Self, TooManyRequests> {
        if self.allowed {
            Ok(self)
        } else {
            Err(TooManyRequests {
                limit: self.limit,
                reset_at: self.reset_at,
            })
        }
    }
}

/// A request was rejected by the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Too many requests: limit of {limit} reached")]
pub struct TooManyRequests {
    pub limit: u32,
    pub reset_at: Instant,
}

impl TooManyRequests {
    /// Time until the client may retry.
    #[must_use]
    pub fn retry_after(&self) -> Duration {
        self.reset_at.saturating_duration_since(Instant::now())
    }
}

/// Requests allowed per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::new(100, Duration::from_secs(60))
    }
}

/// Rate limit key for a request: the user if known, else the address.
#[must_use]
pub fn identity_key(user: Option<&str>, addr: IpAddr) -> String {
    match user {
        Some(user) => format!("user:{user}"),
        None => format!("ip:{addr}"),
    }
}

/// Fail-open rate limiter facade. Cheap to clone.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    policy: RateLimitPolicy,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("store", &self.store.name())
            .field("policy", &self.policy)
            .finish()
    }
}

impl RateLimiter {
    /// Create a limiter over `store` with a default `policy`.
    #[must_use]
    pub fn new(store: Arc<dyn RateLimitStore>, policy: RateLimitPolicy) -> Self {
        debug!(store = store.name(), "Creating rate limiter with policy: {:?}", policy);
        Self { store, policy }
    }

    /// Create an in-memory limiter.
    #[must_use]
    pub fn in_memory(policy: RateLimitPolicy) -> Self {
        Self::new(Arc::new(MemoryRateLimitStore::new()), policy)
    }

    /// Get the default policy.
    #[must_use]
    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Get the backing store name.
    #[must_use]
    pub fn backend(&self) -> &'static str {
        self.store.name()
    }

    /// Count one request against `key` using an explicit limit.
    pub async fn check_and_consume(&self, key: &str, max_requests: u32, window: Duration) -> RateDecision {
        match self.store.check_and_consume(key, max_requests, window).await {
            Ok(decision) => {
                if decision.allowed {
                    trace!(key = %key, remaining = decision.remaining, "Request allowed");
                } else {
                    debug!(key = %key, limit = decision.limit, "Request rate limited");
                }
                decision
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Rate limit check failed, allowing request");
                RateDecision {
                    allowed: true,
                    remaining: max_requests,
                    reset_at: clock::deadline(Instant::now(), window),
                    limit: max_requests,
                }
            }
        }
    }

    /// Count one request against `key` using the default policy.
    pub async fn check(&self, key: &str) -> RateDecision {
        self.check_and_consume(key, self.policy.max_requests, self.policy.window)
            .await
    }

    /// Forget the window for `key`.
    pub async fn reset(&self, key: &str) {
        if let Err(e) = self.store.reset(key).await {
            warn!(key = %key, error = %e, "Rate limit reset failed");
        }
    }

    /// Remove finished windows now. Returns the number removed.
    pub async fn purge_expired(&self) -> usize {
        match self.store.purge_expired().await {
            Ok(removed) => {
                if removed > 0 {
                    debug!(removed, "Swept expired rate windows");
                }
                removed
            }
            Err(e) => {
                warn!(error = %e, "Rate limit sweep failed");
                0
            }
        }
    }

    /// Number of tracked windows.
    pub async fn len(&self) -> usize {
        self.store.len().await.unwrap_or_else(|e| {
            warn!(error = %e, "Rate limit len failed");
            0
        })
    }

    /// Check if no windows are tracked.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Spawn the periodic window sweep.
    #[must_use]
    pub fn spawn_sweeper(&self, period: Duration) -> PeriodicTask {
        let limiter = self.clone();
        PeriodicTask::spawn("limiter-sweep", period, move || {
            let limiter = limiter.clone();
            async move {
                limiter.purge_expired().await;
            }
        })
    }
}
