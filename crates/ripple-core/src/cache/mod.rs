//! TTL cache with a cache-aside helper.
//!
//! [`Cache`] wraps a [`CacheStore`] and never fails: a store fault is logged
//! and treated as a miss, so callers fall back to recomputing the value.
//!
//! # Concurrent misses
//!
//! [`Cache::get_or_set`] does not deduplicate work. When several callers
//! miss the same key at once, each runs its own producer and the last write
//! wins. Callers that need single-flight behaviour must coordinate outside
//! the cache.

mod glob;
mod memory;
#[cfg(feature = "redis")]
mod redis;
mod store;

pub use glob::GlobPattern;
pub use memory::MemoryCacheStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisCacheStore;
pub use store::{CacheError, CacheStore};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::periodic::PeriodicTask;

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL used by [`Cache::set_default`].
    pub default_ttl: Duration,
    /// Interval between expiry sweeps.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Fail-soft cache facade. Cheap to clone.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("store", &self.store.name())
            .field("config", &self.config)
            .finish()
    }
}

impl Cache {
    /// Create a cache over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        debug!(store = store.name(), "Creating cache with config: {:?}", config);
        Self { store, config }
    }

    /// Create an in-memory cache.
    #[must_use]
    pub fn in_memory(config: CacheConfig) -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()), config)
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get the backing store name.
    #[must_use]
    pub fn backend(&self) -> &'static str {
        self.store.name()
    }

    /// Get a live value, or `None` on miss or fault.
    pub async fn get(&self, key: &str) -> Option<Value> {
        match self.store.get(key).await {
            Ok(value) => {
                trace!(key = %key, hit = value.is_some(), "Cache get");
                value
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache get failed, treating as miss");
                None
            }
        }
    }

    /// Get a live value and deserialize it. A value of the wrong shape is a
    /// miss.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key = %key, error = %e, "Cached value has unexpected shape");
                None
            }
        }
    }

    /// Store a value, overwriting any existing entry.
    pub async fn set(&self, key: &str, value: Value, ttl: Duration) {
        if let Err(e) = self.store.set(key, value, ttl).await {
            warn!(key = %key, error = %e, "Cache set failed");
        }
    }

    /// Store a value with the default TTL.
    pub async fn set_default(&self, key: &str, value: Value) {
        self.set(key, value, self.config.default_ttl).await;
    }

    /// Serialize and store a value.
    pub async fn set_as<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_value(value) {
            Ok(v) => self.set(key, v, ttl).await,
            Err(e) => warn!(key = %key, error = %e, "Value not cacheable"),
        }
    }

    /// Check if a live value exists.
    pub async fn has(&self, key: &str) -> bool {
        self.store.has(key).await.unwrap_or_else(|e| {
            warn!(key = %key, error = %e, "Cache has failed, treating as miss");
            false
        })
    }

    /// Remove a key. Returns `true` if something was removed.
    pub async fn delete(&self, key: &str) -> bool {
        self.store.delete(key).await.unwrap_or_else(|e| {
            warn!(key = %key, error = %e, "Cache delete failed");
            false
        })
    }

    /// Remove every key matching a glob (see [`GlobPattern`]).
    ///
    /// Returns the number of keys removed.
    pub async fn delete_by_pattern(&self, pattern: &str) -> usize {
        let glob = GlobPattern::new(pattern);
        match self.store.delete_by_pattern(&glob).await {
            Ok(removed) => {
                debug!(pattern = %glob, removed, "Deleted keys by pattern");
                removed
            }
            Err(e) => {
                warn!(pattern = %glob, error = %e, "Cache pattern delete failed");
                0
            }
        }
    }

    /// Return the cached value for `key`, or run `producer` and cache its
    /// result for `ttl`.
    ///
    /// A producer error is returned as is and nothing is cached. Concurrent
    /// misses each run their own producer.
    ///
    /// # Errors
    ///
    /// Returns the producer's error.
    pub async fn get_or_set<F, Fut, E>(&self, key: &str, producer: F, ttl: Duration) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let value = producer().await?;
        self.set(key, value.clone(), ttl).await;
        Ok(value)
    }

    /// Number of stored entries, possibly including unswept expired ones.
    pub async fn len(&self) -> usize {
        self.store.len().await.unwrap_or_else(|e| {
            warn!(error = %e, "Cache len failed");
            0
        })
    }

    /// Check if the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove expired entries now. Returns the number removed.
    pub async fn purge_expired(&self) -> usize {
        match self.store.purge_expired().await {
            Ok(removed) => {
                if removed > 0 {
                    debug!(removed, "Swept expired cache entries");
                }
                removed
            }
            Err(e) => {
                warn!(error = %e, "Cache sweep failed");
                0
            }
        }
    }

    /// Spawn the periodic expiry sweep.
    #[must_use]
    pub fn spawn_sweeper(&self) -> PeriodicTask {
        let cache = self.clone();
        PeriodicTask::spawn("cache-sweep", self.config.sweep_interval, move || {
            let cache = cache.clone();
            async move {
                cache.purge_expired().await;
            }
        })
    }
}
