//! Cache storage backends.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use super::glob::GlobPattern;

/// Cache store errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backing store failed.
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// A stored value could not be (de)serialized.
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for CacheError {
    fn from(e: redis::RedisError) -> Self {
        CacheError::Backend(e.to_string())
    }
}

/// A key/value store with per-entry expiry.
///
/// Implementations must never return a value whose expiry has passed.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Backend name, for logs.
    fn name(&self) -> &'static str;

    /// Get a live value.
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Store a value, overwriting any existing entry.
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;

    /// Check if a live value exists.
    async fn has(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove a key. Returns `true` if something was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove every key matching `pattern`. Returns the number removed.
    async fn delete_by_pattern(&self, pattern: &GlobPattern) -> Result<usize, CacheError>;

    /// Remove expired entries. Returns the number removed.
    async fn purge_expired(&self) -> Result<usize, CacheError>;

    /// Number of stored entries, possibly including unswept expired ones.
    async fn len(&self) -> Result<usize, CacheError>;
}
