//! In-process cache store.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

use super::glob::GlobPattern;
use crate::clock;
use super::store::{CacheError, CacheStore};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Cache store backed by a concurrent hash map.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCacheStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop `key` if it is still expired. Rechecks under the shard lock so a
    /// concurrent `set` is never lost.
    fn evict_if_expired(&self, key: &str, now: Instant) {
        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            trace!(key = %key, "Evicted expired entry on read");
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let now = Instant::now();
        match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }
        self.evict_if_expired(key, now);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry {
            value,
            expires_at: clock::deadline(Instant::now(), ttl),
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        match self.entries.get(key) {
            None => return Ok(false),
            Some(entry) if !entry.is_expired(now) => return Ok(true),
            Some(_) => {}
        }
        self.evict_if_expired(key, now);
        Ok(false)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn delete_by_pattern(&self, pattern: &GlobPattern) -> Result<usize, CacheError> {
        if let Some(key) = pattern.literal() {
            return Ok(usize::from(self.entries.remove(key).is_some()));
        }

        let mut removed = 0;
        self.entries.retain(|key, _| {
            let keep = !pattern.matches(key);
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }

    async fn len(&self) -> Result<usize, CacheError> {
        Ok(self.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_get_evicts_expired() {
        let store = MemoryCacheStore::new();
        store
            .set("k", json!(1), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!(1)));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.len().await.unwrap(), 1);
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_has_uses_same_expiry() {
        let store = MemoryCacheStore::new();
        store
            .set("k", json!("v"), Duration::from_millis(500))
            .await
            .unwrap();
        assert!(store.has("k").await.unwrap());

        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(!store.has("k").await.unwrap());
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = MemoryCacheStore::new();
        store.set("short", json!(1), Duration::from_secs(1)).await.unwrap();
        store.set("long", json!(2), Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len().await.unwrap(), 1);
        assert!(store.has("long").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_ttl_does_not_overflow() {
        let store = MemoryCacheStore::new();
        store.set("forever", json!(1), Duration::MAX).await.unwrap();

        tokio::time::advance(Duration::from_secs(86_400 * 365)).await;
        assert_eq!(store.get("forever").await.unwrap(), Some(json!(1)));
        assert_eq!(store.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_by_pattern() {
        let store = MemoryCacheStore::new();
        let ttl = Duration::from_secs(60);
        for key in ["user:1", "user:2", "user:2:profile", "venue:1"] {
            store.set(key, json!(key), ttl).await.unwrap();
        }

        let removed = store
            .delete_by_pattern(&GlobPattern::new("user:*"))
            .await
            .unwrap();
        assert_eq!(removed, 3);
        assert!(store.has("venue:1").await.unwrap());

        let removed = store
            .delete_by_pattern(&GlobPattern::new("venue:1"))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len().await.unwrap(), 0);
    }
}
