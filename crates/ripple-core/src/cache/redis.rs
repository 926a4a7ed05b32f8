//! Redis-backed cache store.
//!
//! Values are stored as JSON strings with a millisecond expiry, so Redis
//! enforces the TTL itself and there is nothing to sweep locally. Keys live
//! under `{prefix}cache:`, apart from the limiter's `{prefix}ratelimit:`
//! windows, so pattern deletes and `len` never touch limiter state.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde_json::Value;
use std::time::Duration;
use tracing::info;

use super::glob::GlobPattern;
use super::store::{CacheError, CacheStore};
use crate::clock;

/// Keys fetched per `SCAN` round trip.
const SCAN_COUNT: usize = 500;

/// Cache store backed by Redis.
#[derive(Clone)]
pub struct RedisCacheStore {
    conn: MultiplexedConnection,
    namespace: String,
}

impl RedisCacheStore {
    /// Connect to Redis. Every key is stored under `{prefix}cache:`.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be created or connected.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        let namespace = namespace(&prefix.into());
        info!(namespace = %namespace, "Connected Redis cache store");
        Ok(Self { conn, namespace })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }
}

fn namespace(prefix: &str) -> String {
    format!("{prefix}cache:")
}

/// `SCAN MATCH` pattern for `pattern` inside `namespace`.
fn scan_pattern(namespace: &str, pattern: &GlobPattern) -> String {
    let namespace = GlobPattern::new(&escape_glob(namespace)).to_redis_pattern();
    format!("{}{}", namespace, pattern.to_redis_pattern())
}

fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.key(key)).await?;
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(&value)?;
        let ttl_ms = clock::expiry_millis(ttl);
        conn.pset_ex::<_, _, ()>(self.key(key), raw, ttl_ms).await?;
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(self.key(key)).await?)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let removed: usize = conn.del(self.key(key)).await?;
        Ok(removed > 0)
    }

    async fn delete_by_pattern(&self, pattern: &GlobPattern) -> Result<usize, CacheError> {
        let keys = self.scan(&scan_pattern(&self.namespace, pattern)).await?;
        let mut conn = self.conn.clone();
        let mut removed = 0;
        for chunk in keys.chunks(SCAN_COUNT) {
            let n: usize = conn.del(chunk.to_vec()).await?;
            removed += n;
        }
        Ok(removed)
    }

    async fn purge_expired(&self) -> Result<usize, CacheError> {
        Ok(0)
    }

    async fn len(&self) -> Result<usize, CacheError> {
        let pattern = scan_pattern(&self.namespace, &GlobPattern::new("*"));
        Ok(self.scan(&pattern).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_keys_skip_limiter_windows() {
        let ns = namespace("ripple:");
        assert_eq!(ns, "ripple:cache:");

        let everything = GlobPattern::new(&scan_pattern(&ns, &GlobPattern::new("*")));
        assert!(everything.matches("ripple:cache:user:1"));
        assert!(!everything.matches("ripple:ratelimit:ip:10.0.0.1"));
        assert!(!everything.matches("ripple:user:1"));
    }

    #[test]
    fn test_scan_pattern_escapes_prefix() {
        let ns = namespace("app*:");
        assert_eq!(scan_pattern(&ns, &GlobPattern::new("user:*")), "app\\*:cache:user:*");
    }

    /// Needs a live server: `REDIS_URL=redis://127.0.0.1 cargo test --features redis -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn test_redis_round_trip() {
        let Ok(url) = std::env::var("REDIS_URL") else {
            return;
        };
        let prefix = format!("ripple-test-{}:", std::process::id());
        let store = RedisCacheStore::connect(&url, prefix.as_str()).await.unwrap();

        store
            .set("user:1", serde_json::json!({"name": "a"}), Duration::from_secs(60))
            .await
            .unwrap();
        store.set("user:2", serde_json::json!(2), Duration::MAX).await.unwrap();
        store.set("venue:1", serde_json::json!(3), Duration::from_millis(100)).await.unwrap();
        assert_eq!(store.get("user:1").await.unwrap(), Some(serde_json::json!({"name": "a"})));
        assert_eq!(store.len().await.unwrap(), 3);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!store.has("venue:1").await.unwrap());

        assert_eq!(store.delete_by_pattern(&GlobPattern::new("user:*")).await.unwrap(), 2);
        assert_eq!(store.len().await.unwrap(), 0);
    }
}
