//! Redis-backed rate limit store.
//!
//! Each check is a single Lua script so the read, reset and increment run
//! atomically on the server. Windows expire through native key expiry.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use super::store::{LimiterError, RateLimitStore};
use super::RateDecision;
use crate::clock;

/// Returns `{allowed, count, ttl_ms}`. A key with no time left (`PTTL` of 0)
/// starts a fresh window, since `SET PX 0` is an error.
const CHECK_AND_CONSUME: &str = r"
local max = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local count = tonumber(redis.call('GET', KEYS[1]) or '0')
local ttl = redis.call('PTTL', KEYS[1])
if ttl <= 0 then
  count = 0
  ttl = window
end
if count >= max then
  return {0, count, ttl}
end
count = count + 1
redis.call('SET', KEYS[1], count, 'PX', ttl)
return {1, count, ttl}
";

/// Rate limit store backed by Redis.
#[derive(Clone)]
pub struct RedisRateLimitStore {
    conn: MultiplexedConnection,
    prefix: String,
    script: Script,
}

impl RedisRateLimitStore {
    /// Connect to Redis. Every window key is stored under `prefix`.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be created or connected.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, LimiterError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        let prefix = prefix.into();
        info!(prefix = %prefix, "Connected Redis rate limit store");
        Ok(Self {
            conn,
            prefix,
            script: Script::new(CHECK_AND_CONSUME),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}ratelimit:{}", self.prefix, key)
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn check_and_consume(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
    ) -> Result<RateDecision, LimiterError> {
        let mut conn = self.conn.clone();
        let window_ms = clock::expiry_millis(window);
        let (allowed, count, ttl_ms): (i64, i64, i64) = self
            .script
            .key(self.key(key))
            .arg(max_requests)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await?;

        let ttl = Duration::from_millis(u64::try_from(ttl_ms).unwrap_or(0));
        let reset_at = clock::deadline(Instant::now(), ttl);
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        Ok(RateDecision {
            allowed: allowed == 1,
            remaining: max_requests.saturating_sub(count),
            reset_at,
            limit: max_requests,
        })
    }

    async fn reset(&self, key: &str) -> Result<(), LimiterError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.key(key)).await?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, LimiterError> {
        Ok(0)
    }

    async fn len(&self) -> Result<usize, LimiterError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", self.key(""));
        let mut cursor: u64 = 0;
        let mut total = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut conn)
                .await?;
            total += batch.len();
            if next == 0 {
                return Ok(total);
            }
            cursor = next;
        }
    }
}
