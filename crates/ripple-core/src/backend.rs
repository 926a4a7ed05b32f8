//! Store selection for the cache and the rate limiter.
//!
//! The backend is picked once at startup. Nothing switches stores at
//! runtime.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::cache::{Cache, CacheConfig};
use crate::limiter::{RateLimitPolicy, RateLimiter};

/// Backend errors.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend was not compiled in.
    #[error("Backend {0:?} is not available in this build")]
    Unsupported(&'static str),

    /// The backend could not be reached.
    #[error("Backend connection failed: {0}")]
    Connect(String),
}

/// Where cache entries and rate windows live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backend {
    /// Process-local maps.
    #[default]
    Memory,
    /// A shared Redis server. Needs the `redis` feature.
    Redis {
        url: String,
        #[serde(default = "default_prefix")]
        prefix: String,
    },
}

fn default_prefix() -> String {
    "ripple:".to_string()
}

impl Backend {
    /// Backend name, for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Memory => "memory",
            Backend::Redis { .. } => "redis",
        }
    }
}

/// Build the cache for `backend`.
///
/// # Errors
///
/// Fails if the backend is unavailable or unreachable.
pub async fn build_cache(backend: &Backend, config: CacheConfig) -> Result<Cache, BackendError> {
    info!(backend = backend.name(), "Building cache");
    match backend {
        Backend::Memory => Ok(Cache::in_memory(config)),
        #[cfg(feature = "redis")]
        Backend::Redis { url, prefix } => {
            let store = crate::cache::RedisCacheStore::connect(url, prefix.clone())
                .await
                .map_err(|e| BackendError::Connect(e.to_string()))?;
            Ok(Cache::new(std::sync::Arc::new(store), config))
        }
        #[cfg(not(feature = "redis"))]
        Backend::Redis { .. } => Err(BackendError::Unsupported("redis")),
    }
}

/// Build the rate limiter for `backend`.
///
/// # Errors
///
/// Fails if the backend is unavailable or unreachable.
pub async fn build_limiter(backend: &Backend, policy: RateLimitPolicy) -> Result<RateLimiter, BackendError> {
    info!(backend = backend.name(), "Building rate limiter");
    match backend {
        Backend::Memory => Ok(RateLimiter::in_memory(policy)),
        #[cfg(feature = "redis")]
        Backend::Redis { url, prefix } => {
            let store = crate::limiter::RedisRateLimitStore::connect(url, prefix.clone())
                .await
                .map_err(|e| BackendError::Connect(e.to_string()))?;
            Ok(RateLimiter::new(std::sync::Arc::new(store), policy))
        }
        #[cfg(not(feature = "redis"))]
        Backend::Redis { .. } => Err(BackendError::Unsupported("redis")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize() {
        let backend: Backend = serde_json::from_str(r#"{"kind":"memory"}"#).unwrap();
        assert_eq!(backend, Backend::Memory);

        let backend: Backend = serde_json::from_str(r#"{"kind":"redis","url":"redis://localhost"}"#).unwrap();
        assert_eq!(
            backend,
            Backend::Redis {
                url: "redis://localhost".into(),
                prefix: "ripple:".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_build_memory() {
        let cache = build_cache(&Backend::Memory, CacheConfig::default()).await.unwrap();
        assert_eq!(cache.backend(), "memory");
        let limiter = build_limiter(&Backend::Memory, RateLimitPolicy::default()).await.unwrap();
        assert_eq!(limiter.backend(), "memory");
    }

    #[cfg(not(feature = "redis"))]
    #[tokio::test]
    async fn test_redis_without_feature() {
        let backend = Backend::Redis {
            url: "redis://localhost".into(),
            prefix: default_prefix(),
        };
        assert!(matches!(
            build_cache(&backend, CacheConfig::default()).await,
            Err(BackendError::Unsupported("redis"))
        ));
        assert!(matches!(
            build_limiter(&backend, RateLimitPolicy::default()).await,
            Err(BackendError::Unsupported("redis"))
        ));
    }
}
