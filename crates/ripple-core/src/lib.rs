//! # ripple-core
//!
//! In-process ephemeral coordination for realtime services.
//!
//! This crate provides three independent building blocks:
//!
//! - **Broker** - Connection registry, room index, heartbeat and fan-out
//! - **Cache** - TTL key/value store with a cache-aside helper
//! - **Limiter** - Approximate fixed-window rate limiting per identity
//!
//! Cache and limiter sit behind a store trait with an in-memory
//! implementation and an optional Redis implementation (`redis` feature),
//! picked once by [`backend`]. Expired state is reclaimed by
//! [`periodic::PeriodicTask`] sweepers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Transport  │────▶│   Broker    │────▶│  Mailboxes  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   ▲
//!        ▼                   │ heartbeat
//! ┌─────────────┐     ┌─────────────┐
//! │   Limiter   │     │  Periodic   │────▶ cache / limiter sweeps
//! └─────────────┘     └─────────────┘
//! ```
//!
//! All clocks are `tokio::time::Instant`, so tests can pause and advance
//! time deterministically.

pub mod auth;
pub mod backend;
pub mod broker;
pub mod cache;
mod clock;
pub mod limiter;
pub mod periodic;

pub use auth::{AuthError, Authenticator, StaticTokenAuthenticator, UserId};
pub use backend::{build_cache, build_limiter, Backend, BackendError};
pub use broker::{
    mailbox, Broker, BrokerConfig, BrokerError, BrokerStats, ConnectionId, ConnectionState,
    Delivery, HeartbeatReport, Mailbox, Outbox,
};
pub use cache::{Cache, CacheConfig, CacheError, CacheStore, GlobPattern, MemoryCacheStore};
pub use limiter::{
    identity_key, LimiterError, MemoryRateLimitStore, RateDecision, RateLimitPolicy,
    RateLimitStore, RateLimiter, TooManyRequests,
};
pub use periodic::PeriodicTask;
pub use ripple_protocol::{ClientMessage, Event};
