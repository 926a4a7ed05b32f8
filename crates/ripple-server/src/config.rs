//! Server configuration.
//!
//! Configuration is layered, later sources winning:
//! - Built-in defaults
//! - A TOML file (`RIPPLE_CONFIG`, else the first of the search paths)
//! - Environment variables (`RIPPLE__PORT`, `RIPPLE__BROKER__ENABLED`, ...)

use anyhow::{Context, Result};
use ripple_core::{Backend, BrokerConfig, CacheConfig, RateLimitPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Config file locations, in lookup order.
const CONFIG_PATHS: [&str; 3] = [
    "ripple.toml",
    "/etc/ripple/ripple.toml",
    "~/.config/ripple/ripple.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub broker: BrokerSection,

    #[serde(default)]
    pub cache: CacheSection,

    #[serde(default)]
    pub limiter: LimiterSection,

    /// Store for cache entries and rate windows.
    #[serde(default)]
    pub backend: Backend,

    #[serde(default)]
    pub auth: AuthSection,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Broker limits and heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerSection {
    /// When false the endpoint still serves but the broker does nothing.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_max_rooms")]
    pub max_rooms: usize,

    #[serde(default = "default_max_rooms_per_connection")]
    pub max_rooms_per_connection: usize,

    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Unanswered probes before a connection is dropped.
    #[serde(default = "default_max_missed_probes")]
    pub max_missed_probes: u32,
}

/// Cache TTLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_ttl")]
    pub default_ttl_ms: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

/// Rate limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// WebSocket upgrades allowed per address per window.
    #[serde(default = "default_connect_max")]
    pub connect_max_requests: u32,

    #[serde(default = "default_connect_window")]
    pub connect_window_ms: u64,

    /// Inbound messages allowed per identity per window.
    #[serde(default = "default_message_max")]
    pub message_max_requests: u32,

    #[serde(default = "default_message_window")]
    pub message_window_ms: u64,

    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,
}

/// Static token table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthSection {
    /// Token to user id.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_max_connections() -> usize {
    100_000
}

fn default_max_rooms() -> usize {
    10_000
}

fn default_max_rooms_per_connection() -> usize {
    100
}

fn default_heartbeat_interval() -> u64 {
    30_000
}

fn default_max_missed_probes() -> u32 {
    1
}

fn default_ttl() -> u64 {
    300_000
}

fn default_sweep_interval() -> u64 {
    60_000
}

fn default_connect_max() -> u32 {
    30
}

fn default_connect_window() -> u64 {
    60_000
}

fn default_message_max() -> u32 {
    100
}

fn default_message_window() -> u64 {
    10_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            broker: BrokerSection::default(),
            cache: CacheSection::default(),
            limiter: LimiterSection::default(),
            backend: Backend::default(),
            auth: AuthSection::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_connections: default_max_connections(),
            max_rooms: default_max_rooms(),
            max_rooms_per_connection: default_max_rooms_per_connection(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            max_missed_probes: default_max_missed_probes(),
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            default_ttl_ms: default_ttl(),
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

impl Default for LimiterSection {
    fn default() -> Self {
        Self {
            enabled: true,
            connect_max_requests: default_connect_max(),
            connect_window_ms: default_connect_window(),
            message_max_requests: default_message_max(),
            message_window_ms: default_message_window(),
            sweep_interval_ms: default_sweep_interval(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl BrokerSection {
    #[must_use]
    pub fn to_broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            enabled: self.enabled,
            max_connections: self.max_connections,
            max_rooms: self.max_rooms,
            max_rooms_per_connection: self.max_rooms_per_connection,
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            max_missed_probes: self.max_missed_probes,
        }
    }
}

impl CacheSection {
    #[must_use]
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            default_ttl: Duration::from_millis(self.default_ttl_ms),
            sweep_interval: Duration::from_millis(self.sweep_interval_ms),
        }
    }
}

impl LimiterSection {
    /// Policy applied to WebSocket upgrades.
    #[must_use]
    pub fn connect_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(
            self.connect_max_requests,
            Duration::from_millis(self.connect_window_ms),
        )
    }

    /// Policy applied to inbound messages.
    #[must_use]
    pub fn message_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(
            self.message_max_requests,
            Duration::from_millis(self.message_window_ms),
        )
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Config {
    /// Load configuration from the first config file found, then apply
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a source exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let path = match std::env::var("RIPPLE_CONFIG") {
            Ok(path) => Some(PathBuf::from(shellexpand::tilde(&path).as_ref())),
            Err(_) => CONFIG_PATHS
                .iter()
                .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
                .find(|p| p.exists()),
        };
        Self::load_from(path.as_deref())
    }

    /// Load configuration from an optional file plus the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or an environment override is invalid.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!("Loading configuration from {}", path.display());
            builder = builder.add_source(
                ::config::File::from(path).format(::config::FileFormat::Toml),
            );
        }

        builder
            .add_source(
                ::config::Environment::with_prefix("RIPPLE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not an IP address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("Invalid host: {}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}
