//! # Ripple Server
//!
//! WebSocket front end for the Ripple room broker, cache and rate limiter.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! ripple
//!
//! # Run with a specific config file
//! RIPPLE_CONFIG=/path/to/ripple.toml ripple
//!
//! # Override single settings
//! RIPPLE__PORT=9000 RIPPLE__BROKER__MAX_CONNECTIONS=5000 ripple
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ripple=debug,ripple_core=debug,ripple_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!(
        backend = config.backend.name(),
        broker_enabled = config.broker.enabled,
        "Starting Ripple server on {}:{}",
        config.host,
        config.port
    );

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
