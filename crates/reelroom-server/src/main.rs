//! # Reelroom Server
//!
//! Live room hub for a social video backend: chat and like events fanned
//! out to everyone watching the same video.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! reelroom
//!
//! # Run with a specific config file
//! REELROOM_CONFIG=/path/to/reelroom.toml reelroom
//!
//! # Override single settings through the environment
//! REELROOM_PORT=8080 REELROOM_HOST=0.0.0.0 REELROOM_ROOMS__IDLE_GRACE_SECS=60 reelroom
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reelroom=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Reelroom server on {}:{}", config.host, config.port);

    // Initialize metrics
    if config.metrics.enabled {
        metrics::init_metrics();
    }

    // Start the server
    handlers::run_server(config).await?;

    tracing::info!("Reelroom server stopped");
    Ok(())
}
