//! # Tandem Server
//!
//! Realtime collaboration server: clients editing the same document share
//! presence and cursor positions over a WebSocket.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! tandem
//!
//! # Run with custom config
//! tandem --config /path/to/tandem.toml
//!
//! # Run with environment variables
//! TANDEM_PORT=8080 TANDEM_HOST=0.0.0.0 TANDEM_JWT_SECRET=... tandem
//! ```

mod config;
mod error;
mod handlers;
mod jwt;
mod metrics;
mod policy;

use anyhow::{bail, Result};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = config_path_arg(std::env::args().skip(1))?;
    let config = config::Config::load_from(config_path.as_deref())?;

    tracing::info!("Starting Tandem server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}

/// Value of `--config <path>` (or `--config=<path>`), if given.
fn config_path_arg(mut args: impl Iterator<Item = String>) -> Result<Option<PathBuf>> {
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            return match args.next() {
                Some(path) => Ok(Some(PathBuf::from(path))),
                None => bail!("--config requires a path"),
            };
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Ok(Some(PathBuf::from(path)));
        }
        bail!("Unknown argument: {}", arg);
    }
    Ok(None)
}
