//! Chatflow - Main entry point.

use anyhow::{Context, Result};
use chatflow::start_server;
use chatflow_common::config::Config;
use chatflow_common::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let config = Config::load_with_env().context("Failed to load configuration")?;

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!("Chatflow v{}", env!("CARGO_PKG_VERSION"));

    start_server(&config).await
}
