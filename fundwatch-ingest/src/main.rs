//! fundwatch ingest - scheduler and workers keeping FII data fresh.

use anyhow::{Context, Result};
use fundwatch_common::config::Config;
use fundwatch_common::logging::init_logging;
use fundwatch_ingest::IngestService;

#[tokio::main]
async fn main() -> Result<()> {
    // Start timing immediately for cold-start measurement
    let startup_start = std::time::Instant::now();

    let config = Config::from_env().context("Failed to load configuration")?;

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    config.validate().context("Invalid configuration")?;

    tracing::info!("fundwatch-ingest v{}", env!("CARGO_PKG_VERSION"));

    let service = IngestService::new(config);

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = startup_duration.as_millis() as u64,
        "Service initialized in {:?}",
        startup_duration
    );

    service.start().await
}
