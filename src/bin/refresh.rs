//! One-shot refresh: fetch, append and exit. A failed run exits non-zero.

use anyhow::Context;
use tracing::{error, info};

use rates_gateway::{app, config::Config, logging::init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env().context("Invalid configuration")?;
    let store = app::open_store(&config)
        .await
        .context("Failed to open rate store")?;
    let refresher = app::refresher(&config, store).context("Failed to build price API client")?;

    match refresher.refresh().await {
        Ok(report) => {
            info!(
                fetched = report.fetched,
                inserted = report.inserted,
                skipped = report.skipped,
                "Refresh finished"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Refresh failed");
            Err(e.into())
        }
    }
}
