use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use rates_gateway::{
    app,
    appstate::AppState,
    config::Config,
    endpoint::build_router,
    logging::init_tracing,
    prometheus::Metrics,
    rates::RateService,
    refresh::run_periodic,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    info!("Logging initialized with tracing");

    let config = Config::from_env().context("Invalid configuration")?;
    info!(?config, "Loaded configuration");

    let store = app::open_store(&config)
        .await
        .context("Failed to open rate store")?;

    let metrics = Metrics::new().context("Failed to register metrics")?;

    // Spawn rate refresh task
    match config.refresh_interval {
        Some(interval) => {
            let refresher = app::refresher(&config, store.clone())
                .context("Failed to build price API client")?
                .with_metrics(metrics.clone());
            tokio::spawn(run_periodic(refresher, interval));
            info!(?interval, "Spawned rate refresh task");
        }
        None => info!("Background refresh disabled"),
    }

    let state = AppState::new(RateService::new(store, config.query_timeout), metrics);
    let app = build_router(state, config.request_timeout, config.base_path.as_deref());

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Starting HTTP server on {}", config.bind_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
