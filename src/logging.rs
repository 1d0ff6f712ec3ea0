use tracing_subscriber::{filter::EnvFilter, fmt, util::SubscriberInitExt};

const DEFAULT_DIRECTIVES: &str = "info,axum=debug,tower_http=debug,sqlx=warn";

/// Installs the global fmt subscriber. `RUST_LOG` overrides the defaults.
pub fn init_tracing() {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .finish()
        .init();
}
