use std::sync::Arc;

use tracing::info;

use crate::config::{Config, StorageBackend};
use crate::currency::{CurrencyKind, DEFAULT_CRYPTOS, DEFAULT_FIATS};
use crate::db::PostgresDb;
use crate::error::Result;
use crate::memory::MemoryStore;
use crate::price_api::PriceApiClient;
use crate::refresh::RateRefresher;
use crate::store::RateStore;

/// Opens the configured backend, applying the schema and the default
/// currency lists when asked to. The memory backend is always seeded.
pub async fn open_store(config: &Config) -> Result<Arc<dyn RateStore>> {
    let store: Arc<dyn RateStore> = match &config.storage {
        StorageBackend::Postgres(db) => {
            info!(?db, "Connecting to Postgres");
            let pg = PostgresDb::new(db.connect_options()?, db.max_connections);
            if db.auto_migrate {
                pg.migrate().await?;
                info!("Schema applied");
            }
            Arc::new(pg)
        }
        StorageBackend::Memory => {
            info!("Using in-memory rate store");
            Arc::new(MemoryStore::new())
        }
    };

    if config.seed_currencies || matches!(config.storage, StorageBackend::Memory) {
        seed_defaults(store.as_ref()).await?;
    }
    Ok(store)
}

async fn seed_defaults(store: &dyn RateStore) -> Result<()> {
    let cryptos = store
        .seed_currencies(CurrencyKind::Crypto, DEFAULT_CRYPTOS)
        .await?;
    let fiats = store.seed_currencies(CurrencyKind::Fiat, DEFAULT_FIATS).await?;
    info!(cryptos, fiats, "Seeded currency registry");
    Ok(())
}

/// Refresh job wired to the configured price API.
pub fn refresher(config: &Config, store: Arc<dyn RateStore>) -> Result<RateRefresher> {
    let prices = PriceApiClient::new(&config.price_api)?;
    Ok(RateRefresher::new(
        store,
        Arc::new(prices),
        config.query_timeout,
    ))
}
