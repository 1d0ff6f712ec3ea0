use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::currency::{CurrencyKind, normalize_symbol};
use crate::error::Result;
use crate::price_api::{PriceSnapshot, PriceSource};
use crate::prometheus::Metrics;
use crate::store::{NewRate, RateStore, bounded};

/// Outcome of one refresh run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Quotes returned by the price API.
    pub fetched: usize,
    pub inserted: u64,
    /// Quotes dropped for unmapped symbols or unusable prices.
    pub skipped: usize,
}

/// Appends a fresh snapshot of every registered pair.
#[derive(Clone)]
pub struct RateRefresher {
    store: Arc<dyn RateStore>,
    prices: Arc<dyn PriceSource>,
    query_timeout: Duration,
    metrics: Option<Metrics>,
}

impl RateRefresher {
    pub fn new(
        store: Arc<dyn RateStore>,
        prices: Arc<dyn PriceSource>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            store,
            prices,
            query_timeout,
            metrics: None,
        }
    }

    /// Counts every run in `rate_refresh_runs_total`.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn refresh(&self) -> Result<RefreshReport> {
        let result = self.refresh_at(Utc::now()).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_refresh(result.is_ok());
        }
        result
    }

    /// Runs one refresh stamping every new row with `now`.
    ///
    /// Nothing is written unless the price snapshot was fetched and decoded,
    /// and then the batch is written in a single transaction.
    #[instrument(skip(self))]
    pub async fn refresh_at(&self, now: DateTime<Utc>) -> Result<RefreshReport> {
        let crypto_ids = bounded(
            self.query_timeout,
            "symbol_ids",
            self.store.symbol_ids(CurrencyKind::Crypto),
        )
        .await?;
        let fiat_ids = bounded(
            self.query_timeout,
            "symbol_ids",
            self.store.symbol_ids(CurrencyKind::Fiat),
        )
        .await?;

        if crypto_ids.is_empty() || fiat_ids.is_empty() {
            info!(
                cryptos = crypto_ids.len(),
                fiats = fiat_ids.len(),
                "Currency registry is empty, nothing to refresh"
            );
            return Ok(RefreshReport::default());
        }

        let mut cryptos: Vec<String> = crypto_ids.keys().cloned().collect();
        let mut fiats: Vec<String> = fiat_ids.keys().cloned().collect();
        cryptos.sort();
        fiats.sort();

        let snapshot = self.prices.fetch_prices(&cryptos, &fiats).await?;
        let (batch, mut report) = build_batch(&snapshot, &crypto_ids, &fiat_ids, now);

        report.inserted = bounded(
            self.query_timeout,
            "insert_rates",
            self.store.insert_rates(&batch),
        )
        .await?;

        info!(
            fetched = report.fetched,
            inserted = report.inserted,
            skipped = report.skipped,
            "Exchange rates refreshed"
        );
        Ok(report)
    }
}

fn build_batch(
    snapshot: &PriceSnapshot,
    crypto_ids: &HashMap<String, i32>,
    fiat_ids: &HashMap<String, i32>,
    now: DateTime<Utc>,
) -> (Vec<NewRate>, RefreshReport) {
    let mut report = RefreshReport::default();
    let mut batch = Vec::new();

    for (crypto, quotes) in snapshot {
        report.fetched += quotes.len();
        let Some(&crypto_id) = crypto_ids.get(&normalize_symbol(crypto)) else {
            debug!(%crypto, "Skipping quotes for unmapped crypto");
            report.skipped += quotes.len();
            continue;
        };

        for (fiat, &rate) in quotes {
            let Some(&fiat_id) = fiat_ids.get(&normalize_symbol(fiat)) else {
                debug!(%crypto, %fiat, "Skipping quote for unmapped fiat");
                report.skipped += 1;
                continue;
            };
            if !rate.is_finite() || rate <= 0.0 {
                warn!(%crypto, %fiat, rate, "Skipping unusable quote");
                report.skipped += 1;
                continue;
            }
            batch.push(NewRate {
                cryptocurrency_id: crypto_id,
                fiat_currency_id: fiat_id,
                rate,
                timestamp: now,
            });
        }
    }

    batch.sort_by_key(|r| (r.cryptocurrency_id, r.fiat_currency_id));
    (batch, report)
}

/// Refreshes on a fixed cadence until the task is dropped. Failures are
/// logged and the previous snapshot stays current.
pub async fn run_periodic(refresher: RateRefresher, interval: Duration) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(e) = refresher.refresh().await {
            error!(error = %e, "Exchange rate refresh failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::memory::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedPrices {
        snapshot: PriceSnapshot,
        calls: AtomicUsize,
    }

    impl FixedPrices {
        fn new(json: &str) -> Arc<Self> {
            Arc::new(Self {
                snapshot: serde_json::from_str(json).unwrap(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PriceSource for FixedPrices {
        async fn fetch_prices(&self, _: &[String], _: &[String]) -> Result<PriceSnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.snapshot.clone())
        }
    }

    struct DownPrices;

    #[async_trait]
    impl PriceSource for DownPrices {
        async fn fetch_prices(&self, _: &[String], _: &[String]) -> Result<PriceSnapshot> {
            Err(AppError::Upstream("price API answered 502 Bad Gateway".into()))
        }
    }

    async fn registry() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .seed_currencies(CurrencyKind::Crypto, &["BTC", "ETH"])
            .await
            .unwrap();
        store
            .seed_currencies(CurrencyKind::Fiat, &["USD", "EUR"])
            .await
            .unwrap();
        store
    }

    fn refresher(store: &MemoryStore, prices: Arc<dyn PriceSource>) -> RateRefresher {
        RateRefresher::new(Arc::new(store.clone()), prices, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn inserts_mapped_quotes_and_skips_the_rest() {
        let store = registry().await;
        let prices = FixedPrices::new(
            r#"{"BTC":{"USD":35000,"EUR":30000,"JPY":5000000},
                "ETH":{"USD":2000},
                "DOGE":{"USD":0.1}}"#,
        );

        let report = refresher(&store, prices).refresh().await.unwrap();

        assert_eq!(
            report,
            RefreshReport {
                fetched: 5,
                inserted: 3,
                skipped: 2,
            }
        );
        assert_eq!(store.rate_count().await, 3);
        assert_eq!(store.latest_rate("BTC", "EUR").await.unwrap(), Some(30000.0));
        assert_eq!(store.latest_rate("ETH", "USD").await.unwrap(), Some(2000.0));
    }

    #[tokio::test]
    async fn unusable_prices_are_skipped() {
        let store = registry().await;
        let prices = FixedPrices::new(r#"{"BTC":{"USD":0,"EUR":-1.5},"ETH":{"USD":2000}}"#);

        let report = refresher(&store, prices).refresh().await.unwrap();

        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn upstream_failure_writes_nothing() {
        let store = registry().await;
        store.push_rate(1, 1, 34000.0, Utc::now()).await;

        let result = refresher(&store, Arc::new(DownPrices)).refresh().await;

        assert!(matches!(result, Err(AppError::Upstream(_))));
        assert_eq!(store.rate_count().await, 1);
        assert_eq!(store.latest_rate("BTC", "USD").await.unwrap(), Some(34000.0));
    }

    #[tokio::test]
    async fn interrupted_insert_keeps_previous_snapshot() {
        let store = registry().await;
        store.push_rate(1, 1, 34000.0, Utc::now()).await;
        let prices = FixedPrices::new(r#"{"BTC":{"USD":35000,"EUR":30000},"ETH":{"USD":2000}}"#);

        store.fail_next_insert_at(2).await;
        let result = refresher(&store, prices).refresh().await;

        assert!(matches!(result, Err(AppError::Database(_))));
        assert_eq!(store.rate_count().await, 1);
        assert_eq!(store.latest_rate("BTC", "USD").await.unwrap(), Some(34000.0));
        assert_eq!(store.latest_rate("BTC", "EUR").await.unwrap(), None);
    }

    #[tokio::test]
    async fn runs_are_counted_by_outcome() {
        let store = registry().await;
        let metrics = Metrics::new().unwrap();
        let prices = FixedPrices::new(r#"{"BTC":{"USD":35000}}"#);

        refresher(&store, prices)
            .with_metrics(metrics.clone())
            .refresh()
            .await
            .unwrap();
        let _ = refresher(&store, Arc::new(DownPrices))
            .with_metrics(metrics.clone())
            .refresh()
            .await;

        let runs = |outcome: &str| {
            metrics
                .refresh_runs_total
                .with_label_values(&[outcome])
                .get()
        };
        assert_eq!(runs("success"), 1);
        assert_eq!(runs("failure"), 1);
    }

    #[tokio::test]
    async fn empty_registry_skips_the_price_call() {
        let store = MemoryStore::new();
        let prices = FixedPrices::new(r#"{"BTC":{"USD":35000}}"#);

        let report = refresher(&store, prices.clone()).refresh().await.unwrap();

        assert_eq!(report, RefreshReport::default());
        assert_eq!(prices.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn batch_rows_share_one_timestamp() {
        let store = registry().await;
        let prices = FixedPrices::new(r#"{"BTC":{"USD":35000,"EUR":30000}}"#);
        let now = Utc::now();

        refresher(&store, prices).refresh_at(now).await.unwrap();

        let since = now - chrono::Duration::seconds(1);
        let usd = store.history("BTC", "USD", since).await.unwrap();
        let eur = store.history("BTC", "EUR", since).await.unwrap();
        assert_eq!(usd[0].timestamp, now);
        assert_eq!(eur[0].timestamp, now);
    }
}
