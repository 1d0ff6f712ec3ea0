use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::currency::CurrencyKind;
use crate::error::{AppError, Result};
use crate::store::{AllRates, FiatRates, RatePoint, RateStore, bounded};

/// Registered symbols of both kinds, alphabetical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrencyList {
    pub cryptos: Vec<String>,
    pub fiats: Vec<String>,
}

/// Rate reads with symbol validation in front of every query.
///
/// Symbols must already be normalized (the router does this). Unknown symbols
/// surface as [`AppError::UnknownCrypto`] / [`AppError::UnknownFiat`] before the
/// rate query runs, so an empty result always means [`AppError::NoRates`].
#[derive(Clone)]
pub struct RateService {
    store: Arc<dyn RateStore>,
    query_timeout: Duration,
}

impl Debug for RateService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RateService(timeout={:?})", self.query_timeout)
    }
}

impl RateService {
    pub fn new(store: Arc<dyn RateStore>, query_timeout: Duration) -> Self {
        Self {
            store,
            query_timeout,
        }
    }

    async fn ensure_registered(&self, kind: CurrencyKind, symbol: &str) -> Result<()> {
        let exists = bounded(
            self.query_timeout,
            "currency_exists",
            self.store.currency_exists(kind, symbol),
        )
        .await?;
        if exists {
            return Ok(());
        }
        debug!(%kind, symbol, "Unregistered symbol");
        Err(match kind {
            CurrencyKind::Crypto => AppError::UnknownCrypto(symbol.to_string()),
            CurrencyKind::Fiat => AppError::UnknownFiat(symbol.to_string()),
        })
    }

    #[instrument(skip(self))]
    pub async fn latest_rate(&self, crypto: &str, fiat: &str) -> Result<f64> {
        self.ensure_registered(CurrencyKind::Crypto, crypto).await?;
        self.ensure_registered(CurrencyKind::Fiat, fiat).await?;

        bounded(
            self.query_timeout,
            "latest_rate",
            self.store.latest_rate(crypto, fiat),
        )
        .await?
        .ok_or(AppError::NoRates)
    }

    #[instrument(skip(self))]
    pub async fn rates_for_crypto(&self, crypto: &str) -> Result<FiatRates> {
        self.ensure_registered(CurrencyKind::Crypto, crypto).await?;

        let rates = bounded(
            self.query_timeout,
            "rates_for_crypto",
            self.store.rates_for_crypto(crypto),
        )
        .await?;
        if rates.is_empty() {
            return Err(AppError::NoRates);
        }
        Ok(rates)
    }

    #[instrument(skip(self))]
    pub async fn all_rates(&self) -> Result<AllRates> {
        let rates = bounded(self.query_timeout, "all_rates", self.store.all_rates()).await?;
        if rates.is_empty() {
            return Err(AppError::NoRates);
        }
        Ok(rates)
    }

    /// The registry as served by `/currencies`. An empty registry is not an error.
    #[instrument(skip(self))]
    pub async fn currencies(&self) -> Result<CurrencyList> {
        Ok(CurrencyList {
            cryptos: self.symbols(CurrencyKind::Crypto).await?,
            fiats: self.symbols(CurrencyKind::Fiat).await?,
        })
    }

    async fn symbols(&self, kind: CurrencyKind) -> Result<Vec<String>> {
        let ids = bounded(self.query_timeout, "symbol_ids", self.store.symbol_ids(kind)).await?;
        let mut symbols: Vec<String> = ids.into_keys().collect();
        symbols.sort();
        Ok(symbols)
    }

    /// Trailing 24 hours of the pair, oldest first.
    pub async fn history(&self, crypto: &str, fiat: &str) -> Result<Vec<RatePoint>> {
        self.history_at(crypto, fiat, Utc::now()).await
    }

    #[instrument(skip(self))]
    pub async fn history_at(
        &self,
        crypto: &str,
        fiat: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<RatePoint>> {
        self.ensure_registered(CurrencyKind::Crypto, crypto).await?;
        self.ensure_registered(CurrencyKind::Fiat, fiat).await?;

        let since = now - ChronoDuration::hours(24);
        let points = bounded(
            self.query_timeout,
            "history",
            self.store.history(crypto, fiat, since),
        )
        .await?;
        if points.is_empty() {
            return Err(AppError::NoRates);
        }
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::store::NewRate;
    use async_trait::async_trait;
    use std::collections::HashMap;

    async fn service_with_scenario() -> (RateService, MemoryStore) {
        let store = MemoryStore::new();
        store
            .seed_currencies(CurrencyKind::Crypto, &["BTC", "ETH"])
            .await
            .unwrap();
        store
            .seed_currencies(CurrencyKind::Fiat, &["USD", "EUR"])
            .await
            .unwrap();
        let t0 = Utc::now() - ChronoDuration::minutes(5);
        store.push_rate(1, 1, 35000.0, t0).await;
        store.push_rate(1, 2, 30000.0, t0).await;
        store.push_rate(2, 1, 2000.0, t0).await;

        let service = RateService::new(Arc::new(store.clone()), Duration::from_secs(1));
        (service, store)
    }

    #[tokio::test]
    async fn all_rates_nests_crypto_then_fiat() {
        let (service, _) = service_with_scenario().await;
        let rates = service.all_rates().await.unwrap();

        assert_eq!(rates.len(), 2);
        assert_eq!(rates["BTC"]["USD"], 35000.0);
        assert_eq!(rates["BTC"]["EUR"], 30000.0);
        assert_eq!(rates["ETH"]["USD"], 2000.0);
        assert!(!rates["ETH"].contains_key("EUR"));
    }

    #[tokio::test]
    async fn unknown_symbols_are_not_found_on_every_read() {
        let (service, _) = service_with_scenario().await;

        assert!(matches!(
            service.latest_rate("XYZ", "USD").await,
            Err(AppError::UnknownCrypto(s)) if s == "XYZ"
        ));
        assert!(matches!(
            service.latest_rate("BTC", "XYZ").await,
            Err(AppError::UnknownFiat(s)) if s == "XYZ"
        ));
        assert!(matches!(
            service.rates_for_crypto("XYZ").await,
            Err(AppError::UnknownCrypto(_))
        ));
        assert!(matches!(
            service.history("BTC", "XYZ").await,
            Err(AppError::UnknownFiat(_))
        ));
    }

    #[tokio::test]
    async fn currencies_lists_both_registries_sorted() {
        let (service, store) = service_with_scenario().await;
        store
            .seed_currencies(CurrencyKind::Crypto, &["ADA"])
            .await
            .unwrap();

        assert_eq!(
            service.currencies().await.unwrap(),
            CurrencyList {
                cryptos: vec!["ADA".into(), "BTC".into(), "ETH".into()],
                fiats: vec!["EUR".into(), "USD".into()],
            }
        );

        let empty = RateService::new(Arc::new(MemoryStore::new()), Duration::from_secs(1));
        let list = empty.currencies().await.unwrap();
        assert!(list.cryptos.is_empty() && list.fiats.is_empty());
    }

    #[tokio::test]
    async fn registered_pair_without_rows_is_no_rates() {
        let (service, _) = service_with_scenario().await;
        assert!(matches!(
            service.latest_rate("ETH", "EUR").await,
            Err(AppError::NoRates)
        ));
    }

    #[tokio::test]
    async fn empty_catalog_is_no_rates() {
        let service = RateService::new(Arc::new(MemoryStore::new()), Duration::from_secs(1));
        assert!(matches!(service.all_rates().await, Err(AppError::NoRates)));
    }

    #[tokio::test]
    async fn latest_follows_newest_timestamp() {
        let (service, store) = service_with_scenario().await;
        let now = Utc::now();
        store
            .insert_rates(&[NewRate {
                cryptocurrency_id: 1,
                fiat_currency_id: 1,
                rate: 36000.0,
                timestamp: now,
            }])
            .await
            .unwrap();
        store
            .push_rate(1, 1, 1.0, now - ChronoDuration::days(2))
            .await;

        assert_eq!(service.latest_rate("BTC", "USD").await.unwrap(), 36000.0);
        let fiat_rates = service.rates_for_crypto("BTC").await.unwrap();
        assert_eq!(fiat_rates["USD"], 36000.0);
        assert_eq!(fiat_rates["EUR"], 30000.0);
    }

    #[tokio::test]
    async fn history_excludes_rows_older_than_a_day() {
        let (service, store) = service_with_scenario().await;
        let now = Utc::now();
        store
            .push_rate(2, 1, 1500.0, now - ChronoDuration::hours(30))
            .await;
        store
            .push_rate(2, 1, 2100.0, now - ChronoDuration::hours(1))
            .await;

        let points = service.history_at("ETH", "USD", now).await.unwrap();
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![2100.0, 2000.0]);
        assert!(points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    struct StalledStore;

    #[async_trait]
    impl RateStore for StalledStore {
        async fn currency_exists(&self, _: CurrencyKind, _: &str) -> Result<bool> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(true)
        }
        async fn latest_rate(&self, _: &str, _: &str) -> Result<Option<f64>> {
            unreachable!()
        }
        async fn rates_for_crypto(&self, _: &str) -> Result<FiatRates> {
            unreachable!()
        }
        async fn all_rates(&self) -> Result<AllRates> {
            unreachable!()
        }
        async fn history(&self, _: &str, _: &str, _: DateTime<Utc>) -> Result<Vec<RatePoint>> {
            unreachable!()
        }
        async fn symbol_ids(&self, _: CurrencyKind) -> Result<HashMap<String, i32>> {
            unreachable!()
        }
        async fn insert_rates(&self, _: &[NewRate]) -> Result<u64> {
            unreachable!()
        }
        async fn seed_currencies(&self, _: CurrencyKind, _: &[&str]) -> Result<u64> {
            unreachable!()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_storage_times_out() {
        let service = RateService::new(Arc::new(StalledStore), Duration::from_secs(2));
        assert!(matches!(
            service.latest_rate("BTC", "USD").await,
            Err(AppError::Timeout("currency_exists"))
        ));
    }
}
