use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::currency::{CurrencyKind, normalize_symbol};
use crate::error::{AppError, Result};
use crate::store::{AllRates, FiatRates, NewRate, RatePoint, RateStore};

#[derive(Debug, Clone)]
struct StoredRate {
    id: i64,
    cryptocurrency_id: i32,
    fiat_currency_id: i32,
    rate: f64,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    cryptos: Vec<(i32, String)>,
    fiats: Vec<(i32, String)>,
    rates: Vec<StoredRate>,
    next_rate_id: i64,
    // batch index at which the next insert_rates call aborts
    fail_insert_at: Option<usize>,
}

impl Tables {
    fn registry(&self, kind: CurrencyKind) -> &Vec<(i32, String)> {
        match kind {
            CurrencyKind::Crypto => &self.cryptos,
            CurrencyKind::Fiat => &self.fiats,
        }
    }

    fn registry_mut(&mut self, kind: CurrencyKind) -> &mut Vec<(i32, String)> {
        match kind {
            CurrencyKind::Crypto => &mut self.cryptos,
            CurrencyKind::Fiat => &mut self.fiats,
        }
    }

    fn id_of(&self, kind: CurrencyKind, symbol: &str) -> Option<i32> {
        self.registry(kind)
            .iter()
            .find(|(_, s)| s == symbol)
            .map(|(id, _)| *id)
    }

    fn symbol_of(&self, kind: CurrencyKind, id: i32) -> Option<&str> {
        self.registry(kind)
            .iter()
            .find(|(i, _)| *i == id)
            .map(|(_, s)| s.as_str())
    }

    /// Latest row per (crypto, fiat) pair, optionally restricted to one crypto.
    fn latest_per_pair(&self, crypto_id: Option<i32>) -> HashMap<(i32, i32), &StoredRate> {
        let mut latest: HashMap<(i32, i32), &StoredRate> = HashMap::new();
        for row in &self.rates {
            if crypto_id.is_some_and(|id| id != row.cryptocurrency_id) {
                continue;
            }
            let key = (row.cryptocurrency_id, row.fiat_currency_id);
            let newer = latest
                .get(&key)
                .is_none_or(|cur| (row.timestamp, row.id) > (cur.timestamp, cur.id));
            if newer {
                latest.insert(key, row);
            }
        }
        latest
    }
}

/// In-process [`RateStore`] with the same semantics as the Postgres backend.
///
/// Used by the test suite and for running the gateway without a database.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a rate row directly, bypassing batch semantics.
    pub async fn push_rate(
        &self,
        cryptocurrency_id: i32,
        fiat_currency_id: i32,
        rate: f64,
        timestamp: DateTime<Utc>,
    ) {
        let mut tables = self.inner.lock().await;
        tables.next_rate_id += 1;
        let id = tables.next_rate_id;
        tables.rates.push(StoredRate {
            id,
            cryptocurrency_id,
            fiat_currency_id,
            rate,
            timestamp,
        });
    }

    pub async fn rate_count(&self) -> usize {
        self.inner.lock().await.rates.len()
    }

    /// Makes the next `insert_rates` call fail when it reaches row `index`,
    /// as an interrupted connection would.
    pub async fn fail_next_insert_at(&self, index: usize) {
        self.inner.lock().await.fail_insert_at = Some(index);
    }
}

#[async_trait]
impl RateStore for MemoryStore {
    async fn currency_exists(&self, kind: CurrencyKind, symbol: &str) -> Result<bool> {
        Ok(self.inner.lock().await.id_of(kind, symbol).is_some())
    }

    async fn latest_rate(&self, crypto: &str, fiat: &str) -> Result<Option<f64>> {
        let tables = self.inner.lock().await;
        let (Some(crypto_id), Some(fiat_id)) = (
            tables.id_of(CurrencyKind::Crypto, crypto),
            tables.id_of(CurrencyKind::Fiat, fiat),
        ) else {
            return Ok(None);
        };

        Ok(tables
            .latest_per_pair(Some(crypto_id))
            .get(&(crypto_id, fiat_id))
            .map(|row| row.rate))
    }

    async fn rates_for_crypto(&self, crypto: &str) -> Result<FiatRates> {
        let tables = self.inner.lock().await;
        let Some(crypto_id) = tables.id_of(CurrencyKind::Crypto, crypto) else {
            return Ok(FiatRates::new());
        };

        let mut rates = FiatRates::new();
        for ((_, fiat_id), row) in tables.latest_per_pair(Some(crypto_id)) {
            if let Some(fiat) = tables.symbol_of(CurrencyKind::Fiat, fiat_id) {
                rates.insert(fiat.to_string(), row.rate);
            }
        }
        Ok(rates)
    }

    async fn all_rates(&self) -> Result<AllRates> {
        let tables = self.inner.lock().await;
        let mut rates = AllRates::new();
        for ((crypto_id, fiat_id), row) in tables.latest_per_pair(None) {
            let crypto = tables.symbol_of(CurrencyKind::Crypto, crypto_id);
            let fiat = tables.symbol_of(CurrencyKind::Fiat, fiat_id);
            if let (Some(crypto), Some(fiat)) = (crypto, fiat) {
                rates
                    .entry(crypto.to_string())
                    .or_default()
                    .insert(fiat.to_string(), row.rate);
            }
        }
        Ok(rates)
    }

    async fn history(
        &self,
        crypto: &str,
        fiat: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RatePoint>> {
        let tables = self.inner.lock().await;
        let (Some(crypto_id), Some(fiat_id)) = (
            tables.id_of(CurrencyKind::Crypto, crypto),
            tables.id_of(CurrencyKind::Fiat, fiat),
        ) else {
            return Ok(Vec::new());
        };

        let mut rows: Vec<&StoredRate> = tables
            .rates
            .iter()
            .filter(|r| r.cryptocurrency_id == crypto_id && r.fiat_currency_id == fiat_id)
            .filter(|r| r.timestamp >= since)
            .collect();
        rows.sort_by_key(|r| (r.timestamp, r.id));

        Ok(rows
            .into_iter()
            .map(|r| RatePoint {
                value: r.rate,
                timestamp: r.timestamp,
            })
            .collect())
    }

    async fn symbol_ids(&self, kind: CurrencyKind) -> Result<HashMap<String, i32>> {
        let tables = self.inner.lock().await;
        Ok(tables
            .registry(kind)
            .iter()
            .map(|(id, symbol)| (symbol.clone(), *id))
            .collect())
    }

    async fn insert_rates(&self, rates: &[NewRate]) -> Result<u64> {
        let mut tables = self.inner.lock().await;
        let fail_at = tables.fail_insert_at.take();

        // stage everything first so a failure leaves the table untouched
        let mut staged = Vec::with_capacity(rates.len());
        let mut next_id = tables.next_rate_id;
        for (index, rate) in rates.iter().enumerate() {
            if fail_at == Some(index) {
                debug!(index, "Aborting staged batch");
                return Err(AppError::Database(sqlx::Error::Protocol(format!(
                    "insert interrupted at row {index}"
                ))));
            }
            let crypto_known = tables
                .symbol_of(CurrencyKind::Crypto, rate.cryptocurrency_id)
                .is_some();
            let fiat_known = tables
                .symbol_of(CurrencyKind::Fiat, rate.fiat_currency_id)
                .is_some();
            if !crypto_known || !fiat_known || !(rate.rate > 0.0) {
                return Err(AppError::Database(sqlx::Error::Protocol(format!(
                    "row {index} violates exchange_rates constraints"
                ))));
            }
            next_id += 1;
            staged.push(StoredRate {
                id: next_id,
                cryptocurrency_id: rate.cryptocurrency_id,
                fiat_currency_id: rate.fiat_currency_id,
                rate: rate.rate,
                timestamp: rate.timestamp,
            });
        }

        let inserted = staged.len() as u64;
        tables.rates.extend(staged);
        tables.next_rate_id = next_id;
        Ok(inserted)
    }

    async fn seed_currencies(&self, kind: CurrencyKind, symbols: &[&str]) -> Result<u64> {
        let mut tables = self.inner.lock().await;
        let mut added = 0;
        for symbol in symbols {
            let symbol = normalize_symbol(symbol);
            if tables.id_of(kind, &symbol).is_some() {
                continue;
            }
            let registry = tables.registry_mut(kind);
            let id = registry.iter().map(|(id, _)| *id).max().unwrap_or(0) + 1;
            registry.push((id, symbol));
            added += 1;
        }
        Ok(added)
    }
}
