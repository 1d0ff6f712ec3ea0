use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;

use crate::currency::CurrencyKind;
use crate::error::{AppError, Result};

/// fiat symbol -> rate
pub type FiatRates = BTreeMap<String, f64>;

/// crypto symbol -> fiat symbol -> rate
pub type AllRates = BTreeMap<String, FiatRates>;

/// One entry of a pair's time series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatePoint {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// A row the refresh job wants appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRate {
    pub cryptocurrency_id: i32,
    pub fiat_currency_id: i32,
    pub rate: f64,
    pub timestamp: DateTime<Utc>,
}

/// Storage behind the rate endpoints and the refresh job.
///
/// Symbols passed in are already normalized. "Latest" always means the row
/// with the greatest timestamp for a pair, ties going to the greatest row id.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// `Ok(false)` for an unregistered symbol; `Err` only for storage failures.
    async fn currency_exists(&self, kind: CurrencyKind, symbol: &str) -> Result<bool>;

    async fn latest_rate(&self, crypto: &str, fiat: &str) -> Result<Option<f64>>;

    async fn rates_for_crypto(&self, crypto: &str) -> Result<FiatRates>;

    async fn all_rates(&self) -> Result<AllRates>;

    /// Rows of the pair stamped at or after `since`, oldest first.
    async fn history(
        &self,
        crypto: &str,
        fiat: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RatePoint>>;

    async fn symbol_ids(&self, kind: CurrencyKind) -> Result<HashMap<String, i32>>;

    /// Appends the whole batch or nothing. Returns the number of rows written.
    async fn insert_rates(&self, rates: &[NewRate]) -> Result<u64>;

    /// Registers any symbols not yet present. Returns how many were added.
    async fn seed_currencies(&self, kind: CurrencyKind, symbols: &[&str]) -> Result<u64>;
}

/// Runs a storage call with an upper bound; `op` names it in the timeout error.
pub async fn bounded<T>(
    limit: Duration,
    op: &'static str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| AppError::Timeout(op))?
}
