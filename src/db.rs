use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    PgPool, Postgres, QueryBuilder,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

use crate::currency::{CurrencyKind, normalize_symbol};
use crate::error::Result;
use crate::store::{AllRates, FiatRates, NewRate, RatePoint, RateStore};

const SCHEMA: &str = include_str!("../migrations/schema.sql");

// 4 binds per row, well below the 65535 bind limit
const INSERT_CHUNK: usize = 1000;

const LATEST_RATE_SQL: &str = r#"
    SELECT er.rate
    FROM exchange_rates er
    JOIN cryptocurrencies c ON c.cryptocurrency_id = er.cryptocurrency_id
    JOIN fiat_currencies f ON f.fiat_currency_id = er.fiat_currency_id
    WHERE c.symbol = $1 AND f.symbol = $2
    ORDER BY er."timestamp" DESC, er.exchange_rate_id DESC
    LIMIT 1
"#;

const RATES_FOR_CRYPTO_SQL: &str = r#"
    SELECT DISTINCT ON (er.fiat_currency_id) f.symbol, er.rate
    FROM exchange_rates er
    JOIN cryptocurrencies c ON c.cryptocurrency_id = er.cryptocurrency_id
    JOIN fiat_currencies f ON f.fiat_currency_id = er.fiat_currency_id
    WHERE c.symbol = $1
    ORDER BY er.fiat_currency_id, er."timestamp" DESC, er.exchange_rate_id DESC
"#;

const ALL_RATES_SQL: &str = r#"
    SELECT DISTINCT ON (er.cryptocurrency_id, er.fiat_currency_id) c.symbol, f.symbol, er.rate
    FROM exchange_rates er
    JOIN cryptocurrencies c ON c.cryptocurrency_id = er.cryptocurrency_id
    JOIN fiat_currencies f ON f.fiat_currency_id = er.fiat_currency_id
    ORDER BY er.cryptocurrency_id, er.fiat_currency_id, er."timestamp" DESC, er.exchange_rate_id DESC
"#;

const HISTORY_SQL: &str = r#"
    SELECT er.rate, er."timestamp"
    FROM exchange_rates er
    JOIN cryptocurrencies c ON c.cryptocurrency_id = er.cryptocurrency_id
    JOIN fiat_currencies f ON f.fiat_currency_id = er.fiat_currency_id
    WHERE c.symbol = $1 AND f.symbol = $2 AND er."timestamp" >= $3
    ORDER BY er."timestamp" ASC, er.exchange_rate_id ASC
"#;

#[derive(Debug, Clone)]
pub struct PostgresDb {
    pub pool: PgPool,
}

impl PostgresDb {
    /// Builds a lazily connecting pool; nothing touches the network until the first query.
    pub fn new(options: PgConnectOptions, max_connections: u32) -> Self {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect_lazy_with(options);

        PostgresDb { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        info!("Applied database schema");
        Ok(())
    }
}

#[async_trait]
impl RateStore for PostgresDb {
    async fn currency_exists(&self, kind: CurrencyKind, symbol: &str) -> Result<bool> {
        let query = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE symbol = $1)",
            kind.table()
        );
        let exists: bool = sqlx::query_scalar(&query)
            .bind(symbol)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn latest_rate(&self, crypto: &str, fiat: &str) -> Result<Option<f64>> {
        let rate: Option<f64> = sqlx::query_scalar(LATEST_RATE_SQL)
            .bind(crypto)
            .bind(fiat)
            .fetch_optional(&self.pool)
            .await?;
        Ok(rate)
    }

    async fn rates_for_crypto(&self, crypto: &str) -> Result<FiatRates> {
        let rows: Vec<(String, f64)> = sqlx::query_as(RATES_FOR_CRYPTO_SQL)
            .bind(crypto)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn all_rates(&self) -> Result<AllRates> {
        let rows: Vec<(String, String, f64)> =
            sqlx::query_as(ALL_RATES_SQL).fetch_all(&self.pool).await?;

        let mut rates = AllRates::new();
        for (crypto, fiat, rate) in rows {
            rates.entry(crypto).or_default().insert(fiat, rate);
        }
        Ok(rates)
    }

    async fn history(
        &self,
        crypto: &str,
        fiat: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RatePoint>> {
        let rows: Vec<(f64, DateTime<Utc>)> = sqlx::query_as(HISTORY_SQL)
            .bind(crypto)
            .bind(fiat)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(value, timestamp)| RatePoint { value, timestamp })
            .collect())
    }

    async fn symbol_ids(&self, kind: CurrencyKind) -> Result<HashMap<String, i32>> {
        let query = format!("SELECT symbol, {} FROM {}", kind.id_column(), kind.table());
        let rows: Vec<(String, i32)> = sqlx::query_as(&query).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().collect())
    }

    async fn insert_rates(&self, rates: &[NewRate]) -> Result<u64> {
        if rates.is_empty() {
            return Ok(0);
        }

        // dropping the transaction on an early return rolls it back
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for chunk in rates.chunks(INSERT_CHUNK) {
            let mut builder = QueryBuilder::<Postgres>::new(
                r#"INSERT INTO exchange_rates (cryptocurrency_id, fiat_currency_id, rate, "timestamp") "#,
            );
            builder.push_values(chunk, |mut row, rate| {
                row.push_bind(rate.cryptocurrency_id)
                    .push_bind(rate.fiat_currency_id)
                    .push_bind(rate.rate)
                    .push_bind(rate.timestamp);
            });
            inserted += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        debug!(rows = inserted, "Committed exchange rate batch");
        Ok(inserted)
    }

    async fn seed_currencies(&self, kind: CurrencyKind, symbols: &[&str]) -> Result<u64> {
        let query = format!(
            "INSERT INTO {} (symbol) VALUES ($1) ON CONFLICT (symbol) DO NOTHING",
            kind.table()
        );

        let mut tx = self.pool.begin().await?;
        let mut added = 0;
        for symbol in symbols {
            added += sqlx::query(&query)
                .bind(normalize_symbol(symbol))
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;

        Ok(added)
    }
}
