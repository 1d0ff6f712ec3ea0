use sqlx::postgres::PgConnectOptions;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};

pub const DEFAULT_PRICE_API_URL: &str = "https://min-api.cryptocompare.com/data/pricemulti";

#[derive(Debug, Clone, PartialEq)]
pub enum StorageBackend {
    Postgres(DatabaseConfig),
    Memory,
}

#[derive(Clone, PartialEq)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub max_connections: u32,
    pub auto_migrate: bool,
}

// keeps credentials out of logs
impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "<set>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("name", &self.name)
            .field("max_connections", &self.max_connections)
            .field("auto_migrate", &self.auto_migrate)
            .finish()
    }
}

impl DatabaseConfig {
    /// `DATABASE_URL` wins; otherwise host, user and database name are all required.
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        if let Some(url) = &self.url {
            return Ok(url.parse::<PgConnectOptions>()?);
        }

        let missing = |key: &str| AppError::Config(format!("{key} or DATABASE_URL must be set"));
        let host = self.host.as_deref().ok_or_else(|| missing("DB_HOST"))?;
        let user = self.user.as_deref().ok_or_else(|| missing("DB_USER"))?;
        let name = self.name.as_deref().ok_or_else(|| missing("DB_DATABASE"))?;

        let mut options = PgConnectOptions::new()
            .host(host)
            .port(self.port)
            .username(user)
            .database(name);
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        Ok(options)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriceApiConfig {
    pub url: String,
    pub timeout: Duration,
    pub retries: u32,
    pub backoff: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub storage: StorageBackend,
    pub query_timeout: Duration,
    pub seed_currencies: bool,
    pub price_api: PriceApiConfig,
    /// `None` disables the background refresh task.
    pub refresh_interval: Option<Duration>,
    pub bind_addr: SocketAddr,
    pub request_timeout: Duration,
    pub base_path: Option<String>,
}

impl Config {
    /// Reads the process environment, after loading `.env` if there is one.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let storage = match get("STORAGE_BACKEND").as_deref() {
            None | Some("postgres") => StorageBackend::Postgres(DatabaseConfig {
                url: get("DATABASE_URL"),
                host: get("DB_HOST"),
                port: parse_or(&get, "DB_PORT", 5432)?,
                user: get("DB_USER"),
                password: get("DB_PASSWORD"),
                name: get("DB_DATABASE"),
                max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", 5)?,
                auto_migrate: parse_or(&get, "DB_AUTO_MIGRATE", false)?,
            }),
            Some("memory") => StorageBackend::Memory,
            Some(other) => {
                return Err(AppError::Config(format!(
                    "STORAGE_BACKEND must be postgres or memory, got {other}"
                )));
            }
        };

        let refresh_secs: u64 = parse_or(&get, "REFRESH_INTERVAL_SECS", 600)?;

        let base_path = get("API_BASE_PATH")
            .map(|p| format!("/{}", p.trim().trim_matches('/')))
            .filter(|p| p != "/");

        Ok(Config {
            storage,
            query_timeout: Duration::from_secs(parse_or(&get, "DB_QUERY_TIMEOUT_SECS", 5)?),
            seed_currencies: parse_or(&get, "SEED_CURRENCIES", false)?,
            price_api: PriceApiConfig {
                url: get("PRICE_API_URL").unwrap_or_else(|| DEFAULT_PRICE_API_URL.to_string()),
                timeout: Duration::from_secs(parse_or(&get, "PRICE_API_TIMEOUT_SECS", 10)?),
                retries: parse_or(&get, "PRICE_API_RETRIES", 2)?,
                backoff: Duration::from_millis(parse_or(&get, "PRICE_API_BACKOFF_MS", 500)?),
            },
            refresh_interval: (refresh_secs > 0).then(|| Duration::from_secs(refresh_secs)),
            bind_addr: parse_or(&get, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            request_timeout: Duration::from_secs(parse_or(&get, "REQUEST_TIMEOUT_SECS", 15)?),
            base_path,
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{key}={raw} is invalid: {e}"))),
    }
}
