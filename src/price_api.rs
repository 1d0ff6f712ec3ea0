use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use crate::config::PriceApiConfig;
use crate::error::{AppError, Result};

/// crypto symbol -> fiat symbol -> price
pub type PriceSnapshot = HashMap<String, HashMap<String, f64>>;

/// Source of a cross-product price snapshot.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_prices(&self, cryptos: &[String], fiats: &[String]) -> Result<PriceSnapshot>;
}

// pricemulti answers 200 with an error object when it rejects a request
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PriceMultiResponse {
    Prices(PriceSnapshot),
    Rejected {
        #[serde(rename = "Message")]
        message: String,
    },
}

/// Client for CryptoCompare's `pricemulti` endpoint.
#[derive(Debug, Clone)]
pub struct PriceApiClient {
    client: Client,
    base_url: String,
    retries: u32,
    backoff: Duration,
}

impl PriceApiClient {
    pub fn new(config: &PriceApiConfig) -> Result<Self> {
        let client = Client::builder()
            .use_rustls_tls()
            .pool_max_idle_per_host(10)
            .timeout(config.timeout)
            .gzip(true)
            .brotli(true)
            .user_agent(concat!("rates-gateway/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(PriceApiClient {
            client,
            base_url: config.url.clone(),
            retries: config.retries,
            backoff: config.backoff,
        })
    }

    /// GETs the snapshot, retrying transport errors and 5xx answers.
    async fn get_with_retry(&self, fsyms: &str, tsyms: &str) -> Result<String> {
        let mut attempt: u32 = 0;
        loop {
            let outcome = self
                .client
                .get(&self.base_url)
                .query(&[("fsyms", fsyms), ("tsyms", tsyms)])
                .send()
                .await;

            let retryable = match outcome {
                Ok(resp) if resp.status().is_success() => return Ok(resp.text().await?),
                Ok(resp) if resp.status().is_server_error() => {
                    AppError::Upstream(format!("price API answered {}", resp.status()))
                }
                Ok(resp) => {
                    return Err(AppError::Upstream(format!(
                        "price API answered {}",
                        resp.status()
                    )));
                }
                Err(e) => AppError::HttpRequest(e),
            };

            if attempt >= self.retries {
                return Err(retryable);
            }
            let delay = self.backoff * 2u32.saturating_pow(attempt);
            attempt += 1;
            warn!(attempt, error = %retryable, ?delay, "Price API call failed, retrying");
            sleep(delay).await;
        }
    }
}

#[async_trait]
impl PriceSource for PriceApiClient {
    #[instrument(name = "PriceApiFetch", skip(self), fields(cryptos = cryptos.len(), fiats = fiats.len()))]
    async fn fetch_prices(&self, cryptos: &[String], fiats: &[String]) -> Result<PriceSnapshot> {
        let fsyms = cryptos.join(",");
        let tsyms = fiats.join(",");
        debug!(%fsyms, %tsyms, "Requesting price snapshot from {}", self.base_url);

        let text = self.get_with_retry(&fsyms, &tsyms).await?;
        match serde_json::from_str::<PriceMultiResponse>(&text)? {
            PriceMultiResponse::Prices(prices) => Ok(prices),
            PriceMultiResponse::Rejected { message } => Err(AppError::Upstream(format!(
                "price API rejected the request: {message}"
            ))),
        }
    }
}
