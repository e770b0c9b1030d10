// External exchange-rate source

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::RateCacheConfig;

// Everything that can go wrong while fetching; the rate cache recovers from all of them
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider returned status {0}")]
    Status(u16),

    #[error("Malformed provider payload: {0}")]
    Malformed(String),

    #[error("Client error: {0}")]
    ClientError(String),
}

#[async_trait]
pub trait RateProvider: Send + Sync + 'static {
    // Rates keyed by currency code, relative to `base`
    async fn fetch_rates(&self, base: &str) -> Result<HashMap<String, f64>, FetchError>;
}

// Wire format: {"rates": {"GHS": 12.1, ...}, ...}; other fields are ignored
#[derive(Debug, Deserialize)]
struct ProviderResponse {
    rates: HashMap<String, f64>,
}

/// Unauthenticated GET against `{base_url}/{BASE}`.
pub struct HttpRateProvider {
    http: reqwest::Client,
    base_url: String,
}

impl HttpRateProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::ClientError(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    pub fn from_config(config: &RateCacheConfig) -> Result<Self, FetchError> {
        Self::new(config.provider_url.clone(), config.request_timeout())
    }

    fn url_for(&self, base: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), base)
    }
}

#[async_trait]
impl RateProvider for HttpRateProvider {
    async fn fetch_rates(&self, base: &str) -> Result<HashMap<String, f64>, FetchError> {
        let url = self.url_for(base);
        debug!(%url, "fetching exchange rates");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let parsed: ProviderResponse =
            serde_json::from_str(&body).map_err(|e| FetchError::Malformed(e.to_string()))?;

        Ok(parsed.rates)
    }
}

/// Fixed table, for offline runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticRateProvider {
    rates: HashMap<String, f64>,
}

impl StaticRateProvider {
    pub fn new<I, S>(rates: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            rates: rates.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

#[async_trait]
impl RateProvider for StaticRateProvider {
    async fn fetch_rates(&self, _base: &str) -> Result<HashMap<String, f64>, FetchError> {
        Ok(self.rates.clone())
    }
}
