//! External market ticker used as a collateral reference price.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, instrument};

use crate::client::DEFAULT_REQUEST_TIMEOUT;
use crate::error::{ApiError, Result};

/// Ticker response in the OKX v5 shape: `{"data": [{"last": "25.31"}]}`.
#[derive(Debug, Clone, Deserialize)]
struct TickerResponse {
    data: Vec<Ticker>,
}

#[derive(Debug, Clone, Deserialize)]
struct Ticker {
    last: String,
}

/// Read-only client for a single market ticker URL.
#[derive(Debug, Clone)]
pub struct MarketClient {
    client: reqwest::Client,
    url: String,
    /// Multiplier applied to the quoted price.
    scale: f64,
    timeout: Duration,
}

impl MarketClient {
    pub fn new(url: impl Into<String>, scale: f64) -> Self {
        Self::with_timeout(url, scale, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, scale: f64, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            scale,
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Last traded price, scaled.
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn price(&self) -> Result<f64> {
        let endpoint = self.url.as_str();
        let body = tokio::time::timeout(self.timeout, async {
            let response = self.client.get(endpoint).send().await?;
            let status = response.status();
            let text = response.text().await?;
            Ok::<_, reqwest::Error>((status, text))
        })
        .await
        .map_err(|_| ApiError::Timeout {
            endpoint: endpoint.to_string(),
            secs: self.timeout.as_secs(),
        })?
        .map_err(|e| ApiError::from_reqwest(endpoint, e))?;

        let (status, text) = body;
        if !status.is_success() {
            return Err(ApiError::from_status(endpoint, status.as_u16(), text));
        }

        let decode_error = |message: String| ApiError::Decode {
            endpoint: endpoint.to_string(),
            message,
        };
        let ticker: TickerResponse =
            serde_json::from_str(&text).map_err(|e| decode_error(e.to_string()))?;
        let last = ticker
            .data
            .first()
            .ok_or_else(|| decode_error("empty ticker".to_string()))?;
        let price: f64 = last
            .last
            .trim()
            .parse()
            .map_err(|_| decode_error(format!("price {:?} is not a number", last.last)))?;

        let scaled = price * self.scale;
        debug!(price, scaled, "Market price");
        Ok(scaled)
    }
}
