//! HTTP client for the protocol RPC service.

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::error::{ApiError, Result};
use crate::types::{
    AuctionDto, AuctionFamily, BuildRequest, CoinDto, FeeEstimateDto, OracleDto, PushRequest,
    PushResponse, RegistryDto, StatutesDto, TreasuryDto, TxStatusDto, UnsignedBundleDto, VaultDto,
    WalletCoinDto,
};

/// Default bound on a single RPC call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Circuit RPC client.
///
/// Performs no retries of its own; callers decide retry policy from
/// [`ApiError::is_transient`].
#[derive(Debug, Clone)]
pub struct CircuitClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl CircuitClient {
    /// Create a client with the default request timeout.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client with a custom per-call timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    // ---- reads ----

    pub async fn vaults(&self) -> Result<Vec<VaultDto>> {
        self.get("/vaults").await
    }

    pub async fn auctions(&self, family: AuctionFamily) -> Result<Vec<AuctionDto>> {
        self.get(family.list_path()).await
    }

    pub async fn treasury(&self) -> Result<TreasuryDto> {
        self.get("/treasury").await
    }

    pub async fn oracle(&self) -> Result<OracleDto> {
        self.get("/oracle").await
    }

    pub async fn statutes(&self) -> Result<StatutesDto> {
        self.get("/statutes").await
    }

    /// Rewards registry; `None` when the protocol has no registry deployed.
    pub async fn registry(&self) -> Result<Option<RegistryDto>> {
        self.get_optional("/registry").await
    }

    /// Current state of one coin; `None` when the service does not know it.
    pub async fn coin(&self, name: &str) -> Result<Option<CoinDto>> {
        self.get_optional(&format!("/coins/{name}")).await
    }

    /// Unspent coins owned by `public_key`.
    pub async fn wallet_coins(&self, public_key: &str) -> Result<Vec<WalletCoinDto>> {
        #[derive(Serialize)]
        struct CoinsRequest<'a> {
            synthetic_pks: [&'a str; 1],
        }
        self.post(
            "/coins",
            &CoinsRequest {
                synthetic_pks: [public_key],
            },
        )
        .await
    }

    /// Fee-per-cost estimate for a named target (`fast`, `medium`).
    pub async fn fee_per_cost(&self, target: &str) -> Result<FeeEstimateDto> {
        self.get(&format!("/fee_per_cost?target={target}")).await
    }

    // ---- writes ----

    /// Call a transaction builder endpoint (e.g. `/vaults/start_auction`).
    #[instrument(skip(self, request), fields(coin = %request.coin_name))]
    pub async fn build(&self, path: &str, request: &BuildRequest) -> Result<UnsignedBundleDto> {
        self.post(path, request).await
    }

    pub async fn push_transaction(&self, request: &PushRequest) -> Result<PushResponse> {
        self.post("/push_transaction", request).await
    }

    pub async fn transaction_status(&self, tx_id: &str) -> Result<TxStatusDto> {
        #[derive(Serialize)]
        struct StatusRequest<'a> {
            tx_id: &'a str,
        }
        self.post("/transactions/status", &StatusRequest { tx_id })
            .await
    }

    // ---- plumbing ----

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        match self.get_optional(path).await? {
            Some(value) => Ok(value),
            None => Err(ApiError::Protocol {
                endpoint: path.to_string(),
                status: 404,
                message: "not found".to_string(),
            }),
        }
    }

    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "GET");
        let response = self
            .timed(path, self.client.get(&url).send())
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        self.decode(path, response).await.map(Some)
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "POST");
        let response = self
            .timed(path, self.client.post(&url).json(body).send())
            .await?;
        self.decode(path, response).await
    }

    async fn decode<T: DeserializeOwned>(&self, path: &str, response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = self
                .timed(path, response.text())
                .await
                .unwrap_or_default();
            return Err(ApiError::from_status(path, status.as_u16(), body));
        }
        let bytes = self.timed(path, response.bytes()).await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode {
            endpoint: path.to_string(),
            message: e.to_string(),
        })
    }

    async fn timed<T>(
        &self,
        path: &str,
        fut: impl Future<Output = std::result::Result<T, reqwest::Error>>,
    ) -> Result<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| ApiError::Timeout {
                endpoint: path.to_string(),
                secs: self.timeout.as_secs(),
            })?
            .map_err(|e| ApiError::from_reqwest(path, e))
    }
}
