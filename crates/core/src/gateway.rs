//! RPC Gateway: the keeper's typed view of the protocol service.

use async_trait::async_trait;
use keeper_api::{
    AuctionDto, AuctionFamily, BuildRequest, CircuitClient, MarketClient, RegistryDto, TxStatusDto,
    VaultDto, WalletCoinDto,
};
use keeper_chain::{SignedTransaction, UnsignedTransaction};
use tracing::{debug, instrument, warn};

use crate::error::GatewayError;
use crate::intent::ActionIntent;
use crate::snapshot::{
    AuctionKind, AuctionView, Auctions, ProtocolSnapshot, RegistryView, Statutes, TreasuryCoin,
    TreasuryView, VaultView, WalletCoin, WalletView,
};

/// Live state of a single coin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinState {
    pub id: String,
    pub amount: u64,
    pub spent: bool,
}

/// Inclusion status of a broadcast transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStatus {
    Pending,
    Confirmed,
    Failed(String),
}

/// Typed request/response access to the protocol service.
///
/// Every call is bounded by a timeout; no call retries on its own.
#[async_trait]
pub trait RpcGateway: Send + Sync {
    async fn fetch_snapshot(&self, now: i64) -> Result<ProtocolSnapshot, GatewayError>;

    /// `None` when the service does not know the coin.
    async fn fetch_coin(&self, coin: &str) -> Result<Option<CoinState>, GatewayError>;

    async fn build_transaction(
        &self,
        intent: &ActionIntent,
        fee_per_cost: u64,
        public_key: &str,
    ) -> Result<UnsignedTransaction, GatewayError>;

    /// Returns the transaction id.
    async fn push_transaction(&self, tx: &SignedTransaction) -> Result<String, GatewayError>;

    async fn transaction_status(&self, tx_id: &str) -> Result<ChainStatus, GatewayError>;
}

/// [`RpcGateway`] over the Circuit HTTP API.
#[derive(Debug, Clone)]
pub struct CircuitGateway {
    client: CircuitClient,
    /// Public key whose coins make up the snapshot's wallet view.
    wallet_key: Option<String>,
    market: Option<MarketClient>,
}

impl CircuitGateway {
    pub fn new(client: CircuitClient) -> Self {
        Self {
            client,
            wallet_key: None,
            market: None,
        }
    }

    /// Include the keeper's own collateral coins in every snapshot.
    pub fn with_wallet(mut self, public_key: impl Into<String>) -> Self {
        self.wallet_key = Some(public_key.into());
        self
    }

    /// Measure collateral auctions against an external market price.
    pub fn with_market(mut self, market: MarketClient) -> Self {
        self.market = Some(market);
        self
    }

    /// Market quote, or `None` so the oracle is used instead.
    async fn market_price(&self) -> Option<f64> {
        let market = self.market.as_ref()?;
        match market.price().await {
            Ok(price) if price.is_finite() && price > 0.0 => Some(price),
            Ok(price) => {
                warn!(price, url = market.url(), "Ignoring unusable market price");
                None
            }
            Err(e) => {
                warn!(error = %e, url = market.url(), "Market price unavailable, using oracle");
                None
            }
        }
    }

    async fn wallet(&self) -> Result<WalletView, GatewayError> {
        let Some(key) = self.wallet_key.as_deref() else {
            return Ok(WalletView::default());
        };
        let coins = self.client.wallet_coins(key).await?;
        Ok(WalletView {
            coins: coins
                .into_iter()
                .filter(WalletCoinDto::is_native)
                .map(|c| WalletCoin {
                    id: c.name,
                    amount: c.amount,
                })
                .collect(),
        })
    }
}

/// Builder endpoint for each action.
pub fn build_path(intent: &ActionIntent) -> &'static str {
    match intent {
        ActionIntent::Liquidate { .. } => "/vaults/start_auction",
        ActionIntent::Recover { .. } => "/vaults/recover_bad_debt",
        ActionIntent::BidLiquidation(_) => "/vaults/bid_auction",
        ActionIntent::BidRecharge(_) => "/recharge/bid",
        ActionIntent::BidSurplus(_) => "/surplus/bid",
        ActionIntent::RebalanceTreasury { .. } => "/treasury/rebalance",
        ActionIntent::DistributeReward { .. } => "/registry/distribute_rewards",
        ActionIntent::TransferFee { .. } => "/vaults/transfer_sf",
        ActionIntent::SplitCoin { .. } => "/wallet/split_coin",
    }
}

fn build_request(intent: &ActionIntent, fee_per_cost: u64, public_key: &str) -> BuildRequest {
    let bid = intent.as_bid();
    BuildRequest {
        coin_name: intent.target().to_string(),
        amount: Some(intent.amount()),
        max_price: bid.map(|b| b.max_price),
        expires_at: bid.map(|b| b.expires_at),
        epoch: intent.epoch(),
        amounts: intent.pieces().map(<[u64]>::to_vec),
        fee_per_cost,
        synthetic_pk: public_key.to_string(),
    }
}

fn vault_view(dto: VaultDto) -> VaultView {
    VaultView {
        id: dto.name,
        collateral: dto.collateral,
        debt: dto.debt,
        owner_puzzle_hash: dto.owner_puzzle_hash,
        accrued_fee: dto.accrued_fees,
        in_liquidation: dto.in_liquidation,
    }
}

fn auction_view(kind: AuctionKind, dto: AuctionDto) -> AuctionView {
    AuctionView {
        id: dto.name,
        kind,
        start_price: dto.start_price,
        started_at: dto.started_at,
        remaining: dto.remaining,
        debt: dto.debt,
    }
}

fn registry_view(dto: RegistryDto) -> RegistryView {
    RegistryView {
        id: dto.name,
        epoch: dto.epoch,
        epoch_ends_at: dto.epoch_ends_at,
        pending_rewards: dto.pending_rewards,
    }
}

fn chain_status(dto: TxStatusDto) -> Result<ChainStatus, GatewayError> {
    match dto.status.to_lowercase().as_str() {
        "pending" | "in_mempool" => Ok(ChainStatus::Pending),
        "confirmed" => Ok(ChainStatus::Confirmed),
        "failed" => Ok(ChainStatus::Failed(
            dto.reason.unwrap_or_else(|| "no reason given".to_string()),
        )),
        other => Err(GatewayError::Protocol(format!(
            "unknown transaction status {other:?}"
        ))),
    }
}

#[async_trait]
impl RpcGateway for CircuitGateway {
    #[instrument(skip(self))]
    async fn fetch_snapshot(&self, now: i64) -> Result<ProtocolSnapshot, GatewayError> {
        let (vaults, collateral, recharge, surplus, treasury, oracle, statutes, registry) = futures::try_join!(
            self.client.vaults(),
            self.client.auctions(AuctionFamily::Collateral),
            self.client.auctions(AuctionFamily::Recharge),
            self.client.auctions(AuctionFamily::Surplus),
            self.client.treasury(),
            self.client.oracle(),
            self.client.statutes(),
            self.client.registry(),
        )?;

        if !oracle.price.is_finite() || oracle.price <= 0.0 {
            return Err(GatewayError::Protocol(format!(
                "oracle price {} is not usable",
                oracle.price
            )));
        }
        let (market_price, wallet) = futures::join!(self.market_price(), self.wallet());
        let wallet = wallet?;

        let snapshot = ProtocolSnapshot {
            vaults: vaults.into_iter().map(vault_view).collect(),
            auctions: Auctions {
                collateral: collateral
                    .into_iter()
                    .map(|a| auction_view(AuctionKind::Collateral, a))
                    .collect(),
                recharge: recharge
                    .into_iter()
                    .map(|a| auction_view(AuctionKind::Recharge, a))
                    .collect(),
                surplus: surplus
                    .into_iter()
                    .map(|a| auction_view(AuctionKind::Surplus, a))
                    .collect(),
            },
            treasury: TreasuryView {
                coins: treasury
                    .coins
                    .into_iter()
                    .map(|c| TreasuryCoin {
                        id: c.name,
                        amount: c.amount,
                    })
                    .collect(),
            },
            oracle_price: oracle.price,
            governance_price: oracle.governance_price,
            statutes: Statutes::new(statutes.implemented_statutes),
            registry: registry.map(registry_view),
            market_price,
            wallet,
            fetched_at: now,
        };

        debug!(
            vaults = snapshot.vaults.len(),
            auctions = snapshot.auctions.len(),
            treasury_coins = snapshot.treasury.coins.len(),
            oracle_price = snapshot.oracle_price,
            market_price = ?snapshot.market_price,
            wallet_coins = snapshot.wallet.coins.len(),
            "Snapshot fetched"
        );
        Ok(snapshot)
    }

    async fn fetch_coin(&self, coin: &str) -> Result<Option<CoinState>, GatewayError> {
        Ok(self.client.coin(coin).await?.map(|c| CoinState {
            id: c.name,
            amount: c.amount,
            spent: c.spent,
        }))
    }

    async fn build_transaction(
        &self,
        intent: &ActionIntent,
        fee_per_cost: u64,
        public_key: &str,
    ) -> Result<UnsignedTransaction, GatewayError> {
        let request = build_request(intent, fee_per_cost, public_key);
        let bundle = self.client.build(build_path(intent), &request).await?;
        Ok(UnsignedTransaction::from_bundle(bundle, fee_per_cost))
    }

    async fn push_transaction(&self, tx: &SignedTransaction) -> Result<String, GatewayError> {
        Ok(self.client.push_transaction(&tx.to_push_request()).await?.tx_id)
    }

    async fn transaction_status(&self, tx_id: &str) -> Result<ChainStatus, GatewayError> {
        chain_status(self.client.transaction_status(tx_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::Bid;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const NOW: i64 = 1_700_000_000;

    /// Read one HTTP request and return its path without the query string.
    async fn read_request_path(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return String::new();
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
        let content_length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < header_end + content_length {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        let target = head.split_whitespace().nth(1).unwrap_or("/").to_string();
        target.split('?').next().unwrap_or("/").to_string()
    }

    /// Serve canned `(status line, body)` responses by path until the test ends.
    async fn serve_routes(routes: Vec<(&'static str, &'static str, &'static str)>) -> String {
        let routes: Arc<HashMap<&'static str, (&'static str, &'static str)>> = Arc::new(
            routes
                .into_iter()
                .map(|(path, status, body)| (path, (status, body)))
                .collect(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let routes = routes.clone();
                tokio::spawn(async move {
                    let path = read_request_path(&mut socket).await;
                    let (status, body) = routes
                        .get(path.as_str())
                        .copied()
                        .unwrap_or(("404 Not Found", "{}"));
                    let response = format!(
                        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        format!("http://{addr}")
    }

    fn protocol_routes(oracle: &'static str) -> Vec<(&'static str, &'static str, &'static str)> {
        vec![
            (
                "/vaults",
                "200 OK",
                r#"[{"name":"v1","collateral":10,"principal":100,"owner_puzzle_hash":"ff","discounted_sf":3}]"#,
            ),
            (
                "/vaults/auctions",
                "200 OK",
                r#"[{"name":"c1","start_price":5.5,"started_at":1699999000,"remaining":10,"debt":50}]"#,
            ),
            ("/recharge_auctions", "200 OK", "[]"),
            (
                "/surplus_auctions",
                "200 OK",
                r#"[{"name":"s1","start_price":0.25,"started_at":1699999500,"remaining":5}]"#,
            ),
            (
                "/treasury",
                "200 OK",
                r#"{"coins":[{"name":"t1","amount":40},{"name":"t2","amount":60}]}"#,
            ),
            ("/oracle", "200 OK", oracle),
            (
                "/statutes",
                "200 OK",
                r#"{"implemented_statutes":{"VAULT_LIQUIDATION_RATIO_PCT":150,"VAULT_MINIMUM_DEBT":10}}"#,
            ),
            (
                "/registry",
                "200 OK",
                r#"{"name":"reg","epoch":3,"epoch_ends_at":1699990000,"pending_rewards":9}"#,
            ),
            (
                "/coins",
                "200 OK",
                r#"[{"name":"w1","amount":900,"symbol":"XCH"},{"name":"w2","amount":5,"symbol":"BYC"}]"#,
            ),
            ("/ticker", "200 OK", r#"{"data":[{"last":"6.25"}]}"#),
            ("/ticker_down", "503 Service Unavailable", "{}"),
        ]
    }

    #[tokio::test]
    async fn test_fetch_snapshot_maps_every_read() {
        let url = serve_routes(protocol_routes(r#"{"price":5.0,"governance_price":4.0}"#)).await;
        let gateway = CircuitGateway::new(CircuitClient::new(&url));

        let snapshot = gateway.fetch_snapshot(NOW).await.unwrap();
        assert_eq!(snapshot.fetched_at, NOW);
        assert_eq!(snapshot.oracle_price, 5.0);
        assert_eq!(snapshot.governance_price, Some(4.0));

        assert_eq!(snapshot.vaults.len(), 1);
        let vault = &snapshot.vaults[0];
        assert_eq!((vault.id.as_str(), vault.collateral, vault.debt), ("v1", 10, 100));
        assert_eq!(vault.accrued_fee, 3);

        let collateral = &snapshot.auctions.collateral;
        assert_eq!(collateral.len(), 1);
        assert_eq!(collateral[0].kind, AuctionKind::Collateral);
        assert_eq!(collateral[0].debt, Some(50));
        assert!(snapshot.auctions.recharge.is_empty());
        assert_eq!(snapshot.auctions.surplus[0].kind, AuctionKind::Surplus);

        assert_eq!(snapshot.treasury.balance(), 100);
        assert_eq!(snapshot.min_collateral_ratio().unwrap(), 1.5);
        assert_eq!(snapshot.statutes.amount("VAULT_MINIMUM_DEBT").unwrap(), 10);
        assert_eq!(snapshot.registry.as_ref().map(|r| r.epoch), Some(3));

        // Neither extra is configured.
        assert_eq!(snapshot.market_price, None);
        assert!(snapshot.wallet.coins.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_snapshot_rejects_zero_oracle_price() {
        let url = serve_routes(protocol_routes(r#"{"price":0}"#)).await;
        let gateway = CircuitGateway::new(CircuitClient::new(&url));

        let err = gateway.fetch_snapshot(NOW).await.unwrap_err();
        assert!(matches!(err, GatewayError::Protocol(_)), "{err}");
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_fetch_snapshot_with_wallet_and_market() {
        let url = serve_routes(protocol_routes(r#"{"price":5.0}"#)).await;
        let gateway = CircuitGateway::new(CircuitClient::new(&url))
            .with_wallet("pk")
            .with_market(MarketClient::new(format!("{url}/ticker"), 1.0));

        let snapshot = gateway.fetch_snapshot(NOW).await.unwrap();
        assert_eq!(snapshot.market_price, Some(6.25));
        assert_eq!(snapshot.reference_price(AuctionKind::Collateral), Some(6.25));
        // Only native coins are kept.
        assert_eq!(snapshot.wallet.coins.len(), 1);
        assert_eq!(snapshot.wallet.coins[0].id, "w1");
    }

    #[tokio::test]
    async fn test_market_outage_falls_back_to_oracle() {
        let url = serve_routes(protocol_routes(r#"{"price":5.0}"#)).await;
        let gateway = CircuitGateway::new(CircuitClient::new(&url))
            .with_market(MarketClient::new(format!("{url}/ticker_down"), 1.0));

        let snapshot = gateway.fetch_snapshot(NOW).await.unwrap();
        assert_eq!(snapshot.market_price, None);
        assert_eq!(snapshot.reference_price(AuctionKind::Collateral), Some(5.0));
    }

    #[test]
    fn test_build_request_for_split_carries_amounts() {
        let intent = ActionIntent::SplitCoin {
            target: "w1".into(),
            amount: 25,
            pieces: vec![10, 10, 5],
            reason: "r".into(),
        };
        let req = build_request(&intent, 2, "pk");
        assert_eq!(req.amounts, Some(vec![10, 10, 5]));
        assert_eq!(req.amount, Some(25));
        assert_eq!(build_path(&intent), "/wallet/split_coin");
    }

    #[test]
    fn test_build_request_carries_bid_terms() {
        let intent = ActionIntent::BidRecharge(Bid {
            target: "auction".into(),
            amount: 50,
            max_price: 80.0,
            expires_at: 1_600,
            reason: "r".into(),
        });
        let req = build_request(&intent, 5, "pk");
        assert_eq!(req.coin_name, "auction");
        assert_eq!(req.amount, Some(50));
        assert_eq!(req.max_price, Some(80.0));
        assert_eq!(req.expires_at, Some(1_600));
        assert_eq!(req.epoch, None);
        assert_eq!(build_path(&intent), "/recharge/bid");
    }

    #[test]
    fn test_build_request_for_reward_carries_epoch() {
        let intent = ActionIntent::DistributeReward {
            target: "registry".into(),
            amount: 9,
            epoch: 12,
            reason: "r".into(),
        };
        let req = build_request(&intent, 1, "pk");
        assert_eq!(req.epoch, Some(12));
        assert_eq!(req.max_price, None);
        assert_eq!(build_path(&intent), "/registry/distribute_rewards");
    }

    #[test]
    fn test_chain_status_mapping() {
        let status = |s: &str| TxStatusDto {
            status: s.into(),
            reason: None,
        };
        assert_eq!(chain_status(status("confirmed")).unwrap(), ChainStatus::Confirmed);
        assert_eq!(chain_status(status("pending")).unwrap(), ChainStatus::Pending);
        assert!(matches!(chain_status(status("failed")).unwrap(), ChainStatus::Failed(_)));
        assert!(chain_status(status("weird")).is_err());
    }
}
