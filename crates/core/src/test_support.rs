//! Fakes and fixtures shared by unit tests.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use keeper_chain::{KeyMaterial, SignedTransaction, Signer, SigningError, UnsignedTransaction};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::watch;

use crate::error::GatewayError;
use crate::gateway::{ChainStatus, CoinState, RpcGateway};
use crate::intent::ActionIntent;
use crate::progress::ProgressEvent;
use crate::snapshot::{
    AuctionKind, AuctionView, Auctions, ProtocolSnapshot, Statutes, TreasuryView, VaultView,
    WalletView,
};

pub const NOW: i64 = 1_700_000_000;

pub fn key() -> KeyMaterial {
    KeyMaterial::from_hex(&"11".repeat(32)).unwrap()
}

/// Statutes used across tests:
/// - liquidation below 150%, debt floor 10
/// - collateral auctions start at 110% of the oracle and floor at 80% of start
/// - recharge and surplus auctions floor at 50% of start
/// - every family drops 2% of the start price per 120s step, 1h lifetime
pub fn standard_statutes() -> Statutes {
    let mut values = BTreeMap::from([
        ("VAULT_LIQUIDATION_RATIO_PCT".to_string(), 150),
        ("VAULT_MINIMUM_DEBT".to_string(), 10),
        ("VAULT_AUCTION_STARTING_PRICE_FACTOR_BPS".to_string(), 11_000),
        ("VAULT_AUCTION_MINIMUM_BID_BPS".to_string(), 1_000),
        ("VAULT_AUCTION_MINIMUM_BID_FLAT".to_string(), 5),
    ]);
    for (family, floor) in [("VAULT", 8_000), ("RECHARGE", 5_000), ("SURPLUS", 5_000)] {
        values.insert(format!("{family}_AUCTION_TTL"), 3_600);
        values.insert(format!("{family}_AUCTION_PRICE_TTL"), 120);
        values.insert(format!("{family}_AUCTION_PRICE_DECREASE_BPS"), 200);
        values.insert(format!("{family}_AUCTION_MINIMUM_PRICE_FACTOR_BPS"), floor);
    }
    Statutes::new(values)
}

pub fn vault(id: &str, collateral: u64, debt: u64) -> VaultView {
    VaultView {
        id: id.to_string(),
        collateral,
        debt,
        owner_puzzle_hash: "00".repeat(32),
        accrued_fee: 0,
        in_liquidation: false,
    }
}

pub fn auction(id: &str, kind: AuctionKind, start_price: f64, started_at: i64, remaining: u64) -> AuctionView {
    AuctionView {
        id: id.to_string(),
        kind,
        start_price,
        started_at,
        remaining,
        debt: None,
    }
}

pub fn snapshot_with(vaults: Vec<VaultView>, oracle_price: f64) -> ProtocolSnapshot {
    ProtocolSnapshot {
        vaults,
        auctions: Auctions::default(),
        treasury: TreasuryView::default(),
        oracle_price,
        governance_price: None,
        statutes: standard_statutes(),
        registry: None,
        market_price: None,
        wallet: WalletView::default(),
        fetched_at: NOW,
    }
}

/// In-memory progress sink.
#[derive(Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    /// Parse JSON-mode output.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.contents()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Gateway answering from scripted queues, with permissive defaults:
/// every coin exists and is unspent, builds succeed, pushes succeed,
/// transactions confirm.
#[derive(Default)]
pub struct ScriptedGateway {
    snapshots: Mutex<VecDeque<Result<ProtocolSnapshot, GatewayError>>>,
    fallback_snapshot: Mutex<Option<ProtocolSnapshot>>,
    spent: Mutex<HashSet<String>>,
    missing: Mutex<HashSet<String>>,
    builds: Mutex<VecDeque<Result<(), GatewayError>>>,
    built: Mutex<Vec<(ActionIntent, u64)>>,
    broadcasts: Mutex<VecDeque<Result<String, GatewayError>>>,
    statuses: Mutex<VecDeque<Result<ChainStatus, GatewayError>>>,
    default_status: Mutex<Option<ChainStatus>>,
    shutdown_on_build: Mutex<Option<watch::Sender<bool>>>,
    snapshot_calls: AtomicUsize,
    push_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn push_snapshot(&self, result: Result<ProtocolSnapshot, GatewayError>) {
        self.snapshots.lock().push_back(result);
    }

    /// Snapshot returned once the queue is empty.
    pub fn set_fallback_snapshot(&self, snapshot: ProtocolSnapshot) {
        *self.fallback_snapshot.lock() = Some(snapshot);
    }

    pub fn mark_spent(&self, coin: &str) {
        self.spent.lock().insert(coin.to_string());
    }

    pub fn mark_missing(&self, coin: &str) {
        self.missing.lock().insert(coin.to_string());
    }

    pub fn push_build(&self, result: Result<(), GatewayError>) {
        self.builds.lock().push_back(result);
    }

    pub fn push_broadcast(&self, result: Result<String, GatewayError>) {
        self.broadcasts.lock().push_back(result);
    }

    pub fn push_status(&self, result: Result<ChainStatus, GatewayError>) {
        self.statuses.lock().push_back(result);
    }

    pub fn set_default_status(&self, status: ChainStatus) {
        *self.default_status.lock() = Some(status);
    }

    /// Request shutdown through `tx` whenever a transaction is built.
    pub fn shutdown_on_build(&self, tx: watch::Sender<bool>) {
        *self.shutdown_on_build.lock() = Some(tx);
    }

    pub fn built(&self) -> Vec<(ActionIntent, u64)> {
        self.built.lock().clone()
    }

    pub fn snapshot_calls(&self) -> usize {
        self.snapshot_calls.load(Ordering::SeqCst)
    }

    pub fn push_calls(&self) -> usize {
        self.push_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RpcGateway for ScriptedGateway {
    async fn fetch_snapshot(&self, now: i64) -> Result<ProtocolSnapshot, GatewayError> {
        self.snapshot_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(result) = self.snapshots.lock().pop_front() {
            return result;
        }
        match self.fallback_snapshot.lock().clone() {
            Some(mut snapshot) => {
                snapshot.fetched_at = now;
                Ok(snapshot)
            }
            None => Err(GatewayError::Network("no scripted snapshot".into())),
        }
    }

    async fn fetch_coin(&self, coin: &str) -> Result<Option<CoinState>, GatewayError> {
        if self.missing.lock().contains(coin) {
            return Ok(None);
        }
        Ok(Some(CoinState {
            id: coin.to_string(),
            amount: 1,
            spent: self.spent.lock().contains(coin),
        }))
    }

    async fn build_transaction(
        &self,
        intent: &ActionIntent,
        fee_per_cost: u64,
        _public_key: &str,
    ) -> Result<UnsignedTransaction, GatewayError> {
        if let Some(Err(e)) = self.builds.lock().pop_front() {
            return Err(e);
        }
        self.built.lock().push((intent.clone(), fee_per_cost));
        if let Some(tx) = self.shutdown_on_build.lock().as_ref() {
            let _ = tx.send(true);
        }
        Ok(UnsignedTransaction {
            bundle: json!({ "coin": intent.target(), "kind": intent.kind().as_str() }),
            cost: 1_000,
            fee_per_cost,
        })
    }

    async fn push_transaction(&self, _tx: &SignedTransaction) -> Result<String, GatewayError> {
        let n = self.push_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.broadcasts
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("tx-{n}")))
    }

    async fn transaction_status(&self, _tx_id: &str) -> Result<ChainStatus, GatewayError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(result) = self.statuses.lock().pop_front() {
            return result;
        }
        Ok(self
            .default_status
            .lock()
            .clone()
            .unwrap_or(ChainStatus::Confirmed))
    }
}

/// Signer that records what it signed.
#[derive(Debug, Default)]
pub struct RecordingSigner {
    signed: AtomicUsize,
    fail_next: AtomicBool,
}

impl RecordingSigner {
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn signed_count(&self) -> usize {
        self.signed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Signer for RecordingSigner {
    async fn public_key(&self, _key: &KeyMaterial) -> Result<String, SigningError> {
        Ok("test-public-key".to_string())
    }

    async fn sign(
        &self,
        tx: &UnsignedTransaction,
        _key: &KeyMaterial,
    ) -> Result<SignedTransaction, SigningError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SigningError::Refused("scripted failure".into()));
        }
        self.signed.fetch_add(1, Ordering::SeqCst);
        Ok(SignedTransaction {
            bundle: tx.bundle.clone(),
            signature: "c0".repeat(96),
        })
    }

    fn signer_name(&self) -> &'static str {
        "recording"
    }
}
