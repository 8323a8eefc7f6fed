//! Point-in-time view of protocol state.
//!
//! A [`ProtocolSnapshot`] is built once per loop iteration and never mutated.
//! Derived quantities (collateral ratio, current auction price) are always
//! recomputed from raw fields here, never taken from the RPC service.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

const BPS: f64 = 10_000.0;

/// Names of the statutes the keeper reads.
pub mod statute {
    pub const LIQUIDATION_RATIO_PCT: &str = "VAULT_LIQUIDATION_RATIO_PCT";
    pub const MINIMUM_DEBT: &str = "VAULT_MINIMUM_DEBT";
    pub const STARTING_PRICE_FACTOR_BPS: &str = "VAULT_AUCTION_STARTING_PRICE_FACTOR_BPS";
    pub const MINIMUM_BID_BPS: &str = "VAULT_AUCTION_MINIMUM_BID_BPS";
    pub const MINIMUM_BID_FLAT: &str = "VAULT_AUCTION_MINIMUM_BID_FLAT";
}

/// Statute values keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statutes(BTreeMap<String, i64>);

impl Statutes {
    pub fn new(values: BTreeMap<String, i64>) -> Self {
        Self(values)
    }

    /// Value of a statute; a missing statute is a protocol error.
    pub fn get(&self, name: &str) -> Result<i64, GatewayError> {
        self.0
            .get(name)
            .copied()
            .ok_or_else(|| GatewayError::Protocol(format!("statute {name} not published")))
    }

    /// Basis-point statute as a fraction.
    pub fn fraction(&self, name: &str) -> Result<f64, GatewayError> {
        Ok(self.get(name)? as f64 / BPS)
    }

    /// Non-negative statute as an amount.
    pub fn amount(&self, name: &str) -> Result<u64, GatewayError> {
        let value = self.get(name)?;
        u64::try_from(value)
            .map_err(|_| GatewayError::Protocol(format!("statute {name} is negative: {value}")))
    }
}

impl<const N: usize> From<[(&str, i64); N]> for Statutes {
    fn from(values: [(&str, i64); N]) -> Self {
        Self(values.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultView {
    pub id: String,
    pub collateral: u64,
    pub debt: u64,
    pub owner_puzzle_hash: String,
    pub accrued_fee: u64,
    /// A collateral auction for this vault is already running.
    pub in_liquidation: bool,
}

impl VaultView {
    pub fn collateral_value(&self, oracle_price: f64) -> f64 {
        self.collateral as f64 * oracle_price
    }

    /// collateral × price / debt; infinite for a vault without debt.
    pub fn collateral_ratio(&self, oracle_price: f64) -> f64 {
        if self.debt == 0 {
            return f64::INFINITY;
        }
        self.collateral_value(oracle_price) / self.debt as f64
    }
}

/// Auction families the keeper bids in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionKind {
    /// Vault collateral sold for stablecoin to cover debt.
    Collateral,
    /// Governance tokens minted and sold for stablecoin to recapitalise.
    Recharge,
    /// Surplus stablecoin sold for governance tokens.
    Surplus,
}

impl AuctionKind {
    pub const ALL: [AuctionKind; 3] = [
        AuctionKind::Collateral,
        AuctionKind::Recharge,
        AuctionKind::Surplus,
    ];

    fn statute_prefix(self) -> &'static str {
        match self {
            AuctionKind::Collateral => "VAULT",
            AuctionKind::Recharge => "RECHARGE",
            AuctionKind::Surplus => "SURPLUS",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuctionKind::Collateral => "collateral",
            AuctionKind::Recharge => "recharge",
            AuctionKind::Surplus => "surplus",
        }
    }
}

impl std::fmt::Display for AuctionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Price schedule of an auction family, from statutes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuctionPricing {
    /// Auction lifetime (seconds)
    pub ttl_secs: u64,
    /// Length of one price step (seconds)
    pub price_ttl_secs: u64,
    /// Price drop per step, fraction of the start price
    pub decrease_per_step: f64,
    /// Floor, fraction of the start price
    pub min_price_factor: f64,
}

impl AuctionPricing {
    pub fn from_statutes(statutes: &Statutes, kind: AuctionKind) -> Result<Self, GatewayError> {
        let prefix = kind.statute_prefix();
        Ok(Self {
            ttl_secs: statutes.amount(&format!("{prefix}_AUCTION_TTL"))?,
            price_ttl_secs: statutes.amount(&format!("{prefix}_AUCTION_PRICE_TTL"))?,
            decrease_per_step: statutes
                .fraction(&format!("{prefix}_AUCTION_PRICE_DECREASE_BPS"))?,
            min_price_factor: statutes
                .fraction(&format!("{prefix}_AUCTION_MINIMUM_PRICE_FACTOR_BPS"))?,
        })
    }

    /// Dutch price at `now` for an auction that started at `started_at`.
    ///
    /// Pure in its inputs. Elapsed time is clamped to `[0, ttl]`.
    pub fn price_at(&self, start_price: f64, started_at: i64, now: i64) -> f64 {
        let mut elapsed = now.saturating_sub(started_at).max(0) as u64;
        if self.ttl_secs > 0 {
            elapsed = elapsed.min(self.ttl_secs);
        }
        let steps = if self.price_ttl_secs == 0 {
            0
        } else {
            elapsed / self.price_ttl_secs
        };
        let stepped = start_price * (1.0 - self.decrease_per_step * steps as f64);
        stepped.max(self.floor_price(start_price)).max(0.0)
    }

    pub fn floor_price(&self, start_price: f64) -> f64 {
        start_price * self.min_price_factor
    }

    /// Time at which the auction ends.
    pub fn ends_at(&self, started_at: i64) -> i64 {
        started_at.saturating_add(self.ttl_secs as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionView {
    pub id: String,
    pub kind: AuctionKind,
    pub start_price: f64,
    pub started_at: i64,
    /// Lot still on offer.
    pub remaining: u64,
    /// Debt left to cover, collateral auctions only.
    pub debt: Option<u64>,
}

impl AuctionView {
    pub fn current_price(&self, now: i64, pricing: &AuctionPricing) -> f64 {
        pricing.price_at(self.start_price, self.started_at, now)
    }
}

/// Open auctions by family.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Auctions {
    pub collateral: Vec<AuctionView>,
    pub recharge: Vec<AuctionView>,
    pub surplus: Vec<AuctionView>,
}

impl Auctions {
    pub fn of_kind(&self, kind: AuctionKind) -> &[AuctionView] {
        match kind {
            AuctionKind::Collateral => &self.collateral,
            AuctionKind::Recharge => &self.recharge,
            AuctionKind::Surplus => &self.surplus,
        }
    }

    pub fn len(&self) -> usize {
        self.collateral.len() + self.recharge.len() + self.surplus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreasuryCoin {
    pub id: String,
    pub amount: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreasuryView {
    pub coins: Vec<TreasuryCoin>,
}

impl TreasuryView {
    pub fn balance(&self) -> u64 {
        self.coins
            .iter()
            .map(|c| c.amount)
            .fold(0u64, u64::saturating_add)
    }
}

/// Spendable coin held by the keeper's own wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletCoin {
    pub id: String,
    pub amount: u64,
}

/// Collateral coins the keeper bids with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletView {
    pub coins: Vec<WalletCoin>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryView {
    pub id: String,
    pub epoch: u64,
    pub epoch_ends_at: i64,
    pub pending_rewards: u64,
}

/// Immutable view of everything the decision engines need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolSnapshot {
    pub vaults: Vec<VaultView>,
    pub auctions: Auctions,
    pub treasury: TreasuryView,
    /// Collateral price in stablecoin.
    pub oracle_price: f64,
    /// Governance token price in stablecoin, if known.
    pub governance_price: Option<f64>,
    pub statutes: Statutes,
    pub registry: Option<RegistryView>,
    /// Collateral price quoted by an external market, when configured.
    #[serde(default)]
    pub market_price: Option<f64>,
    #[serde(default)]
    pub wallet: WalletView,
    pub fetched_at: i64,
}

impl ProtocolSnapshot {
    /// Minimum collateral ratio as a fraction (150% ⇒ 1.5).
    pub fn min_collateral_ratio(&self) -> Result<f64, GatewayError> {
        Ok(self.statutes.get(statute::LIQUIDATION_RATIO_PCT)? as f64 / 100.0)
    }

    /// Liquidatable iff the collateral ratio is strictly below the minimum.
    pub fn is_liquidatable(&self, vault: &VaultView) -> Result<bool, GatewayError> {
        Ok(vault.debt > 0 && vault.collateral_ratio(self.oracle_price) < self.min_collateral_ratio()?)
    }

    /// Market price an auction of `kind` is measured against.
    ///
    /// Collateral prefers the external market quote and falls back to the
    /// protocol oracle.
    pub fn reference_price(&self, kind: AuctionKind) -> Option<f64> {
        match kind {
            AuctionKind::Collateral => self
                .market_price
                .filter(|p| p.is_finite() && *p > 0.0)
                .or(Some(self.oracle_price)),
            AuctionKind::Recharge => self.governance_price,
            AuctionKind::Surplus => self.governance_price.map(|p| 1.0 / p),
        }
        .filter(|p| p.is_finite() && *p > 0.0)
    }
}
