//! Wire types exchanged with the RPC service.
//!
//! Field names follow the service's JSON. Derived quantities (current auction
//! price, collateral ratio) are deliberately absent: the keeper recomputes them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A vault as listed by `GET /vaults`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultDto {
    /// Vault coin name (hex).
    pub name: String,
    /// Locked collateral (mojos).
    pub collateral: u64,
    /// Outstanding debt (stablecoin base units).
    #[serde(alias = "principal")]
    pub debt: u64,
    pub owner_puzzle_hash: String,
    /// Stability fees accrued and not yet transferred to the treasury.
    #[serde(default, alias = "discounted_sf")]
    pub accrued_fees: u64,
    /// Set while a collateral auction for this vault is running.
    #[serde(default)]
    pub in_liquidation: bool,
}

/// Auction families served by the RPC service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionFamily {
    Collateral,
    Recharge,
    Surplus,
}

impl AuctionFamily {
    /// Listing endpoint for open auctions of this family.
    pub fn list_path(self) -> &'static str {
        match self {
            AuctionFamily::Collateral => "/vaults/auctions",
            AuctionFamily::Recharge => "/recharge_auctions",
            AuctionFamily::Surplus => "/surplus_auctions",
        }
    }
}

/// An open Dutch auction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionDto {
    /// Auction coin name (hex).
    pub name: String,
    pub start_price: f64,
    /// Unix timestamp (seconds) the auction started at.
    pub started_at: i64,
    /// Lot still on offer.
    pub remaining: u64,
    /// Debt left to cover, collateral auctions only.
    #[serde(default)]
    pub debt: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreasuryCoinDto {
    pub name: String,
    pub amount: u64,
}

/// Treasury ring, `GET /treasury`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreasuryDto {
    pub coins: Vec<TreasuryCoinDto>,
}

impl TreasuryDto {
    pub fn balance(&self) -> u64 {
        self.coins
            .iter()
            .map(|c| c.amount)
            .fold(0u64, u64::saturating_add)
    }
}

/// Oracle prices, `GET /oracle`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleDto {
    /// Collateral price in stablecoin.
    pub price: f64,
    /// Governance token price in stablecoin, when a market price is known.
    #[serde(default)]
    pub governance_price: Option<f64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

/// Statute values, `GET /statutes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatutesDto {
    pub implemented_statutes: BTreeMap<String, i64>,
}

/// Rewards registry, `GET /registry`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryDto {
    pub name: String,
    pub epoch: u64,
    pub epoch_ends_at: i64,
    pub pending_rewards: u64,
}

/// A single coin, `GET /coins/{name}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinDto {
    pub name: String,
    pub amount: u64,
    #[serde(default)]
    pub spent: bool,
    #[serde(default)]
    pub confirmed_height: Option<u32>,
}

/// A coin owned by the keeper's wallet, `POST /coins`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletCoinDto {
    pub name: String,
    pub amount: u64,
    /// Asset symbol (`XCH`, `TXCH`, a CAT ticker); absent means native.
    #[serde(default)]
    pub symbol: Option<String>,
}

impl WalletCoinDto {
    /// Whether the coin holds the native collateral asset.
    pub fn is_native(&self) -> bool {
        self.symbol
            .as_deref()
            .map_or(true, |s| s.eq_ignore_ascii_case("xch") || s.eq_ignore_ascii_case("txch"))
    }
}

/// `GET /fee_per_cost?target=fast|medium`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeEstimateDto {
    pub fee_per_cost: u64,
}

/// Body of every transaction builder call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub coin_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u64>,
    /// Output amounts of a coin split.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amounts: Option<Vec<u64>>,
    pub fee_per_cost: u64,
    /// Public key identifying the keeper's wallet.
    pub synthetic_pk: String,
}

/// Unsigned spend bundle returned by a builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsignedBundleDto {
    pub bundle: serde_json::Value,
    pub cost: u64,
}

/// `POST /push_transaction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    pub bundle: serde_json::Value,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    pub tx_id: String,
}

/// `POST /transactions/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxStatusDto {
    /// `pending`, `confirmed` or `failed`.
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}
