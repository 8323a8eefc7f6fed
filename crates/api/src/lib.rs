//! Circuit RPC API client.
//!
//! This crate provides the HTTP client for the protocol RPC service:
//! - Read endpoints: vaults, auctions, treasury, oracle, statutes, registry, coins
//! - Wallet coin listing for the keeper's own key
//! - External market ticker for the collateral reference price
//! - Write endpoints: transaction building, broadcast and status lookup
//! - Per-call timeout and error classification (transient vs protocol)

mod client;
mod error;
mod market;
mod types;

pub use client::{CircuitClient, DEFAULT_REQUEST_TIMEOUT};
pub use error::{ApiError, Result};
pub use market::MarketClient;
pub use types::{
    AuctionDto, AuctionFamily, BuildRequest, CoinDto, FeeEstimateDto, OracleDto, PushRequest,
    PushResponse, RegistryDto, StatutesDto, TreasuryCoinDto, TreasuryDto, TxStatusDto,
    UnsignedBundleDto, VaultDto, WalletCoinDto,
};
