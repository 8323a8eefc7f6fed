//! Circuit keeper core logic.
//!
//! This crate provides the keeper's decision and execution machinery:
//! - Protocol snapshots and Dutch-auction pricing
//! - Decision engines (liquidation, auction bids, treasury, registry, fees,
//!   wallet coin splitting)
//! - State polling with exponential backoff
//! - Transaction pipeline (build, sign, broadcast, confirm)
//! - Single-instance lock and progress reporting
//! - The keeper loop tying it all together

pub mod clock;
pub mod config;
pub mod engines;
mod error;
mod gateway;
mod intent;
mod keeper;
pub mod lock;
mod pipeline;
mod poller;
mod progress;
mod snapshot;

#[cfg(test)]
mod test_support;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BidOrdering, KeeperConfig, RiskBounds};
pub use engines::{default_engines, DecisionEngine, Intents};
pub use error::{GatewayError, KeeperError, LockError, PipelineError, PollError};
pub use gateway::{build_path, ChainStatus, CircuitGateway, CoinState, RpcGateway};
pub use intent::{ActionIntent, Bid, IntentKind};
pub use keeper::{IterationReport, Keeper, KeeperState, RunSummary};
pub use pipeline::{TransactionPipeline, TransactionPipelineBuilder, TxRecord, TxStatus};
pub use poller::StatePoller;
pub use progress::{EventStatus, ProgressEvent, ProgressMode, ProgressReporter, Stage};
pub use snapshot::{
    statute, AuctionKind, AuctionPricing, AuctionView, Auctions, ProtocolSnapshot, RegistryView,
    Statutes, TreasuryCoin, TreasuryView, VaultView, WalletCoin, WalletView,
};
