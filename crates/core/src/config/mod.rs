//! Keeper configuration.
//!
//! - Runtime configuration (RPC endpoint, polling, loop cadence, pipeline)
//! - Operator risk bounds for bidding
//! - Maintenance thresholds (treasury, fees)

mod bounds;
mod keeper;

pub use bounds::{BidOrdering, RiskBounds};
pub use keeper::{
    default_data_dir, FeesConfig, KeeperConfig, LoopConfig, MarketConfig, PipelineConfig, PollerConfig,
    RpcConfig, TreasuryConfig,
};
