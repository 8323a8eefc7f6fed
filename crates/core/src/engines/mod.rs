//! Decision engines, one per action family.
//!
//! Each engine is a pure function of an immutable snapshot and the evaluation
//! time, apart from the registry rewarder's record of distributed epochs.

mod auction;
mod fees;
mod liquidation;
mod registry;
mod splitter;
mod treasury;

pub use auction::{quote, AuctionBidder, MinimumBid, Quote, QuoteRejection};
pub use fees::FeeTransfer;
pub use liquidation::LiquidationEvaluator;
pub use registry::RegistryRewarder;
pub use splitter::CoinSplitter;
pub use treasury::TreasuryRebalancer;

use smallvec::SmallVec;

use crate::config::KeeperConfig;
use crate::error::PipelineError;
use crate::intent::ActionIntent;
use crate::snapshot::ProtocolSnapshot;

/// Intents emitted by one engine in one pass. Usually a handful.
pub type Intents = SmallVec<[ActionIntent; 4]>;

pub trait DecisionEngine: Send + Sync {
    /// Engine name for logging.
    fn name(&self) -> &'static str;

    fn evaluate(&self, snapshot: &ProtocolSnapshot, now: i64) -> Intents;

    /// Called when submitting one of this pass's intents failed.
    fn on_failure(&self, _intent: &ActionIntent, _error: &PipelineError) {}
}

/// The standard engine set, in evaluation order.
pub fn default_engines(config: &KeeperConfig) -> Vec<Box<dyn DecisionEngine>> {
    vec![
        Box::new(LiquidationEvaluator::new(
            config.bounds.clone(),
            config.fees.min_treasury_for_recovery,
        )),
        Box::new(AuctionBidder::new(config.bounds.clone())),
        Box::new(TreasuryRebalancer::new(config.treasury.clone())),
        Box::new(RegistryRewarder::new()),
        Box::new(FeeTransfer::new(config.fees.transfer_dust_threshold)),
        Box::new(CoinSplitter::new(config.bounds.max_offer_amount)),
    ]
}
