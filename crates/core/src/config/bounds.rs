//! Operator risk bounds for bidding.

use serde::{Deserialize, Serialize};

/// Order in which qualifying auctions are bid on within one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidOrdering {
    /// Ascending remaining lot: clear the smallest positions first.
    #[default]
    SmallestFirst,
    LargestFirst,
    /// Keep the order the RPC service listed them in.
    AsListed,
}

impl std::str::FromStr for BidOrdering {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "smallest_first" => Ok(BidOrdering::SmallestFirst),
            "largest_first" => Ok(BidOrdering::LargestFirst),
            "as_listed" => Ok(BidOrdering::AsListed),
            other => Err(format!("unknown bid ordering: {other}")),
        }
    }
}

/// Limits the keeper must respect when committing funds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskBounds {
    /// Largest amount committed to a single bid (base units)
    #[serde(default = "default_max_bid_amount")]
    pub max_bid_amount: u64,

    /// Minimum discount from the reference price (fraction, 0.1 = 10%)
    #[serde(default = "default_min_discount")]
    pub min_discount: f64,

    /// Largest amount placed in a single counter-offer (base units)
    #[serde(default = "default_max_offer_amount")]
    pub max_offer_amount: u64,

    /// Lifetime of a bid before the protocol must refuse it (seconds)
    #[serde(default = "default_offer_expiry")]
    pub offer_expiry_secs: u64,

    #[serde(default)]
    pub bid_ordering: BidOrdering,
}

fn default_max_bid_amount() -> u64 {
    1_000_000
}
fn default_min_discount() -> f64 {
    0.1
}
fn default_max_offer_amount() -> u64 {
    5_000_000
}
fn default_offer_expiry() -> u64 {
    600
}

impl Default for RiskBounds {
    fn default() -> Self {
        Self {
            max_bid_amount: default_max_bid_amount(),
            min_discount: default_min_discount(),
            max_offer_amount: default_max_offer_amount(),
            offer_expiry_secs: default_offer_expiry(),
            bid_ordering: BidOrdering::default(),
        }
    }
}

impl RiskBounds {
    /// Largest amount a bid on a lot of `remaining` may commit.
    pub fn bid_cap(&self, remaining: u64) -> u64 {
        self.max_bid_amount
            .min(remaining)
            .min(self.max_offer_amount)
    }
}
