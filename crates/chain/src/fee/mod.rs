//! Fee policy and fee estimation.
//!
//! A [`FeePolicy`] is either a named tier, resolved to a fee-per-cost value by
//! a [`FeeEstimator`], or an explicit fee-per-cost used verbatim.
//!
//! # Example
//!
//! ```rust,ignore
//! use keeper_chain::fee::{FeePolicy, FixedFeeEstimator};
//!
//! let estimator = FixedFeeEstimator::new(10, 5);
//! let policy: FeePolicy = "fast".parse()?;
//! let fee_per_cost = policy.resolve(&estimator).await?;
//! ```

mod fixed;
mod rpc;

pub use fixed::FixedFeeEstimator;
pub use rpc::RpcFeeEstimator;

use std::fmt::{self, Debug};
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeeError {
    #[error("fee estimate for {tier} unavailable: {message}")]
    Unavailable { tier: FeeTier, message: String },

    #[error("invalid fee policy {0:?}: expected fast, medium or an integer")]
    InvalidPolicy(String),
}

/// Named fee targets understood by the fee estimation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeeTier {
    Fast,
    Medium,
}

impl FeeTier {
    pub fn as_str(self) -> &'static str {
        match self {
            FeeTier::Fast => "fast",
            FeeTier::Medium => "medium",
        }
    }
}

impl fmt::Display for FeeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the fee of a transaction is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FeePolicyRepr", into = "FeePolicyRepr")]
pub enum FeePolicy {
    Tier(FeeTier),
    Explicit(u64),
}

impl Default for FeePolicy {
    fn default() -> Self {
        FeePolicy::Tier(FeeTier::Fast)
    }
}

impl FeePolicy {
    /// Resolve to a fee-per-cost value.
    pub async fn resolve(&self, estimator: &dyn FeeEstimator) -> Result<u64, FeeError> {
        match self {
            FeePolicy::Tier(tier) => estimator.fee_per_cost(*tier).await,
            FeePolicy::Explicit(value) => Ok(*value),
        }
    }
}

impl FromStr for FeePolicy {
    type Err = FeeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fast" => Ok(FeePolicy::Tier(FeeTier::Fast)),
            "medium" => Ok(FeePolicy::Tier(FeeTier::Medium)),
            other => other
                .parse::<u64>()
                .map(FeePolicy::Explicit)
                .map_err(|_| FeeError::InvalidPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for FeePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeePolicy::Tier(tier) => write!(f, "{tier}"),
            FeePolicy::Explicit(value) => write!(f, "{value}"),
        }
    }
}

/// Config files may write `fee_policy = "fast"` or `fee_policy = 5`.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum FeePolicyRepr {
    Number(u64),
    Name(String),
}

impl TryFrom<FeePolicyRepr> for FeePolicy {
    type Error = FeeError;

    fn try_from(repr: FeePolicyRepr) -> Result<Self, Self::Error> {
        match repr {
            FeePolicyRepr::Number(value) => Ok(FeePolicy::Explicit(value)),
            FeePolicyRepr::Name(name) => name.parse(),
        }
    }
}

impl From<FeePolicy> for FeePolicyRepr {
    fn from(policy: FeePolicy) -> Self {
        match policy {
            FeePolicy::Tier(tier) => FeePolicyRepr::Name(tier.as_str().to_string()),
            FeePolicy::Explicit(value) => FeePolicyRepr::Number(value),
        }
    }
}

/// Maps a fee tier to a fee-per-cost value.
#[async_trait]
pub trait FeeEstimator: Send + Sync + Debug {
    async fn fee_per_cost(&self, tier: FeeTier) -> Result<u64, FeeError>;

    /// Estimator name for logging.
    fn estimator_name(&self) -> &'static str;
}
