//! Static fee table, for offline use and tests.

use async_trait::async_trait;

use super::{FeeError, FeeEstimator, FeeTier};

#[derive(Debug, Clone, Copy)]
pub struct FixedFeeEstimator {
    fast: u64,
    medium: u64,
}

impl FixedFeeEstimator {
    pub fn new(fast: u64, medium: u64) -> Self {
        Self { fast, medium }
    }
}

#[async_trait]
impl FeeEstimator for FixedFeeEstimator {
    async fn fee_per_cost(&self, tier: FeeTier) -> Result<u64, FeeError> {
        Ok(match tier {
            FeeTier::Fast => self.fast,
            FeeTier::Medium => self.medium,
        })
    }

    fn estimator_name(&self) -> &'static str {
        "fixed"
    }
}
