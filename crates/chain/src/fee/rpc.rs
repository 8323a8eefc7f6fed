//! Fee estimation through the RPC service.

use async_trait::async_trait;
use keeper_api::CircuitClient;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{FeeError, FeeEstimator, FeeTier};

/// Estimator backed by `GET /fee_per_cost`.
///
/// Estimates are capped at `max_fee_per_cost`. The last good estimate per tier
/// is cached and reused when the service is briefly unreachable.
#[derive(Debug)]
pub struct RpcFeeEstimator {
    client: CircuitClient,
    max_fee_per_cost: u64,
    cache: RwLock<CachedEstimates>,
}

#[derive(Debug, Default, Clone, Copy)]
struct CachedEstimates {
    fast: Option<u64>,
    medium: Option<u64>,
}

impl CachedEstimates {
    fn get(&self, tier: FeeTier) -> Option<u64> {
        match tier {
            FeeTier::Fast => self.fast,
            FeeTier::Medium => self.medium,
        }
    }

    fn slot(&mut self, tier: FeeTier) -> &mut Option<u64> {
        match tier {
            FeeTier::Fast => &mut self.fast,
            FeeTier::Medium => &mut self.medium,
        }
    }
}

impl RpcFeeEstimator {
    pub fn new(client: CircuitClient, max_fee_per_cost: u64) -> Self {
        Self {
            client,
            max_fee_per_cost,
            cache: RwLock::new(CachedEstimates::default()),
        }
    }

    /// Last cached estimate for a tier.
    pub fn cached(&self, tier: FeeTier) -> Option<u64> {
        self.cache.read().get(tier)
    }

    /// Store an estimate, capped at the configured maximum.
    pub fn update_cache(&self, tier: FeeTier, fee_per_cost: u64) -> u64 {
        let capped = fee_per_cost.min(self.max_fee_per_cost);
        *self.cache.write().slot(tier) = Some(capped);
        capped
    }
}

#[async_trait]
impl FeeEstimator for RpcFeeEstimator {
    async fn fee_per_cost(&self, tier: FeeTier) -> Result<u64, FeeError> {
        match self.client.fee_per_cost(tier.as_str()).await {
            Ok(estimate) => {
                let capped = self.update_cache(tier, estimate.fee_per_cost);
                debug!(tier = %tier, fee_per_cost = capped, "Fee estimate");
                Ok(capped)
            }
            Err(e) => match self.cached(tier) {
                Some(cached) if e.is_transient() => {
                    warn!(tier = %tier, error = %e, cached, "Fee estimate failed, using cached value");
                    Ok(cached)
                }
                _ => Err(FeeError::Unavailable {
                    tier,
                    message: e.to_string(),
                }),
            },
        }
    }

    fn estimator_name(&self) -> &'static str {
        "rpc"
    }
}
