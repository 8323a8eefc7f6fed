//! Treasury Rebalancer.

use tracing::debug;

use super::{DecisionEngine, Intents};
use crate::config::TreasuryConfig;
use crate::intent::ActionIntent;
use crate::snapshot::ProtocolSnapshot;

/// Evens out treasury coins when they are too many or too uneven.
#[derive(Debug, Clone)]
pub struct TreasuryRebalancer {
    config: TreasuryConfig,
}

impl TreasuryRebalancer {
    pub fn new(config: TreasuryConfig) -> Self {
        Self { config }
    }
}

impl DecisionEngine for TreasuryRebalancer {
    fn name(&self) -> &'static str {
        "treasury"
    }

    fn evaluate(&self, snapshot: &ProtocolSnapshot, _now: i64) -> Intents {
        let mut out = Intents::new();
        let coins = &snapshot.treasury.coins;
        if coins.len() < 2 {
            return out;
        }

        let total = snapshot.treasury.balance();
        let count = coins.len();
        let (Some(largest), Some(smallest)) = (
            coins.iter().max_by_key(|c| c.amount),
            coins.iter().min_by_key(|c| c.amount),
        ) else {
            return out;
        };
        let spread = largest.amount - smallest.amount;
        let mean = total as f64 / count as f64;
        let skew = if mean > 0.0 { spread as f64 / mean } else { 0.0 };

        let fragmented = count > self.config.max_coin_count;
        let skewed = skew > self.config.max_skew && spread >= self.config.min_rebalance_delta;
        debug!(count, total, skew, fragmented, skewed, "Treasury checked");

        if fragmented || skewed {
            let reason = if fragmented {
                format!("{count} treasury coins exceed {}", self.config.max_coin_count)
            } else {
                format!(
                    "treasury skew {:.2} exceeds {:.2} (spread {spread})",
                    skew, self.config.max_skew
                )
            };
            out.push(ActionIntent::RebalanceTreasury {
                target: largest.id.clone(),
                amount: total / count as u64,
                reason,
            });
        }
        out
    }
}
