//! Fee Transfer: sweeps accrued stability fees into the treasury.

use super::{DecisionEngine, Intents};
use crate::intent::ActionIntent;
use crate::snapshot::ProtocolSnapshot;

#[derive(Debug, Clone)]
pub struct FeeTransfer {
    dust_threshold: u64,
}

impl FeeTransfer {
    pub fn new(dust_threshold: u64) -> Self {
        Self {
            dust_threshold: dust_threshold.max(1),
        }
    }
}

impl DecisionEngine for FeeTransfer {
    fn name(&self) -> &'static str {
        "fee_transfer"
    }

    fn evaluate(&self, snapshot: &ProtocolSnapshot, _now: i64) -> Intents {
        let mut vaults: Vec<_> = snapshot
            .vaults
            .iter()
            .filter(|v| !v.in_liquidation && v.accrued_fee >= self.dust_threshold)
            .collect();
        // Largest fees first.
        vaults.sort_by(|a, b| b.accrued_fee.cmp(&a.accrued_fee));

        vaults
            .into_iter()
            .map(|v| ActionIntent::TransferFee {
                target: v.id.clone(),
                amount: v.accrued_fee,
                reason: format!("accrued fee {} above dust {}", v.accrued_fee, self.dust_threshold),
            })
            .collect()
    }
}
