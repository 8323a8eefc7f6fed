//! Transaction values passed between build, sign and broadcast.

use keeper_api::{PushRequest, UnsignedBundleDto};
use serde::{Deserialize, Serialize};

/// A spend bundle as returned by a builder endpoint, awaiting signatures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsignedTransaction {
    pub bundle: serde_json::Value,
    /// CLVM cost reported by the builder.
    pub cost: u64,
    /// Fee-per-cost the bundle was built with.
    pub fee_per_cost: u64,
}

impl UnsignedTransaction {
    pub fn from_bundle(dto: UnsignedBundleDto, fee_per_cost: u64) -> Self {
        Self {
            bundle: dto.bundle,
            cost: dto.cost,
            fee_per_cost,
        }
    }

    /// Total fee paid by this transaction (mojos).
    pub fn fee(&self) -> u64 {
        self.cost.saturating_mul(self.fee_per_cost)
    }
}

/// A spend bundle with its aggregated signature, ready to broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub bundle: serde_json::Value,
    /// Aggregated signature, hex encoded.
    pub signature: String,
}

impl SignedTransaction {
    pub fn to_push_request(&self) -> PushRequest {
        PushRequest {
            bundle: self.bundle.clone(),
            signature: self.signature.clone(),
        }
    }
}
