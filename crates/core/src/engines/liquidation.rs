//! Liquidation Evaluator: starts collateral auctions and recovers bad debt.

use tracing::{debug, info, warn};

use super::auction::{quote, MinimumBid};
use super::{DecisionEngine, Intents};
use crate::config::RiskBounds;
use crate::error::GatewayError;
use crate::intent::ActionIntent;
use crate::snapshot::{statute, AuctionKind, AuctionPricing, AuctionView, ProtocolSnapshot, VaultView};

/// Statute-derived terms of the collateral auction a liquidation would open.
struct AuctionTerms {
    pricing: AuctionPricing,
    starting_factor: f64,
    minimum_bid: MinimumBid,
}

impl AuctionTerms {
    fn from_snapshot(snapshot: &ProtocolSnapshot) -> Result<Self, GatewayError> {
        Ok(Self {
            pricing: AuctionPricing::from_statutes(&snapshot.statutes, AuctionKind::Collateral)?,
            starting_factor: snapshot.statutes.fraction(statute::STARTING_PRICE_FACTOR_BPS)?,
            minimum_bid: MinimumBid::from_statutes(&snapshot.statutes)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LiquidationEvaluator {
    bounds: RiskBounds,
    min_treasury_for_recovery: u64,
}

impl LiquidationEvaluator {
    pub fn new(bounds: RiskBounds, min_treasury_for_recovery: u64) -> Self {
        Self {
            bounds,
            min_treasury_for_recovery,
        }
    }

    /// Whether liquidating leaves unrecoverable bad debt.
    fn is_bad_debt(vault: &VaultView, oracle_price: f64, minimum_debt: u64) -> bool {
        vault.collateral == 0 || vault.collateral_value(oracle_price) < minimum_debt as f64
    }

    /// Open the vault's auction virtually and check the operator would bid on
    /// it by the time it reaches its floor price.
    fn precheck(
        &self,
        snapshot: &ProtocolSnapshot,
        vault: &VaultView,
        terms: &AuctionTerms,
        now: i64,
    ) -> Result<f64, String> {
        let virtual_auction = AuctionView {
            id: vault.id.clone(),
            kind: AuctionKind::Collateral,
            start_price: snapshot.oracle_price * terms.starting_factor,
            started_at: now,
            remaining: vault.collateral,
            debt: Some(vault.debt),
        };
        let floor = terms.pricing.floor_price(virtual_auction.start_price);
        quote(
            &virtual_auction,
            snapshot.reference_price(AuctionKind::Collateral),
            floor,
            &self.bounds,
            Some(&terms.minimum_bid),
        )
        .map(|q| q.discount)
        .map_err(|rejection| rejection.to_string())
    }
}

impl DecisionEngine for LiquidationEvaluator {
    fn name(&self) -> &'static str {
        "liquidation"
    }

    fn evaluate(&self, snapshot: &ProtocolSnapshot, now: i64) -> Intents {
        let mut out = Intents::new();

        let min_ratio = match snapshot.min_collateral_ratio() {
            Ok(ratio) => ratio,
            Err(e) => {
                warn!(error = %e, "Cannot evaluate vaults");
                return out;
            }
        };

        let liquidatable: Vec<&VaultView> = snapshot
            .vaults
            .iter()
            .filter(|v| !v.in_liquidation && v.debt > 0)
            .filter(|v| v.collateral_ratio(snapshot.oracle_price) < min_ratio)
            .collect();
        if liquidatable.is_empty() {
            return out;
        }

        let minimum_debt = snapshot.statutes.amount(statute::MINIMUM_DEBT);
        let terms = AuctionTerms::from_snapshot(snapshot);
        let treasury = snapshot.treasury.balance();
        let mut recovering = false;

        for vault in liquidatable {
            let ratio = vault.collateral_ratio(snapshot.oracle_price);
            let minimum_debt = match &minimum_debt {
                Ok(value) => *value,
                Err(e) => {
                    warn!(vault = %vault.id, error = %e, "Skipping vault: debt floor unknown");
                    continue;
                }
            };

            if Self::is_bad_debt(vault, snapshot.oracle_price, minimum_debt) {
                if recovering {
                    debug!(vault = %vault.id, "Bad debt recovery already planned this pass");
                } else if treasury < self.min_treasury_for_recovery {
                    info!(
                        vault = %vault.id,
                        treasury,
                        required = self.min_treasury_for_recovery,
                        "Treasury too low to recover bad debt"
                    );
                } else {
                    recovering = true;
                    out.push(ActionIntent::Recover {
                        target: vault.id.clone(),
                        amount: vault.debt.min(treasury),
                        reason: format!(
                            "collateral worth {:.2} cannot cover debt {} (floor {minimum_debt})",
                            vault.collateral_value(snapshot.oracle_price),
                            vault.debt
                        ),
                    });
                }
                continue;
            }

            let terms = match &terms {
                Ok(terms) => terms,
                Err(e) => {
                    warn!(vault = %vault.id, error = %e, "Skipping vault: auction statutes missing");
                    continue;
                }
            };

            match self.precheck(snapshot, vault, terms, now) {
                Ok(floor_discount) => out.push(ActionIntent::Liquidate {
                    target: vault.id.clone(),
                    amount: vault.debt,
                    reason: format!(
                        "collateral ratio {ratio:.3} below {min_ratio:.3}; bid qualifies at {:.2}% discount",
                        floor_discount * 100.0
                    ),
                }),
                Err(why) => info!(
                    vault = %vault.id,
                    ratio,
                    reason = %why,
                    "Liquidatable vault skipped: auction would never qualify for a bid"
                ),
            }
        }

        out
    }
}
