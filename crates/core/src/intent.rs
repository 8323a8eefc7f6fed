//! Actions proposed by the decision engines.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::snapshot::AuctionKind;

/// Discriminant of an [`ActionIntent`], for logging and progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Liquidate,
    Recover,
    BidLiquidation,
    BidRecharge,
    BidSurplus,
    RebalanceTreasury,
    DistributeReward,
    TransferFee,
    SplitCoin,
}

impl IntentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IntentKind::Liquidate => "liquidate",
            IntentKind::Recover => "recover",
            IntentKind::BidLiquidation => "bid_liquidation",
            IntentKind::BidRecharge => "bid_recharge",
            IntentKind::BidSurplus => "bid_surplus",
            IntentKind::RebalanceTreasury => "rebalance_treasury",
            IntentKind::DistributeReward => "distribute_reward",
            IntentKind::TransferFee => "transfer_fee",
            IntentKind::SplitCoin => "split_coin",
        }
    }

    pub fn for_auction(kind: AuctionKind) -> Self {
        match kind {
            AuctionKind::Collateral => IntentKind::BidLiquidation,
            AuctionKind::Recharge => IntentKind::BidRecharge,
            AuctionKind::Surplus => IntentKind::BidSurplus,
        }
    }
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terms of a bid on a Dutch auction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bid {
    /// Auction coin.
    pub target: String,
    pub amount: u64,
    /// Price ceiling: the auction price the bid was evaluated at.
    pub max_price: f64,
    /// Unix time after which the bid must not be filled.
    pub expires_at: i64,
    pub reason: String,
}

/// A single action to submit, recomputed from a fresh snapshot every pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionIntent {
    /// Start a collateral auction on an undercollateralised vault.
    Liquidate { target: String, amount: u64, reason: String },
    /// Cover a vault's bad debt from the treasury.
    Recover { target: String, amount: u64, reason: String },
    BidLiquidation(Bid),
    BidRecharge(Bid),
    BidSurplus(Bid),
    RebalanceTreasury { target: String, amount: u64, reason: String },
    DistributeReward {
        target: String,
        amount: u64,
        epoch: u64,
        reason: String,
    },
    /// Move a vault's accrued stability fees to the treasury.
    TransferFee { target: String, amount: u64, reason: String },
    /// Split a large wallet coin into bid-sized pieces summing to `amount`.
    SplitCoin {
        target: String,
        amount: u64,
        pieces: Vec<u64>,
        reason: String,
    },
}

impl ActionIntent {
    pub fn bid(kind: AuctionKind, bid: Bid) -> Self {
        match kind {
            AuctionKind::Collateral => ActionIntent::BidLiquidation(bid),
            AuctionKind::Recharge => ActionIntent::BidRecharge(bid),
            AuctionKind::Surplus => ActionIntent::BidSurplus(bid),
        }
    }

    pub fn kind(&self) -> IntentKind {
        match self {
            ActionIntent::Liquidate { .. } => IntentKind::Liquidate,
            ActionIntent::Recover { .. } => IntentKind::Recover,
            ActionIntent::BidLiquidation(_) => IntentKind::BidLiquidation,
            ActionIntent::BidRecharge(_) => IntentKind::BidRecharge,
            ActionIntent::BidSurplus(_) => IntentKind::BidSurplus,
            ActionIntent::RebalanceTreasury { .. } => IntentKind::RebalanceTreasury,
            ActionIntent::DistributeReward { .. } => IntentKind::DistributeReward,
            ActionIntent::TransferFee { .. } => IntentKind::TransferFee,
            ActionIntent::SplitCoin { .. } => IntentKind::SplitCoin,
        }
    }

    /// Coin the action spends.
    pub fn target(&self) -> &str {
        match self {
            ActionIntent::BidLiquidation(bid)
            | ActionIntent::BidRecharge(bid)
            | ActionIntent::BidSurplus(bid) => &bid.target,
            ActionIntent::Liquidate { target, .. }
            | ActionIntent::Recover { target, .. }
            | ActionIntent::RebalanceTreasury { target, .. }
            | ActionIntent::DistributeReward { target, .. }
            | ActionIntent::TransferFee { target, .. }
            | ActionIntent::SplitCoin { target, .. } => target,
        }
    }

    pub fn amount(&self) -> u64 {
        match self {
            ActionIntent::BidLiquidation(bid)
            | ActionIntent::BidRecharge(bid)
            | ActionIntent::BidSurplus(bid) => bid.amount,
            ActionIntent::Liquidate { amount, .. }
            | ActionIntent::Recover { amount, .. }
            | ActionIntent::RebalanceTreasury { amount, .. }
            | ActionIntent::DistributeReward { amount, .. }
            | ActionIntent::TransferFee { amount, .. }
            | ActionIntent::SplitCoin { amount, .. } => *amount,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            ActionIntent::BidLiquidation(bid)
            | ActionIntent::BidRecharge(bid)
            | ActionIntent::BidSurplus(bid) => &bid.reason,
            ActionIntent::Liquidate { reason, .. }
            | ActionIntent::Recover { reason, .. }
            | ActionIntent::RebalanceTreasury { reason, .. }
            | ActionIntent::DistributeReward { reason, .. }
            | ActionIntent::TransferFee { reason, .. }
            | ActionIntent::SplitCoin { reason, .. } => reason,
        }
    }

    pub fn as_bid(&self) -> Option<&Bid> {
        match self {
            ActionIntent::BidLiquidation(bid)
            | ActionIntent::BidRecharge(bid)
            | ActionIntent::BidSurplus(bid) => Some(bid),
            _ => None,
        }
    }

    pub fn epoch(&self) -> Option<u64> {
        match self {
            ActionIntent::DistributeReward { epoch, .. } => Some(*epoch),
            _ => None,
        }
    }

    pub fn pieces(&self) -> Option<&[u64]> {
        match self {
            ActionIntent::SplitCoin { pieces, .. } => Some(pieces),
            _ => None,
        }
    }
}

impl fmt::Display for ActionIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} amount={} ({})",
            self.kind(),
            self.target(),
            self.amount(),
            self.reason()
        )
    }
}
