//! Auction Bidder for collateral, recharge and surplus auctions.

use std::fmt;

use tracing::{debug, warn};

use super::{DecisionEngine, Intents};
use crate::config::{BidOrdering, RiskBounds};
use crate::error::GatewayError;
use crate::intent::{ActionIntent, Bid};
use crate::snapshot::{statute, AuctionKind, AuctionPricing, AuctionView, ProtocolSnapshot, Statutes};

/// Minimum bid on a collateral auction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinimumBid {
    /// Fraction of the auction's remaining debt
    pub relative: f64,
    /// Absolute floor (stablecoin base units)
    pub flat: u64,
}

impl MinimumBid {
    pub fn from_statutes(statutes: &Statutes) -> Result<Self, GatewayError> {
        Ok(Self {
            relative: statutes.fraction(statute::MINIMUM_BID_BPS)?,
            flat: statutes.amount(statute::MINIMUM_BID_FLAT)?,
        })
    }

    pub fn for_debt(&self, debt: u64) -> f64 {
        (debt as f64 * self.relative).max(self.flat as f64)
    }
}

/// An acceptable bid on an auction at a given price.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub price: f64,
    /// (reference − price) / reference
    pub discount: f64,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuoteRejection {
    NoReferencePrice,
    DiscountTooLow { discount: f64, required: f64 },
    NothingToBid,
    BelowMinimumBid { value: f64, minimum: f64 },
}

impl fmt::Display for QuoteRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuoteRejection::NoReferencePrice => f.write_str("no reference price"),
            QuoteRejection::DiscountTooLow { discount, required } => write!(
                f,
                "discount {:.2}% below required {:.2}%",
                discount * 100.0,
                required * 100.0
            ),
            QuoteRejection::NothingToBid => f.write_str("bid cap is zero"),
            QuoteRejection::BelowMinimumBid { value, minimum } => {
                write!(f, "bid value {value:.2} below protocol minimum {minimum:.2}")
            }
        }
    }
}

/// Decide whether, and how much, to bid on `auction` at `price`.
///
/// Shared by the bidder and by the liquidation pre-check. The amount never
/// exceeds `min(max_bid_amount, remaining, max_offer_amount)` and no quote is
/// produced below `min_discount`.
pub fn quote(
    auction: &AuctionView,
    reference: Option<f64>,
    price: f64,
    bounds: &RiskBounds,
    minimum_bid: Option<&MinimumBid>,
) -> Result<Quote, QuoteRejection> {
    let reference = reference
        .filter(|r| r.is_finite() && *r > 0.0)
        .ok_or(QuoteRejection::NoReferencePrice)?;

    let discount = (reference - price) / reference;
    if !(discount >= bounds.min_discount) {
        return Err(QuoteRejection::DiscountTooLow {
            discount,
            required: bounds.min_discount,
        });
    }

    let amount = bounds.bid_cap(auction.remaining);
    if amount == 0 {
        return Err(QuoteRejection::NothingToBid);
    }

    if let (Some(minimum_bid), Some(debt)) = (minimum_bid, auction.debt) {
        let value = amount as f64 * price;
        let minimum = minimum_bid.for_debt(debt);
        // A small bid is still valid when it settles all debt or takes the whole lot.
        if value < minimum && value < debt as f64 && amount < auction.remaining {
            return Err(QuoteRejection::BelowMinimumBid { value, minimum });
        }
    }

    Ok(Quote {
        price,
        discount,
        amount,
    })
}

/// Bids on open Dutch auctions that trade at a sufficient discount.
#[derive(Debug, Clone)]
pub struct AuctionBidder {
    bounds: RiskBounds,
}

impl AuctionBidder {
    pub fn new(bounds: RiskBounds) -> Self {
        Self { bounds }
    }

    fn evaluate_kind(&self, snapshot: &ProtocolSnapshot, kind: AuctionKind, now: i64, out: &mut Intents) {
        let auctions = snapshot.auctions.of_kind(kind);
        if auctions.is_empty() {
            return;
        }

        let pricing = match AuctionPricing::from_statutes(&snapshot.statutes, kind) {
            Ok(pricing) => pricing,
            Err(e) => {
                warn!(kind = %kind, error = %e, "Skipping auctions: pricing statutes missing");
                return;
            }
        };
        let minimum_bid = match kind {
            AuctionKind::Collateral => match MinimumBid::from_statutes(&snapshot.statutes) {
                Ok(min) => Some(min),
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Skipping auctions: minimum bid statutes missing");
                    return;
                }
            },
            _ => None,
        };
        let reference = snapshot.reference_price(kind);

        let mut candidates: Vec<(&AuctionView, Quote)> = auctions
            .iter()
            .filter(|auction| {
                let open = pricing.ttl_secs == 0 || now < pricing.ends_at(auction.started_at);
                if !open {
                    debug!(auction = %auction.id, kind = %kind, "Auction expired");
                }
                open
            })
            .filter_map(|auction| {
                let price = auction.current_price(now, &pricing);
                match quote(auction, reference, price, &self.bounds, minimum_bid.as_ref()) {
                    Ok(q) => Some((auction, q)),
                    Err(rejection) => {
                        debug!(auction = %auction.id, kind = %kind, price, reason = %rejection, "Not bidding");
                        None
                    }
                }
            })
            .collect();

        match self.bounds.bid_ordering {
            BidOrdering::SmallestFirst => candidates.sort_by_key(|(a, _)| a.remaining),
            BidOrdering::LargestFirst => {
                candidates.sort_by_key(|(a, _)| std::cmp::Reverse(a.remaining))
            }
            BidOrdering::AsListed => {}
        }

        let expires_at = now.saturating_add(self.bounds.offer_expiry_secs as i64);
        for (auction, q) in candidates {
            let reason = format!(
                "{kind} auction at {:.4} is {:.2}% below reference",
                q.price,
                q.discount * 100.0
            );
            out.push(ActionIntent::bid(
                kind,
                Bid {
                    target: auction.id.clone(),
                    amount: q.amount,
                    max_price: q.price,
                    expires_at,
                    reason,
                },
            ));
        }
    }
}

impl DecisionEngine for AuctionBidder {
    fn name(&self) -> &'static str {
        "auction_bidder"
    }

    fn evaluate(&self, snapshot: &ProtocolSnapshot, now: i64) -> Intents {
        let mut out = Intents::new();
        for kind in AuctionKind::ALL {
            self.evaluate_kind(snapshot, kind, now, &mut out);
        }
        out
    }
}
