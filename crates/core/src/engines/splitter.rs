//! Coin Splitter: keeps the wallet stocked with bid-sized collateral coins.

use tracing::debug;

use super::{DecisionEngine, Intents};
use crate::intent::ActionIntent;
use crate::snapshot::ProtocolSnapshot;

/// Bid-sized coins that make splitting unnecessary.
const READY_COINS: usize = 5;

/// Upper bound on outputs of a single split.
const MAX_PIECES: u64 = 10;

/// Splits one oversized wallet coin per pass into pieces of roughly
/// `chunk` (the operator's `max_offer_amount`), so several bids can be
/// funded in parallel.
#[derive(Debug, Clone)]
pub struct CoinSplitter {
    chunk: u64,
}

impl CoinSplitter {
    pub fn new(chunk: u64) -> Self {
        Self { chunk }
    }

    /// Piece amounts for a coin of `amount`, summing to `amount`.
    fn pieces(&self, amount: u64) -> Vec<u64> {
        let count = (amount / self.chunk).min(MAX_PIECES).max(1);
        let piece = amount / count;
        let mut pieces = vec![piece; count as usize];
        let remainder = amount - piece * count;
        if remainder > 0 {
            pieces.push(remainder);
        }
        pieces
    }
}

impl DecisionEngine for CoinSplitter {
    fn name(&self) -> &'static str {
        "coin_splitter"
    }

    fn evaluate(&self, snapshot: &ProtocolSnapshot, _now: i64) -> Intents {
        let mut out = Intents::new();
        if self.chunk == 0 {
            return out;
        }
        let coins = &snapshot.wallet.coins;

        let ready = coins.iter().filter(|c| c.amount <= self.chunk).count();
        if ready >= READY_COINS {
            debug!(ready, "Enough bid-sized coins, not splitting");
            return out;
        }

        let oversized = coins
            .iter()
            .filter(|c| c.amount > self.chunk.saturating_mul(2))
            .max_by_key(|c| c.amount);
        if let Some(coin) = oversized {
            let pieces = self.pieces(coin.amount);
            out.push(ActionIntent::SplitCoin {
                target: coin.id.clone(),
                amount: coin.amount,
                reason: format!(
                    "{ready} bid-sized coins, splitting {} into {} pieces",
                    coin.amount,
                    pieces.len()
                ),
                pieces,
            });
        }
        out
    }
}
