//! Outcome draw policies for coin-flip rounds.
//!
//! The draw is independent of every individual wager and happens exactly
//! once per round, inside the settlement claim. Its distribution is an
//! injectable policy rather than a hard-coded fair coin; intended odds are
//! a product decision.

use crate::types::{CoinSide, BPS_SCALE};
use rand::Rng;

pub trait DrawPolicy: Send + Sync {
    fn draw(&self) -> CoinSide;
}

/// Draws heads with a configured probability in basis points.
pub struct WeightedDraw {
    heads_bps: u32,
}

impl WeightedDraw {
    pub fn new(heads_bps: u32) -> Self {
        Self {
            heads_bps: heads_bps.min(BPS_SCALE),
        }
    }

    pub fn fair() -> Self {
        Self::new(BPS_SCALE / 2)
    }
}

impl DrawPolicy for WeightedDraw {
    fn draw(&self) -> CoinSide {
        let roll = rand::thread_rng().gen_range(0..BPS_SCALE);
        if roll < self.heads_bps {
            CoinSide::Heads
        } else {
            CoinSide::Tails
        }
    }
}

/// Always returns the same side. For tests and settlement rehearsals.
pub struct FixedDraw(pub CoinSide);

impl DrawPolicy for FixedDraw {
    fn draw(&self) -> CoinSide {
        self.0
    }
}
