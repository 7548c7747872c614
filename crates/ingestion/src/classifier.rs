//! Trade side inference using the tick rule.
//!
//! Each minute bucket owns its own [`TickRule`], seeded by the bucket's first
//! trade. The first trade of a bucket is therefore always neutral.

use footprint_core::{Size, TradeSide};

/// Statistics about side inference across all buckets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassificationStats {
    /// Total trades classified.
    pub total_trades: u64,
    /// Trades classified as buy.
    pub buy_trades: u64,
    /// Trades classified as sell.
    pub sell_trades: u64,
    /// Trades classified as neutral.
    pub neutral_trades: u64,
    /// Total volume processed.
    pub total_volume: Size,
    /// Buy volume.
    pub buy_volume: Size,
    /// Sell volume.
    pub sell_volume: Size,
    /// Neutral volume.
    pub neutral_volume: Size,
}

impl ClassificationStats {
    /// Record one classified trade.
    pub fn record(&mut self, side: TradeSide, qty: Size) {
        self.total_trades += 1;
        self.total_volume += qty;

        match side {
            TradeSide::Buy => {
                self.buy_trades += 1;
                self.buy_volume += qty;
            }
            TradeSide::Sell => {
                self.sell_trades += 1;
                self.sell_volume += qty;
            }
            TradeSide::Neutral => {
                self.neutral_trades += 1;
                self.neutral_volume += qty;
            }
        }
    }

    /// Get the fraction of neutral volume.
    pub fn neutral_frac(&self) -> f64 {
        if self.total_volume > 0.0 {
            self.neutral_volume / self.total_volume
        } else {
            0.0
        }
    }
}

/// Tick rule state for one bucket.
#[derive(Debug, Clone, Default)]
pub struct TickRule {
    /// Last trade price seen in this bucket.
    last_price: Option<f64>,
}

impl TickRule {
    /// Create an unseeded tick rule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a trade against the previous price and remember it.
    ///
    /// Uptick is a buy, downtick a sell; a zero tick or an unseeded rule is
    /// neutral.
    pub fn classify(&mut self, price: f64) -> TradeSide {
        let side = match self.last_price {
            Some(last) if price > last => TradeSide::Buy,
            Some(last) if price < last => TradeSide::Sell,
            _ => TradeSide::Neutral,
        };
        self.last_price = Some(price);
        side
    }

    /// Last price seen, if any.
    pub fn last_price(&self) -> Option<f64> {
        self.last_price
    }
}
