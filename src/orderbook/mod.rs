//! Order book module
//!
//! Keeps a sequence-checked local book from snapshot and delta messages and
//! derives the ranked depth view consumers render.

mod book;
mod depth;
mod highlight;

pub use book::{Applied, OrderBookSynchronizer, SyncState};
pub use depth::{rank, MAX_LEVELS};
pub use highlight::{Highlight, HighlightTarget, HighlightTracker, Tone};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// Bids rank best-first by descending price
    pub fn is_descending(self) -> bool {
        matches!(self, Side::Bid)
    }
}

/// A single (price, size) level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Direction of a size change at an existing level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeChange {
    Increase,
    Decrease,
}

/// Per-price change annotation, valid for exactly one update cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeMetadata {
    New,
    Resized(SizeChange),
}

/// Level in the ranked depth view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedLevel {
    pub price: Decimal,
    pub size: Decimal,
    /// Running size from the best price outward
    pub cumulative: Decimal,
    /// `cumulative` as a share of the capped side total, in percent
    pub cumulative_percentage: Decimal,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_new: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_change: Option<SizeChange>,
}

impl RankedLevel {
    fn annotate(&mut self, metadata: ChangeMetadata) {
        match metadata {
            ChangeMetadata::New => self.is_new = true,
            ChangeMetadata::Resized(change) => self.size_change = Some(change),
        }
    }
}

/// Consumer-facing book view.
///
/// Bids run best to worst; asks run worst to best so the last ask sits next
/// to the spread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookView {
    pub bids: Vec<RankedLevel>,
    pub asks: Vec<RankedLevel>,
}

impl BookView {
    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    pub fn side(&self, side: Side) -> &[RankedLevel] {
        match side {
            Side::Bid => &self.bids,
            Side::Ask => &self.asks,
        }
    }

    /// Best bid, if any
    pub fn best_bid(&self) -> Option<&RankedLevel> {
        self.bids.first()
    }

    /// Best ask, if any
    pub fn best_ask(&self) -> Option<&RankedLevel> {
        self.asks.last()
    }
}
