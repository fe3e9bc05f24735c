//! Transient level highlights
//!
//! A delta marks levels as new or resized for one update cycle. Consumers
//! flash those levels for a fixed duration; this tracker owns the timing so
//! overlapping updates replace a pending clearance instead of racing it.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::{BookView, Side, SizeChange};

/// Default flash duration
pub const FLASH_DURATION: Duration = Duration::from_millis(500);

/// Which part of a level is lit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightTarget {
    Row,
    Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Positive,
    Negative,
}

/// An active highlight
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Highlight {
    pub side: Side,
    pub price: Decimal,
    pub target: HighlightTarget,
    pub tone: Tone,
}

type Key = (Side, Decimal, HighlightTarget);

#[derive(Debug)]
pub struct HighlightTracker {
    duration: Duration,
    active: HashMap<Key, (Tone, Instant)>,
}

impl Default for HighlightTracker {
    fn default() -> Self {
        Self::new(FLASH_DURATION)
    }
}

impl HighlightTracker {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            active: HashMap::new(),
        }
    }

    /// Record the change metadata carried by a freshly computed view.
    pub fn observe(&mut self, view: &BookView, now: Instant) {
        let deadline = now + self.duration;

        // Levels that left the view take their highlights with them.
        self.active.retain(|(side, price, _), _| {
            view.side(*side).iter().any(|level| level.price == *price)
        });

        for side in [Side::Bid, Side::Ask] {
            for level in view.side(side) {
                if level.is_new {
                    let tone = match side {
                        Side::Bid => Tone::Positive,
                        Side::Ask => Tone::Negative,
                    };
                    self.active
                        .insert((side, level.price, HighlightTarget::Row), (tone, deadline));
                }

                let size_key = (side, level.price, HighlightTarget::Size);
                match level.size_change {
                    Some(SizeChange::Increase) => {
                        self.active.insert(size_key, (Tone::Positive, deadline));
                    }
                    Some(SizeChange::Decrease) => {
                        self.active.insert(size_key, (Tone::Negative, deadline));
                    }
                    None => {
                        self.active.remove(&size_key);
                    }
                }
            }
        }
    }

    /// Drop elapsed highlights; returns whether anything was cleared
    pub fn expire(&mut self, now: Instant) -> bool {
        let before = self.active.len();
        self.active.retain(|_, (_, deadline)| *deadline > now);
        self.active.len() != before
    }

    /// Earliest pending clearance
    pub fn next_deadline(&self) -> Option<Instant> {
        self.active.values().map(|(_, deadline)| *deadline).min()
    }

    /// Highlights still lit at `now`, ordered by side then price
    pub fn active(&self, now: Instant) -> Vec<Highlight> {
        let mut lit: Vec<Highlight> = self
            .active
            .iter()
            .filter(|(_, (_, deadline))| *deadline > now)
            .map(|(&(side, price, target), &(tone, _))| Highlight {
                side,
                price,
                target,
                tone,
            })
            .collect();
        lit.sort_by(|a, b| {
            (a.side as u8, a.price, a.target as u8).cmp(&(b.side as u8, b.price, b.target as u8))
        });
        lit
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::RankedLevel;
    use rust_decimal_macros::dec;

    fn level(price: Decimal, is_new: bool, size_change: Option<SizeChange>) -> RankedLevel {
        RankedLevel {
            price,
            size: dec!(1),
            cumulative: dec!(1),
            cumulative_percentage: dec!(100),
            is_new,
            size_change,
        }
    }

    #[test]
    fn test_new_levels_flash_by_side() {
        let mut tracker = HighlightTracker::default();
        let now = Instant::now();
        let view = BookView {
            bids: vec![level(dec!(100), true, None)],
            asks: vec![level(dec!(101), true, None)],
        };

        tracker.observe(&view, now);
        let lit = tracker.active(now);

        assert_eq!(lit.len(), 2);
        assert_eq!(lit[0].side, Side::Bid);
        assert_eq!(lit[0].target, HighlightTarget::Row);
        assert_eq!(lit[0].tone, Tone::Positive);
        assert_eq!(lit[1].side, Side::Ask);
        assert_eq!(lit[1].tone, Tone::Negative);
    }

    #[test]
    fn test_highlights_expire_after_duration() {
        let mut tracker = HighlightTracker::new(Duration::from_millis(500));
        let now = Instant::now();
        let view = BookView {
            bids: vec![level(dec!(100), false, Some(SizeChange::Increase))],
            asks: vec![],
        };

        tracker.observe(&view, now);
        assert_eq!(tracker.next_deadline(), Some(now + Duration::from_millis(500)));
        assert!(!tracker.expire(now + Duration::from_millis(499)));
        assert_eq!(tracker.active(now + Duration::from_millis(499)).len(), 1);
        assert!(tracker.expire(now + Duration::from_millis(500)));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_retrigger_replaces_pending_clearance() {
        let mut tracker = HighlightTracker::new(Duration::from_millis(500));
        let start = Instant::now();
        let grow = BookView {
            bids: vec![level(dec!(100), false, Some(SizeChange::Increase))],
            asks: vec![],
        };
        let shrink = BookView {
            bids: vec![level(dec!(100), false, Some(SizeChange::Decrease))],
            asks: vec![],
        };

        tracker.observe(&grow, start);
        let later = start + Duration::from_millis(400);
        tracker.observe(&shrink, later);

        let lit = tracker.active(start + Duration::from_millis(600));
        assert_eq!(lit.len(), 1);
        assert_eq!(lit[0].tone, Tone::Negative);
        assert_eq!(tracker.next_deadline(), Some(later + Duration::from_millis(500)));
    }

    #[test]
    fn test_unchanged_size_clears_size_highlight_but_not_row() {
        let mut tracker = HighlightTracker::default();
        let now = Instant::now();
        tracker.observe(
            &BookView {
                bids: vec![level(dec!(100), true, Some(SizeChange::Increase))],
                asks: vec![],
            },
            now,
        );

        tracker.observe(
            &BookView {
                bids: vec![level(dec!(100), false, None)],
                asks: vec![],
            },
            now,
        );

        let lit = tracker.active(now);
        assert_eq!(lit.len(), 1);
        assert_eq!(lit[0].target, HighlightTarget::Row);
    }

    #[test]
    fn test_levels_leaving_view_drop_highlights() {
        let mut tracker = HighlightTracker::default();
        let now = Instant::now();
        tracker.observe(
            &BookView {
                bids: vec![level(dec!(100), true, None)],
                asks: vec![],
            },
            now,
        );

        tracker.observe(&BookView::default(), now);
        assert!(tracker.is_empty());
        assert_eq!(tracker.next_deadline(), None);
    }
}
