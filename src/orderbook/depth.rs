//! Depth aggregation
//!
//! Turns an unordered set of levels into the capped, cumulative view.

use rust_decimal::Decimal;
use std::collections::HashMap;

use super::{ChangeMetadata, PriceLevel, RankedLevel, Side};

/// Maximum displayed levels per side
pub const MAX_LEVELS: usize = 8;

/// Rank levels for one side of the book.
///
/// Keeps the best [`MAX_LEVELS`] prices (highest bids, lowest asks), computes
/// running depth against the total of the retained levels and attaches
/// metadata for retained prices only. Ask output is reversed so it reads
/// worst to best.
pub fn rank<I>(
    levels: I,
    side: Side,
    metadata: Option<&HashMap<Decimal, ChangeMetadata>>,
) -> Vec<RankedLevel>
where
    I: IntoIterator<Item = PriceLevel>,
{
    let mut sorted: Vec<PriceLevel> = levels.into_iter().collect();
    if side.is_descending() {
        sorted.sort_by(|a, b| b.price.cmp(&a.price));
    } else {
        sorted.sort_by(|a, b| a.price.cmp(&b.price));
    }
    sorted.dedup_by_key(|level| level.price);
    sorted.truncate(MAX_LEVELS);

    // Sizes near the Decimal range saturate instead of overflowing.
    let total = sorted
        .iter()
        .fold(Decimal::ZERO, |total, level| total.saturating_add(level.size));
    let mut cumulative = Decimal::ZERO;

    let mut ranked: Vec<RankedLevel> = sorted
        .into_iter()
        .map(|level| {
            cumulative = cumulative.saturating_add(level.size);
            let cumulative_percentage = if total.is_zero() {
                Decimal::ZERO
            } else {
                cumulative / total * Decimal::ONE_HUNDRED
            };

            let mut ranked = RankedLevel {
                price: level.price,
                size: level.size,
                cumulative,
                cumulative_percentage,
                is_new: false,
                size_change: None,
            };
            if let Some(meta) = metadata.and_then(|m| m.get(&level.price)) {
                ranked.annotate(*meta);
            }
            ranked
        })
        .collect();

    if !side.is_descending() {
        ranked.reverse();
    }
    ranked
}
