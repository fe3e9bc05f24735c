//! Last trade price and direction

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::parser::{first_trade_print, TradePrint};

/// Direction of the last print against the one before it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    #[default]
    Neutral,
}

/// Consumer-facing trade view
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeView {
    pub last_price: Option<Decimal>,
    pub direction: Direction,
}

/// Reduces trade prints to a last price and its direction
#[derive(Debug, Default)]
pub struct LastPriceTracker {
    previous: Option<Decimal>,
    view: TradeView,
}

impl LastPriceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> &TradeView {
        &self.view
    }

    /// Handle a parsed trade channel payload; returns the new view if it changed
    pub fn handle_payload(&mut self, payload: &serde_json::Value) -> Option<&TradeView> {
        match first_trade_print(payload) {
            Ok(Some(print)) => self.observe(&print),
            Ok(None) => None,
            Err(e) => {
                debug!(error = %e, "Dropping malformed trade message");
                None
            }
        }
    }

    /// Consider the leading print of a batch
    pub fn observe(&mut self, print: &TradePrint) -> Option<&TradeView> {
        let price = print.price;

        let direction = match self.previous {
            Some(previous) if price > previous => Direction::Up,
            Some(previous) if price < previous => Direction::Down,
            _ => Direction::Neutral,
        };

        trace!(price = %price, side = ?print.side, direction = ?direction, "Trade received");
        self.previous = Some(price);
        self.view = TradeView {
            last_price: Some(price),
            direction,
        };
        Some(&self.view)
    }
}
