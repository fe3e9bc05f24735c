//! Depth Feed Library
//!
//! This crate subscribes to a push feed of depth updates for one instrument,
//! keeps a sequence-checked local order book, and derives the ranked
//! best-eight depth view plus the last trade direction.

use std::sync::Arc;
use tokio::sync::watch;

pub mod config;
pub mod error;
pub mod metrics;
pub mod orderbook;
pub mod parser;
pub mod publisher;
pub mod trades;
pub mod websocket;

pub use config::Config;
pub use error::{FeedError, Result};
pub use metrics::FeedMetrics;
pub use orderbook::{
    rank, Applied, BookView, HighlightTracker, OrderBookSynchronizer, RankedLevel, Side, SyncState,
};
pub use parser::{DeltaMessage, DepthMessage, SnapshotMessage, TradePrint};
pub use publisher::Publisher;
pub use trades::{Direction, LastPriceTracker, TradeView};
pub use websocket::{Resync, ResyncHandle, Subscription, SubscriptionConfig};

/// Application state shared across components
pub struct AppState {
    pub config: Arc<Config>,
    pub metrics: FeedMetrics,
    pub book: watch::Receiver<BookView>,
    pub trades: watch::Receiver<TradeView>,
    pub depth_connected: watch::Receiver<bool>,
    pub trade_connected: watch::Receiver<bool>,
}
