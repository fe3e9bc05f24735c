//! Prometheus counters for the feed

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::Result;
use crate::orderbook::Applied;

/// Feed counters, registered in a dedicated registry
#[derive(Clone)]
pub struct FeedMetrics {
    registry: Registry,
    messages: IntCounterVec,
    depth_updates: IntCounterVec,
    trade_prints: IntCounter,
}

impl FeedMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let messages = IntCounterVec::new(
            Opts::new("depth_feed_messages_total", "Payloads delivered per channel"),
            &["channel"],
        )?;
        let depth_updates = IntCounterVec::new(
            Opts::new(
                "depth_feed_book_updates_total",
                "Depth messages by how they were applied",
            ),
            &["outcome"],
        )?;
        let trade_prints = IntCounter::new(
            "depth_feed_trade_prints_total",
            "Trade batches that moved the last price",
        )?;

        registry.register(Box::new(messages.clone()))?;
        registry.register(Box::new(depth_updates.clone()))?;
        registry.register(Box::new(trade_prints.clone()))?;

        Ok(Self {
            registry,
            messages,
            depth_updates,
            trade_prints,
        })
    }

    pub fn record_message(&self, channel: &str) {
        self.messages.with_label_values(&[channel]).inc();
    }

    pub fn record_depth(&self, applied: &Applied) {
        let outcome = match applied {
            Applied::Snapshot { .. } => "snapshot",
            Applied::Delta { .. } => "delta",
            Applied::Resync { .. } => "resync",
            Applied::Ignored => "ignored",
        };
        self.depth_updates.with_label_values(&[outcome]).inc();
    }

    pub fn record_trade(&self) {
        self.trade_prints.inc();
    }

    /// Text exposition of every registered metric
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
