//! Parser module for push-feed messages
//!
//! Handles the subscribe frame, the depth channel (snapshot / delta) and the
//! trade channel payloads.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Wire literal marking a level removal inside a delta
pub const ZERO_SIZE: &str = "0";

/// Client to server subscription request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub op: String,
    pub args: Vec<String>,
}

impl SubscribeRequest {
    pub fn new(topic: &str) -> Self {
        Self {
            op: "subscribe".to_string(),
            args: vec![topic.to_string()],
        }
    }
}

/// Envelope wrapping every inbound payload
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    /// Topic the payload belongs to, when the venue echoes it
    #[serde(default)]
    pub topic: Option<String>,

    /// Data payload; absent on acknowledgements and heartbeats
    pub data: Option<T>,
}

/// Raw `[priceText, sizeText]` pair as received on the wire
pub type RawLevel = (String, String);

/// Full replacement of both sides of the book
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotMessage {
    #[serde(rename = "seqNum")]
    pub sequence: u64,

    #[serde(default)]
    pub bids: Vec<RawLevel>,

    #[serde(default)]
    pub asks: Vec<RawLevel>,
}

/// Incremental update chained to the previous sequence number
#[derive(Debug, Clone, Deserialize)]
pub struct DeltaMessage {
    #[serde(rename = "seqNum")]
    pub sequence: u64,

    #[serde(rename = "prevSeqNum")]
    pub previous_sequence: u64,

    #[serde(default)]
    pub bids: Vec<RawLevel>,

    #[serde(default)]
    pub asks: Vec<RawLevel>,
}

/// Depth channel payload
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DepthMessage {
    Snapshot(SnapshotMessage),
    Delta(DeltaMessage),
}

impl DepthMessage {
    /// Extract a depth message from a parsed frame.
    ///
    /// Returns `None` for frames without a payload (acks, heartbeats) and an
    /// error when the payload is malformed.
    pub fn from_value(value: &serde_json::Value) -> Result<Option<Self>, serde_json::Error> {
        let envelope: Envelope<DepthMessage> = serde_json::from_value(value.clone())?;
        Ok(envelope.data)
    }
}

/// Aggressor side of a trade print
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// A single trade print
#[derive(Debug, Clone, Deserialize)]
pub struct TradePrint {
    pub price: Decimal,
    pub side: TradeSide,
}

/// Extract the leading print of a trade channel batch.
///
/// Only element 0 is decoded; the rest of the batch is never inspected.
pub fn first_trade_print(
    value: &serde_json::Value,
) -> Result<Option<TradePrint>, serde_json::Error> {
    match value.get("data").and_then(|data| data.get(0)) {
        Some(print) => TradePrint::deserialize(print).map(Some),
        None => Ok(None),
    }
}

/// Parse numeric wire text; `None` stands for anything that is not a finite number
pub fn parse_number(text: &str) -> Option<Decimal> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .ok()
}

/// Parse a raw level into numeric price and size
pub fn parse_level((price, size): &RawLevel) -> Option<(Decimal, Decimal)> {
    Some((parse_number(price)?, parse_number(size)?))
}
