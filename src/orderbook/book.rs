//! Order book synchronizer
//!
//! Applies snapshots and deltas under strict sequence continuity. Side maps
//! are BTreeMaps so the best levels can be read straight off the ordering.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

use super::{rank, BookView, ChangeMetadata, PriceLevel, Side, SizeChange, MAX_LEVELS};
use crate::error::FeedError;
use crate::parser::{
    parse_level, parse_number, DeltaMessage, DepthMessage, RawLevel, SnapshotMessage, ZERO_SIZE,
};
use crate::websocket::Resync;

/// Synchronization state of the local book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No snapshot applied yet, or state was cleared after a gap
    Uninitialized,
    /// Book reflects everything up to `last_sequence`
    Synced { last_sequence: u64 },
}

/// What handling a message did to the book
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Snapshot { sequence: u64 },
    Delta { sequence: u64 },
    /// Sequence gap: state cleared and a resync requested
    Resync { expected: u64, got: u64 },
    Ignored,
}

impl Applied {
    /// Whether the consumer-facing view changed
    pub fn view_changed(&self) -> bool {
        !matches!(self, Applied::Ignored)
    }
}

/// Sequence-checked order book for a single instrument
pub struct OrderBookSynchronizer<R: Resync> {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    last_sequence: Option<u64>,
    view: BookView,
    resync: R,
}

impl<R: Resync> OrderBookSynchronizer<R> {
    /// Create an empty, uninitialized book
    pub fn new(resync: R) -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_sequence: None,
            view: BookView::default(),
            resync,
        }
    }

    pub fn state(&self) -> SyncState {
        match self.last_sequence {
            Some(last_sequence) => SyncState::Synced { last_sequence },
            None => SyncState::Uninitialized,
        }
    }

    /// Current consumer-facing view
    pub fn view(&self) -> &BookView {
        &self.view
    }

    /// Number of known levels per side (before capping)
    pub fn depth(&self, side: Side) -> usize {
        match side {
            Side::Bid => self.bids.len(),
            Side::Ask => self.asks.len(),
        }
    }

    /// Handle a parsed transport payload.
    ///
    /// Frames without a depth payload and malformed payloads are dropped
    /// without touching state.
    pub fn handle_payload(&mut self, payload: &serde_json::Value) -> Applied {
        match DepthMessage::from_value(payload) {
            Ok(Some(message)) => self.apply(message),
            Ok(None) => Applied::Ignored,
            Err(e) => {
                debug!(error = %e, "Dropping malformed depth message");
                Applied::Ignored
            }
        }
    }

    /// Apply a typed depth message
    pub fn apply(&mut self, message: DepthMessage) -> Applied {
        match message {
            DepthMessage::Snapshot(snapshot) => self.apply_snapshot(&snapshot),
            DepthMessage::Delta(delta) => self.apply_delta(&delta),
        }
    }

    fn apply_snapshot(&mut self, snapshot: &SnapshotMessage) -> Applied {
        self.bids = build_side(&snapshot.bids);
        self.asks = build_side(&snapshot.asks);
        self.last_sequence = Some(snapshot.sequence);
        self.view = BookView {
            bids: rank(best_levels(&self.bids, Side::Bid), Side::Bid, None),
            asks: rank(best_levels(&self.asks, Side::Ask), Side::Ask, None),
        };

        debug!(
            sequence = snapshot.sequence,
            bid_levels = self.bids.len(),
            ask_levels = self.asks.len(),
            "Applied snapshot"
        );
        Applied::Snapshot {
            sequence: snapshot.sequence,
        }
    }

    fn apply_delta(&mut self, delta: &DeltaMessage) -> Applied {
        let Some(last_sequence) = self.last_sequence else {
            debug!(sequence = delta.sequence, "Dropping delta received before snapshot");
            return Applied::Ignored;
        };

        if delta.previous_sequence != last_sequence {
            let mismatch = FeedError::SequenceMismatch {
                expected: last_sequence,
                got: delta.previous_sequence,
            };
            warn!(error = %mismatch, "Out of order update received. Resubscribing...");
            self.reset();
            self.resync.resync();
            return Applied::Resync {
                expected: last_sequence,
                got: delta.previous_sequence,
            };
        }

        let bid_changes = merge_side(&mut self.bids, &delta.bids);
        let ask_changes = merge_side(&mut self.asks, &delta.asks);
        self.last_sequence = Some(delta.sequence);
        self.view = BookView {
            bids: rank(best_levels(&self.bids, Side::Bid), Side::Bid, Some(&bid_changes)),
            asks: rank(best_levels(&self.asks, Side::Ask), Side::Ask, Some(&ask_changes)),
        };

        Applied::Delta {
            sequence: delta.sequence,
        }
    }

    /// Drop all local state; the view empties immediately
    fn reset(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.last_sequence = None;
        self.view = BookView::default();
    }
}

fn build_side(levels: &[RawLevel]) -> BTreeMap<Decimal, Decimal> {
    levels.iter().filter_map(parse_level).collect()
}

/// Merge delta entries into a side, returning the change metadata
fn merge_side(
    side: &mut BTreeMap<Decimal, Decimal>,
    updates: &[RawLevel],
) -> HashMap<Decimal, ChangeMetadata> {
    let mut changes = HashMap::new();

    for (price_text, size_text) in updates {
        let Some(price) = parse_number(price_text) else {
            continue;
        };

        if size_text == ZERO_SIZE {
            side.remove(&price);
            changes.remove(&price);
            continue;
        }

        let Some(size) = parse_number(size_text) else {
            continue;
        };

        match side.insert(price, size) {
            None => {
                changes.insert(price, ChangeMetadata::New);
            }
            Some(previous) if size > previous => {
                changes.insert(price, ChangeMetadata::Resized(SizeChange::Increase));
            }
            Some(previous) if size < previous => {
                changes.insert(price, ChangeMetadata::Resized(SizeChange::Decrease));
            }
            Some(_) => {}
        }
    }

    changes
}

/// Best levels of a side in ranking order
fn best_levels(side: &BTreeMap<Decimal, Decimal>, which: Side) -> Vec<PriceLevel> {
    let levels = side.iter().map(|(price, size)| PriceLevel::new(*price, *size));
    match which {
        Side::Bid => levels.rev().take(MAX_LEVELS).collect(),
        Side::Ask => levels.take(MAX_LEVELS).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::RankedLevel;
    use crate::websocket::MockResync;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tracing::field::{Field, Visit};
    use tracing_subscriber::layer::{Context, Layer};
    use tracing_subscriber::prelude::*;

    /// Collects the message of every WARN event
    #[derive(Clone, Default)]
    struct WarnCapture(Arc<Mutex<Vec<String>>>);

    impl WarnCapture {
        fn messages(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct MessageVisitor<'a>(&'a mut String);

    impl Visit for MessageVisitor<'_> {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                *self.0 = format!("{:?}", value);
            }
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for WarnCapture {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == tracing::Level::WARN {
                let mut message = String::new();
                event.record(&mut MessageVisitor(&mut message));
                self.0.lock().unwrap().push(message);
            }
        }
    }

    fn raw(levels: &[(&str, &str)]) -> Vec<RawLevel> {
        levels
            .iter()
            .map(|(p, s)| (p.to_string(), s.to_string()))
            .collect()
    }

    fn snapshot(sequence: u64, bids: &[(&str, &str)], asks: &[(&str, &str)]) -> DepthMessage {
        DepthMessage::Snapshot(SnapshotMessage {
            sequence,
            bids: raw(bids),
            asks: raw(asks),
        })
    }

    fn delta(
        sequence: u64,
        previous_sequence: u64,
        bids: &[(&str, &str)],
        asks: &[(&str, &str)],
    ) -> DepthMessage {
        DepthMessage::Delta(DeltaMessage {
            sequence,
            previous_sequence,
            bids: raw(bids),
            asks: raw(asks),
        })
    }

    fn quiet() -> MockResync {
        let mut resync = MockResync::new();
        resync.expect_resync().never();
        resync
    }

    fn prices(levels: &[RankedLevel]) -> Vec<Decimal> {
        levels.iter().map(|level| level.price).collect()
    }

    #[test]
    fn test_starts_uninitialized_and_empty() {
        let book = OrderBookSynchronizer::new(quiet());
        assert_eq!(book.state(), SyncState::Uninitialized);
        assert!(book.view().is_empty());
    }

    #[test]
    fn test_snapshot_enforces_level_cap() {
        let mut book = OrderBookSynchronizer::new(quiet());
        let bids: Vec<(String, String)> = (0..10)
            .map(|i| ((110 - i).to_string(), (i + 1).to_string()))
            .collect();
        let bid_refs: Vec<(&str, &str)> = bids.iter().map(|(p, s)| (p.as_str(), s.as_str())).collect();

        let applied = book.apply(snapshot(10, &bid_refs, &[("200", "1"), ("201", "2")]));

        assert_eq!(applied, Applied::Snapshot { sequence: 10 });
        assert_eq!(book.state(), SyncState::Synced { last_sequence: 10 });
        let view = book.view();
        assert_eq!(view.bids.len(), MAX_LEVELS);
        assert_eq!(view.bids[0].price, dec!(110));
        assert_eq!(view.bids.last().map(|l| l.price), Some(dec!(103)));
        assert_eq!(view.asks.len(), 2);
        assert_eq!(view.asks[0].price, dec!(201));
        assert_eq!(book.depth(Side::Bid), 10);
    }

    #[test]
    fn test_snapshot_replaces_prior_state() {
        let mut book = OrderBookSynchronizer::new(quiet());
        book.apply(snapshot(1, &[("50", "1"), ("49", "1")], &[("51", "1")]));
        book.apply(snapshot(7, &[("100", "1"), ("101", "2")], &[("105", "3"), ("104", "4")]));

        let view = book.view();
        assert_eq!(prices(&view.bids), vec![dec!(101), dec!(100)]);
        assert_eq!(prices(&view.asks), vec![dec!(105), dec!(104)]);
        assert!(view.bids.iter().all(|l| !l.is_new && l.size_change.is_none()));
        assert_eq!(book.state(), SyncState::Synced { last_sequence: 7 });
    }

    #[test]
    fn test_snapshot_skips_non_numeric_levels() {
        let mut book = OrderBookSynchronizer::new(quiet());
        book.apply(snapshot(
            1,
            &[("abc", "1"), ("100", "2"), ("99", "NaN")],
            &[("101", "1")],
        ));

        assert_eq!(prices(&book.view().bids), vec![dec!(100)]);
    }

    #[test]
    fn test_delta_merges_both_sides() {
        let mut book = OrderBookSynchronizer::new(quiet());
        book.apply(snapshot(
            1,
            &[("100", "1"), ("99", "1")],
            &[("101", "1"), ("102", "1")],
        ));

        let applied = book.apply(delta(
            2,
            1,
            &[("100", "2"), ("98", "1")],
            &[("101", "0"), ("103", "3")],
        ));

        assert_eq!(applied, Applied::Delta { sequence: 2 });
        let view = book.view();
        assert_eq!(prices(&view.bids), vec![dec!(100), dec!(99), dec!(98)]);
        assert_eq!(view.bids[0].size_change, Some(SizeChange::Increase));
        assert!(view.bids[2].is_new);
        assert_eq!(prices(&view.asks), vec![dec!(103), dec!(102)]);
        assert!(view.asks[0].is_new);
        assert_eq!(book.state(), SyncState::Synced { last_sequence: 2 });
    }

    #[test]
    fn test_delta_metadata_lasts_one_cycle() {
        let mut book = OrderBookSynchronizer::new(quiet());
        book.apply(snapshot(1, &[("101", "1"), ("100", "1")], &[("102", "1"), ("103", "1")]));

        book.apply(delta(
            2,
            1,
            &[("104", "2"), ("101", "3"), ("100", "0")],
            &[("103", "0.5")],
        ));
        let view = book.view();
        assert_eq!(prices(&view.bids), vec![dec!(104), dec!(101)]);
        assert!(view.bids[0].is_new);
        assert_eq!(view.bids[1].size_change, Some(SizeChange::Increase));
        assert_eq!(view.asks[0].size_change, Some(SizeChange::Decrease));

        book.apply(delta(3, 2, &[], &[]));
        let view = book.view();
        assert!(view
            .bids
            .iter()
            .chain(view.asks.iter())
            .all(|l| !l.is_new && l.size_change.is_none()));
    }

    #[test]
    fn test_delta_unchanged_size_has_no_metadata() {
        let mut book = OrderBookSynchronizer::new(quiet());
        book.apply(snapshot(1, &[("100", "1")], &[]));
        book.apply(delta(2, 1, &[("100", "1.0")], &[]));

        let level = &book.view().bids[0];
        assert!(!level.is_new);
        assert_eq!(level.size_change, None);
    }

    #[test]
    fn test_delta_new_then_removed_in_same_batch_leaves_no_trace() {
        let mut book = OrderBookSynchronizer::new(quiet());
        book.apply(snapshot(1, &[("100", "1")], &[]));
        book.apply(delta(2, 1, &[("98", "1"), ("98", "0")], &[]));

        assert_eq!(prices(&book.view().bids), vec![dec!(100)]);
        assert_eq!(book.depth(Side::Bid), 1);
    }

    #[test]
    fn test_delta_skips_non_numeric_entries() {
        let mut book = OrderBookSynchronizer::new(quiet());
        book.apply(snapshot(1, &[("100", "1")], &[]));
        book.apply(delta(2, 1, &[("abc", "1"), ("100", "oops"), ("99", "2")], &[]));

        let view = book.view();
        assert_eq!(prices(&view.bids), vec![dec!(100), dec!(99)]);
        assert_eq!(view.bids[0].size, dec!(1));
    }

    #[test]
    fn test_sequence_gap_clears_and_resyncs_once() {
        let mut resync = MockResync::new();
        resync.expect_resync().times(1).return_const(());
        let mut book = OrderBookSynchronizer::new(resync);
        book.apply(snapshot(5, &[("100", "1")], &[("101", "1")]));

        let applied = book.apply(delta(6, 99, &[("100", "2")], &[]));

        assert_eq!(applied, Applied::Resync { expected: 5, got: 99 });
        assert!(book.view().is_empty());
        assert_eq!(book.state(), SyncState::Uninitialized);
        assert_eq!(book.depth(Side::Bid), 0);
        assert_eq!(book.depth(Side::Ask), 0);
    }

    #[test]
    fn test_gap_warning_logged_once_per_occurrence() {
        let capture = WarnCapture::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let mut resync = MockResync::new();
        resync.expect_resync().times(2).return_const(());
        let mut book = OrderBookSynchronizer::new(resync);

        tracing::subscriber::with_default(subscriber, || {
            book.apply(snapshot(5, &[("100", "1")], &[("101", "1")]));
            book.apply(delta(6, 99, &[("100", "2")], &[]));
            // Dropped while waiting for the next snapshot, no second warning.
            book.apply(delta(7, 6, &[("100", "3")], &[]));
            assert_eq!(capture.messages().len(), 1);

            book.apply(snapshot(10, &[("100", "1")], &[]));
            book.apply(delta(12, 11, &[], &[]));
        });

        let messages = capture.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages
            .iter()
            .all(|m| m == "Out of order update received. Resubscribing..."));
    }

    #[test]
    fn test_huge_sizes_do_not_panic() {
        let mut book = OrderBookSynchronizer::new(quiet());
        let payload = json!({
            "data": {
                "type": "snapshot",
                "seqNum": 1,
                "bids": [["100", "50000000000000000000000000000"], ["99", "5e28"]],
                "asks": []
            }
        });

        assert_eq!(book.handle_payload(&payload), Applied::Snapshot { sequence: 1 });
        assert_eq!(book.view().bids.len(), 2);
        assert_eq!(book.view().bids[1].cumulative, Decimal::MAX);
        assert_eq!(book.view().bids[1].cumulative_percentage, dec!(100));
    }

    #[test]
    fn test_deltas_after_gap_wait_for_snapshot() {
        let mut resync = MockResync::new();
        resync.expect_resync().times(1).return_const(());
        let mut book = OrderBookSynchronizer::new(resync);
        book.apply(snapshot(5, &[("100", "1")], &[]));
        book.apply(delta(7, 6, &[], &[]));

        assert_eq!(book.apply(delta(8, 7, &[("100", "3")], &[])), Applied::Ignored);
        assert!(book.view().is_empty());

        book.apply(snapshot(20, &[("100", "3")], &[]));
        assert_eq!(book.apply(delta(21, 20, &[("99", "1")], &[])), Applied::Delta { sequence: 21 });
        assert_eq!(prices(&book.view().bids), vec![dec!(100), dec!(99)]);
    }

    #[test]
    fn test_delta_before_snapshot_is_ignored() {
        let mut book = OrderBookSynchronizer::new(quiet());
        assert_eq!(book.apply(delta(2, 1, &[("100", "1")], &[])), Applied::Ignored);
        assert_eq!(book.state(), SyncState::Uninitialized);
        assert!(book.view().is_empty());
    }

    #[test]
    fn test_handle_payload_drops_malformed_sequence() {
        let mut book = OrderBookSynchronizer::new(quiet());
        book.apply(snapshot(1, &[("100", "1")], &[]));

        let malformed = json!({
            "data": { "type": "delta", "seqNum": "x", "prevSeqNum": 42, "bids": [["100", "0"]], "asks": [] }
        });
        assert_eq!(book.handle_payload(&malformed), Applied::Ignored);
        assert_eq!(book.state(), SyncState::Synced { last_sequence: 1 });
        assert_eq!(prices(&book.view().bids), vec![dec!(100)]);
    }

    #[test]
    fn test_handle_payload_applies_wire_messages() {
        let mut book = OrderBookSynchronizer::new(quiet());
        let snapshot = json!({
            "topic": "update:BTCPFC",
            "data": { "type": "snapshot", "seqNum": 1, "bids": [["100", "1"]], "asks": [["101", "1"]] }
        });
        let ack = json!({ "event": "subscribe", "channel": ["update:BTCPFC"] });

        assert_eq!(book.handle_payload(&ack), Applied::Ignored);
        assert_eq!(book.handle_payload(&snapshot), Applied::Snapshot { sequence: 1 });
        assert_eq!(book.view().best_bid().map(|l| l.price), Some(dec!(100)));
        assert_eq!(book.view().best_ask().map(|l| l.price), Some(dec!(101)));
    }
}
