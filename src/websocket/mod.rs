//! WebSocket module for push-feed subscriptions
//!
//! One [`Subscription`] per channel: connect, subscribe, forward parsed
//! payloads to the current handler, reconnect on disconnect.

mod client;
mod manager;

pub use client::WebSocketClient;
pub use manager::{Subscription, SubscriptionConfig, DEFAULT_RECONNECT_DELAY};

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

/// Capability to force a full reconnect and resubscribe
#[cfg_attr(test, mockall::automock)]
pub trait Resync: Send {
    fn resync(&self);
}

/// Cloneable handle requesting a resync of the live connection.
///
/// Requests coalesce: any number of calls before the transport reacts
/// produce a single reconnect.
#[derive(Debug, Clone, Default)]
pub struct ResyncHandle {
    notify: Arc<Notify>,
}

impl ResyncHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn requested(&self) {
        self.notify.notified().await
    }
}

impl Resync for ResyncHandle {
    fn resync(&self) {
        self.notify.notify_one();
    }
}

/// Receives every parsed payload of a subscription
pub trait MessageHandler: Send + 'static {
    fn on_message(&mut self, payload: serde_json::Value);
}

impl<F> MessageHandler for F
where
    F: FnMut(serde_json::Value) + Send + 'static,
{
    fn on_message(&mut self, payload: serde_json::Value) {
        self(payload)
    }
}

/// Slot holding the current handler; the transport reads it at delivery time
#[derive(Clone)]
pub(crate) struct HandlerSlot {
    inner: Arc<Mutex<Box<dyn MessageHandler>>>,
}

impl HandlerSlot {
    pub(crate) fn new(handler: Box<dyn MessageHandler>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(handler)),
        }
    }

    pub(crate) fn replace(&self, handler: Box<dyn MessageHandler>) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    pub(crate) fn deliver(&self, payload: serde_json::Value) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .on_message(payload);
    }
}
