//! Subscription lifecycle
//!
//! Owns the reconnect loop for one channel. Every frame, resync request and
//! reconnect timer of a channel is handled by a single task, so messages
//! reach the handler strictly in arrival order.

use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::{HandlerSlot, MessageHandler, Resync, ResyncHandle, WebSocketClient};

/// Delay before reconnecting after an unsolicited disconnect
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5_000);

/// Where and what to subscribe to
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub endpoint: String,
    pub topic: String,
    pub reconnect_delay: Duration,
}

impl SubscriptionConfig {
    pub fn new(endpoint: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            topic: topic.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

/// Why a live connection ended
enum Disconnect {
    Shutdown,
    Resync,
    Dropped,
}

/// Live subscription to one topic.
///
/// Dropping the subscription tears the connection down without scheduling a
/// reconnect; [`Subscription::close`] does the same and waits for it.
pub struct Subscription {
    topic: String,
    handler: HandlerSlot,
    resync: ResyncHandle,
    connected: watch::Receiver<bool>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Open a subscription; the first connect is attempted immediately.
    ///
    /// `resync` is the handle consumers use to force a reconnect; create it
    /// up front so the handler can hold a clone.
    pub fn open<H>(config: SubscriptionConfig, resync: ResyncHandle, handler: H) -> Self
    where
        H: MessageHandler,
    {
        let handler = HandlerSlot::new(Box::new(handler));
        let (connected_tx, connected) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let worker = Worker {
            config: config.clone(),
            handler: handler.clone(),
            resync: resync.clone(),
            connected: connected_tx,
        };
        let task = tokio::spawn(worker.run(shutdown_rx));

        Self {
            topic: config.topic,
            handler,
            resync,
            connected,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Watch the connection flag
    pub fn connected(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    /// Close the live connection and reconnect immediately, or connect now
    /// if no connection exists yet
    pub fn resync(&self) {
        self.resync.resync();
    }

    /// Handle that forces a reconnect of this subscription
    pub fn resync_handle(&self) -> ResyncHandle {
        self.resync.clone()
    }

    /// Swap the handler; frames not yet delivered go to the new one
    pub fn set_handler<H>(&self, handler: H)
    where
        H: MessageHandler,
    {
        self.handler.replace(Box::new(handler));
    }

    /// Tear down: cancel any pending reconnect and close the connection
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, topic = %self.topic, "Subscription task failed");
            }
        }
    }
}

struct Worker {
    config: SubscriptionConfig,
    handler: HandlerSlot,
    resync: ResyncHandle,
    connected: watch::Sender<bool>,
}

impl Worker {
    async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        let topic = self.config.topic.clone();
        info!(topic = %topic, "Starting subscription");

        // Exactly one pending reconnect at a time: the wait below. A resync
        // request cuts it short.
        let mut delay = Duration::ZERO;

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = self.resync.requested() => {
                    debug!(topic = %topic, "Resync requested while disconnected, connecting now");
                }
                _ = sleep(delay) => {}
            }

            let mut client = WebSocketClient::new(&self.config.endpoint, &topic);
            let attempt = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                result = client.connect() => result,
            };

            if let Err(e) = attempt {
                error!(error = %e, topic = %topic, "WebSocket connect failed");
                delay = self.config.reconnect_delay;
                warn!(
                    topic = %topic,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting after error..."
                );
                continue;
            }

            self.connected.send_replace(true);
            let reason = self.pump(&mut client, &mut shutdown).await;
            self.connected.send_replace(false);
            client.close().await;

            match reason {
                Disconnect::Shutdown => break,
                Disconnect::Resync => {
                    info!(topic = %topic, "Reconnecting immediately for resync");
                    delay = Duration::ZERO;
                }
                Disconnect::Dropped => {
                    delay = self.config.reconnect_delay;
                    warn!(
                        topic = %topic,
                        delay_ms = delay.as_millis() as u64,
                        "Connection lost, reconnecting..."
                    );
                }
            }
        }

        self.connected.send_replace(false);
        info!(topic = %topic, "Subscription closed");
    }

    /// Forward frames until the connection ends
    async fn pump(
        &self,
        client: &mut WebSocketClient,
        shutdown: &mut oneshot::Receiver<()>,
    ) -> Disconnect {
        loop {
            tokio::select! {
                biased;
                _ = &mut *shutdown => return Disconnect::Shutdown,
                _ = self.resync.requested() => return Disconnect::Resync,
                frame = client.recv() => match frame {
                    Ok(Some(text)) => self.dispatch(&text),
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(error = %e, topic = %self.config.topic, "WebSocket disconnected");
                        return Disconnect::Dropped;
                    }
                },
            }
        }
    }

    fn dispatch(&self, text: &str) {
        let payload: serde_json::Value = match serde_json::from_str(text) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, topic = %self.config.topic, "WebSocket message parse error");
                return;
            }
        };

        if payload.is_null() {
            return;
        }

        self.handler.deliver(payload);
    }
}
