//! Publisher module for IPC communication
//!
//! Publishes the book and trade views to out-of-process consumers.

use serde::Serialize;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{FeedError, Result};
use crate::orderbook::{BookView, Highlight};
use crate::trades::TradeView;

/// Frame written to the IPC socket
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Publication<'a> {
    Book {
        symbol: &'a str,
        timestamp: i64,
        view: &'a BookView,
        highlights: &'a [Highlight],
    },
    Trade {
        symbol: &'a str,
        timestamp: i64,
        view: &'a TradeView,
    },
}

impl Publication<'_> {
    fn label(&self) -> &'static str {
        match self {
            Publication::Book { .. } => "book",
            Publication::Trade { .. } => "trade",
        }
    }
}

/// Publisher for sending views via Unix socket
pub struct Publisher {
    socket_path: String,
    stream: Mutex<Option<UnixStream>>,
}

impl Publisher {
    /// Create a new publisher
    pub async fn new(socket_path: &str) -> Result<Self> {
        let publisher = Self {
            socket_path: socket_path.to_string(),
            stream: Mutex::new(None),
        };

        // Consumer may not be listening yet
        if let Err(e) = publisher.connect().await {
            warn!(error = %e, "Initial IPC connection failed, will retry on publish");
        }

        Ok(publisher)
    }

    /// Connect to the Unix socket
    async fn connect(&self) -> Result<()> {
        let path = Path::new(&self.socket_path);

        if !path.exists() {
            return Err(FeedError::IpcError(format!(
                "Socket path does not exist: {}",
                self.socket_path
            )));
        }

        let stream = UnixStream::connect(path).await.map_err(|e| {
            FeedError::IpcError(format!("Failed to connect to {}: {}", self.socket_path, e))
        })?;

        let mut guard = self.stream.lock().await;
        *guard = Some(stream);

        info!(path = %self.socket_path, "Connected to IPC socket");
        Ok(())
    }

    /// Encode a publication as a length-prefixed MessagePack frame
    pub fn encode(publication: &Publication<'_>) -> Result<Vec<u8>> {
        let data = rmp_serde::to_vec_named(publication)?;

        let len = (data.len() as u32).to_be_bytes();
        let mut message = Vec::with_capacity(4 + data.len());
        message.extend_from_slice(&len);
        message.extend_from_slice(&data);
        Ok(message)
    }

    /// Publish a view; delivery failures are logged, never returned
    pub async fn publish(&self, publication: &Publication<'_>) -> Result<()> {
        let message = Self::encode(publication)?;

        let mut guard = self.stream.lock().await;

        if guard.is_none() {
            drop(guard);
            if let Err(e) = self.connect().await {
                debug!(error = %e, "Failed to reconnect to IPC socket");
                return Ok(());
            }
            guard = self.stream.lock().await;
        }

        if let Some(stream) = guard.as_mut() {
            match stream.write_all(&message).await {
                Ok(_) => {
                    debug!(kind = publication.label(), bytes = message.len(), "Published view");
                }
                Err(e) => {
                    warn!(error = %e, "Failed to write to IPC socket");
                    *guard = None;
                }
            }
        }

        Ok(())
    }
}
