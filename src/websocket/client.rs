//! WebSocket client for a single push-feed connection
//!
//! Handles connection, topic subscription, and frame reception.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::error::{FeedError, Result};
use crate::parser::SubscribeRequest;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket client for a single connection
pub struct WebSocketClient {
    stream: Option<WsStream>,
    endpoint: String,
    topic: String,
}

impl WebSocketClient {
    /// Create a new WebSocket client
    pub fn new(endpoint: &str, topic: &str) -> Self {
        Self {
            stream: None,
            endpoint: endpoint.to_string(),
            topic: topic.to_string(),
        }
    }

    /// Connect to the endpoint and subscribe to the topic.
    ///
    /// A failed subscribe send is logged; the connection stays up.
    pub async fn connect(&mut self) -> Result<()> {
        info!(url = %self.endpoint, topic = %self.topic, "Connecting to WebSocket");

        let (ws_stream, response) = connect_async(self.endpoint.as_str()).await.map_err(|e| {
            FeedError::WebSocketConnection(format!("Failed to connect: {}", e))
        })?;

        info!(status = ?response.status(), topic = %self.topic, "WebSocket connected");
        self.stream = Some(ws_stream);

        if let Err(e) = self.subscribe().await {
            warn!(error = %e, topic = %self.topic, "Failed to send subscribe payload");
        }

        Ok(())
    }

    async fn subscribe(&mut self) -> Result<()> {
        let request = serde_json::to_string(&SubscribeRequest::new(&self.topic))?;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| FeedError::WebSocketConnection("Not connected".to_string()))?;

        stream
            .send(Message::Text(request))
            .await
            .map_err(|e| FeedError::WebSocketMessage(e.to_string()))
    }

    /// Receive the next text frame
    pub async fn recv(&mut self) -> Result<Option<String>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| FeedError::WebSocketConnection("Not connected".to_string()))?;

        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!(len = text.len(), "Received text message");
                Ok(Some(text))
            }
            Some(Ok(Message::Binary(data))) => {
                let text = String::from_utf8_lossy(&data).to_string();
                Ok(Some(text))
            }
            Some(Ok(Message::Ping(data))) => {
                debug!("Received ping, sending pong");
                if let Some(stream) = self.stream.as_mut() {
                    let _ = stream.send(Message::Pong(data)).await;
                }
                Ok(None)
            }
            Some(Ok(Message::Pong(_))) => {
                debug!("Received pong");
                Ok(None)
            }
            Some(Ok(Message::Close(frame))) => {
                warn!(frame = ?frame, topic = %self.topic, "Received close frame");
                self.stream = None;
                Err(FeedError::WebSocketConnection(
                    "Connection closed".to_string(),
                ))
            }
            Some(Ok(Message::Frame(_))) => Ok(None),
            Some(Err(e)) => {
                error!(error = %e, topic = %self.topic, "WebSocket error");
                self.stream = None;
                Err(FeedError::WebSocketMessage(e.to_string()))
            }
            None => {
                warn!(topic = %self.topic, "WebSocket stream ended");
                self.stream = None;
                Err(FeedError::WebSocketConnection(
                    "Stream ended".to_string(),
                ))
            }
        }
    }

    /// Close the connection
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}
