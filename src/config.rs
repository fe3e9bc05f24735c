//! Configuration module for the depth feed

use serde::Deserialize;
use std::env;
use std::time::Duration;

const DEFAULT_SYMBOL: &str = "BTCPFC";
const DEFAULT_DEPTH_ENDPOINT: &str = "wss://ws.btse.com/ws/oss/futures";
const DEFAULT_TRADE_ENDPOINT: &str = "wss://ws.btse.com/ws/futures";
const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
const DEFAULT_FLASH_DURATION_MS: u64 = 500;
const DEFAULT_HEALTH_PORT: u16 = 9090;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Instrument to follow (e.g., "BTCPFC")
    pub symbol: String,

    /// WebSocket endpoint carrying the depth channel
    pub depth_endpoint: String,

    /// WebSocket endpoint carrying the trade channel
    pub trade_endpoint: String,

    /// Delay before reconnecting after an unsolicited disconnect
    pub reconnect_delay_ms: u64,

    /// How long a level highlight stays lit
    pub flash_duration_ms: u64,

    /// IPC socket path for publishing views; disabled when unset
    pub ipc_socket_path: Option<String>,

    /// Port of the health/metrics HTTP server
    pub health_port: u16,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let symbol = env::var("SYMBOL")
            .map(|s| s.trim().to_uppercase())
            .unwrap_or_else(|_| DEFAULT_SYMBOL.to_string());
        if symbol.is_empty() {
            anyhow::bail!("SYMBOL must not be empty");
        }

        Ok(Self {
            symbol,
            depth_endpoint: env::var("DEPTH_WS_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_DEPTH_ENDPOINT.to_string()),
            trade_endpoint: env::var("TRADE_WS_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_TRADE_ENDPOINT.to_string()),
            reconnect_delay_ms: parse_or("RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY_MS),
            flash_duration_ms: parse_or("FLASH_DURATION_MS", DEFAULT_FLASH_DURATION_MS),
            ipc_socket_path: env::var("IPC_SOCKET_PATH")
                .ok()
                .filter(|path| !path.trim().is_empty()),
            health_port: parse_or("HEALTH_PORT", DEFAULT_HEALTH_PORT),
        })
    }

    /// Topic of the depth channel
    pub fn depth_topic(&self) -> String {
        format!("update:{}", self.symbol)
    }

    /// Topic of the trade channel
    pub fn trade_topic(&self) -> String {
        format!("tradeHistoryApi:{}", self.symbol)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn flash_duration(&self) -> Duration {
        Duration::from_millis(self.flash_duration_ms)
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbol: DEFAULT_SYMBOL.to_string(),
            depth_endpoint: DEFAULT_DEPTH_ENDPOINT.to_string(),
            trade_endpoint: DEFAULT_TRADE_ENDPOINT.to_string(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            flash_duration_ms: DEFAULT_FLASH_DURATION_MS,
            ipc_socket_path: None,
            health_port: DEFAULT_HEALTH_PORT,
        }
    }
}
