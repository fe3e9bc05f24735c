//! Depth Feed - order book synchronizer service
//!
//! Subscribes to the depth and trade channels of one instrument, maintains the
//! sequence-checked book, and exposes the ranked view to other components.

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, sleep_until, Instant};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use depth_feed::publisher::Publication;
use depth_feed::{
    AppState, BookView, Config, FeedMetrics, HighlightTracker, LastPriceTracker,
    OrderBookSynchronizer, Publisher, ResyncHandle, Subscription, SubscriptionConfig, TradeView,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting Depth Feed");

    // Load configuration
    let config = Arc::new(Config::load()?);
    info!(
        symbol = %config.symbol,
        depth_endpoint = %config.depth_endpoint,
        trade_endpoint = %config.trade_endpoint,
        "Configuration loaded"
    );

    let metrics = FeedMetrics::new()?;
    let (book_tx, book_rx) = watch::channel(BookView::default());
    let (trade_tx, trade_rx) = watch::channel(TradeView::default());

    // Depth channel: the synchronizer holds the resync handle of its own subscription
    let depth_resync = ResyncHandle::new();
    let mut book = OrderBookSynchronizer::new(depth_resync.clone());
    let depth_metrics = metrics.clone();
    let depth = Subscription::open(
        SubscriptionConfig::new(&config.depth_endpoint, config.depth_topic())
            .with_reconnect_delay(config.reconnect_delay()),
        depth_resync,
        move |payload: serde_json::Value| {
            depth_metrics.record_message("depth");
            let applied = book.handle_payload(&payload);
            depth_metrics.record_depth(&applied);
            if applied.view_changed() {
                book_tx.send_replace(book.view().clone());
            }
        },
    );

    // Trade channel
    let mut last_price = LastPriceTracker::new();
    let trade_metrics = metrics.clone();
    let trades = Subscription::open(
        SubscriptionConfig::new(&config.trade_endpoint, config.trade_topic())
            .with_reconnect_delay(config.reconnect_delay()),
        ResyncHandle::new(),
        move |payload: serde_json::Value| {
            trade_metrics.record_message("trade");
            if let Some(view) = last_price.handle_payload(&payload) {
                trade_metrics.record_trade();
                trade_tx.send_replace(view.clone());
            }
        },
    );

    let state = Arc::new(AppState {
        config: config.clone(),
        metrics,
        book: book_rx,
        trades: trade_rx,
        depth_connected: depth.connected(),
        trade_connected: trades.connected(),
    });

    // Optional IPC publisher
    let publisher = match &config.ipc_socket_path {
        Some(path) => Some(Publisher::new(path).await?),
        None => None,
    };

    let view_state = state.clone();
    tokio::spawn(async move {
        publish_views(view_state, publisher).await;
    });

    let status_state = state.clone();
    tokio::spawn(async move {
        log_status(status_state).await;
    });

    // Start health check server
    let health_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state).await {
            warn!(error = %e, "Health server error");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    depth.close().await;
    trades.close().await;

    Ok(())
}

/// Forward view changes to the IPC publisher, tracking level highlights
async fn publish_views(state: Arc<AppState>, publisher: Option<Publisher>) {
    let mut book = state.book.clone();
    let mut trades = state.trades.clone();
    let mut highlights = HighlightTracker::new(state.config.flash_duration());
    let symbol = state.config.symbol.as_str();

    loop {
        let wake = highlights.next_deadline();

        tokio::select! {
            changed = book.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = book.borrow_and_update().clone();
                highlights.observe(&view, Instant::now());
                publish_book(publisher.as_ref(), symbol, &view, &highlights).await;
            }
            changed = trades.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = trades.borrow_and_update().clone();
                if let Some(publisher) = publisher.as_ref() {
                    let publication = Publication::Trade {
                        symbol,
                        timestamp: Utc::now().timestamp_millis(),
                        view: &view,
                    };
                    if let Err(e) = publisher.publish(&publication).await {
                        warn!(error = %e, "Failed to publish trade view");
                    }
                }
            }
            _ = sleep_until(wake.unwrap_or_else(Instant::now)), if wake.is_some() => {
                if highlights.expire(Instant::now()) {
                    let view = book.borrow().clone();
                    publish_book(publisher.as_ref(), symbol, &view, &highlights).await;
                }
            }
        }
    }

    debug!("View publisher stopped");
}

async fn publish_book(
    publisher: Option<&Publisher>,
    symbol: &str,
    view: &BookView,
    highlights: &HighlightTracker,
) {
    let Some(publisher) = publisher else {
        return;
    };

    let lit = highlights.active(Instant::now());
    let publication = Publication::Book {
        symbol,
        timestamp: Utc::now().timestamp_millis(),
        view,
        highlights: &lit,
    };
    if let Err(e) = publisher.publish(&publication).await {
        warn!(error = %e, "Failed to publish book view");
    }
}

/// Periodic status logging
async fn log_status(state: Arc<AppState>) {
    let mut ticker = interval(Duration::from_secs(30));
    loop {
        ticker.tick().await;

        let (best_bid, best_ask, bid_levels, ask_levels) = {
            let view = state.book.borrow();
            (
                view.best_bid().map(|level| level.price),
                view.best_ask().map(|level| level.price),
                view.bids.len(),
                view.asks.len(),
            )
        };
        let last_price = state.trades.borrow().last_price;

        info!(
            symbol = %state.config.symbol,
            best_bid = ?best_bid,
            best_ask = ?best_ask,
            bid_levels,
            ask_levels,
            last_price = ?last_price,
            depth_connected = *state.depth_connected.borrow(),
            trade_connected = *state.trade_connected.borrow(),
            "Order book status"
        );
    }
}

/// Start HTTP server for health checks and metrics
async fn start_health_server(state: Arc<AppState>) -> anyhow::Result<()> {
    use std::net::SocketAddr;

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .with_state(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.health_port));
    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let (bid_levels, ask_levels) = {
        let view = state.book.borrow();
        (view.bids.len(), view.asks.len())
    };
    let trade = state.trades.borrow().clone();
    let depth_connected = *state.depth_connected.borrow();
    let trade_connected = *state.trade_connected.borrow();

    Json(serde_json::json!({
        "status": if depth_connected { "healthy" } else { "degraded" },
        "component": "depth-feed",
        "symbol": state.config.symbol,
        "depth_connected": depth_connected,
        "trade_connected": trade_connected,
        "bid_levels": bid_levels,
        "ask_levels": ask_levels,
        "last_price": trade.last_price,
        "direction": trade.direction,
        "timestamp": Utc::now().to_rfc3339()
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<String, (StatusCode, String)> {
    state
        .metrics
        .encode()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
