// =============================================================================
// Order Book Manager — Real-time orderbook aggregation
// =============================================================================
//
// Retains full bid/ask levels per symbol, not just aggregate best-bid/ask and
// total depth — the `indicators::orderbook` component needs per-level depth
// to score imbalance, spread, depth, and price impact (spec.md §4.2.c).

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use parking_lot::RwLock;
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};

use crate::types::{Level, OrderBook};

/// Manages orderbook state for multiple symbols.
pub struct OrderBookManager {
    books: RwLock<HashMap<String, OrderBook>>,
}

impl OrderBookManager {
    pub fn new() -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the full level set for a symbol.
    pub fn update(&self, symbol: &str, bids: Vec<Level>, asks: Vec<Level>, timestamp_ms: i64) {
        let book = OrderBook { bids, asks, timestamp_ms };
        self.books.write().insert(symbol.to_string(), book);
    }

    /// Get a clone of the current orderbook for a symbol.
    pub fn get(&self, symbol: &str) -> Option<OrderBook> {
        self.books.read().get(symbol).cloned()
    }

    /// Get the spread in basis points for a symbol.
    pub fn spread_bps(&self, symbol: &str) -> Option<f64> {
        let book = self.get(symbol)?;
        let bid = book.best_bid()?;
        let ask = book.best_ask()?;
        let mid = (bid.price + ask.price) / 2.0;
        if mid <= 0.0 {
            return None;
        }
        Some((ask.price - bid.price) / mid * 10_000.0)
    }

    /// Get the orderbook imbalance for a symbol (-1 to +1), summed over the
    /// full depth this manager retains.
    pub fn imbalance(&self, symbol: &str) -> Option<f64> {
        let book = self.get(symbol)?;
        let bid_depth: f64 = book.bids.iter().map(|l| l.size).sum();
        let ask_depth: f64 = book.asks.iter().map(|l| l.size).sum();
        let total = bid_depth + ask_depth;
        if total <= 0.0 {
            return None;
        }
        Some((bid_depth - ask_depth) / total)
    }

    /// Get all tracked symbols.
    pub fn symbols(&self) -> Vec<String> {
        self.books.read().keys().cloned().collect()
    }
}

impl Default for OrderBookManager {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Depth WebSocket stream
// ---------------------------------------------------------------------------

/// Connect to the Binance partial depth WebSocket stream for a single symbol
/// and feed orderbook updates into `manager`.
///
/// Uses the `@depth20@100ms` stream which provides the top 20 levels of the
/// orderbook at 100ms update intervals.
///
/// Runs until the stream disconnects or an error occurs, then returns so that
/// the caller (main.rs) can handle reconnection.
pub async fn run_depth_stream(
    symbol: &str,
    manager: &Arc<OrderBookManager>,
) -> Result<()> {
    let lower = symbol.to_lowercase();
    let url = format!("wss://stream.binance.com:9443/ws/{lower}@depth20@100ms");
    info!(url = %url, symbol = %symbol, "connecting to depth WebSocket");

    let (ws_stream, _response) = connect_async(&url)
        .await
        .context("failed to connect to depth WebSocket")?;

    info!(symbol = %symbol, "depth WebSocket connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_depth_message(&text) {
                        Ok((bids, asks)) => {
                            let ts_ms = chrono::Utc::now().timestamp_millis();
                            manager.update(symbol, bids, asks, ts_ms);
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to parse depth message");
                        }
                    }
                }
            }
            Some(Err(e)) => {
                error!(symbol = %symbol, error = %e, "depth WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!(symbol = %symbol, "depth WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

/// Parse a Binance partial-depth message.
///
/// Expected shape:
/// ```json
/// {
///   "lastUpdateId": 12345,
///   "bids": [["37000.00", "1.5"], ...],
///   "asks": [["37001.00", "1.2"], ...]
/// }
/// ```
fn parse_depth_message(text: &str) -> Result<(Vec<Level>, Vec<Level>)> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse depth JSON")?;

    let parse_levels = |key: &str| -> Vec<Level> {
        root[key]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|entry| {
                        let price: f64 = entry.get(0)?.as_str()?.parse().ok()?;
                        let size: f64 = entry.get(1)?.as_str()?.parse().ok()?;
                        Some(Level { price, size })
                    })
                    .collect()
            })
            .unwrap_or_default()
    };

    let bids = parse_levels("bids");
    let asks = parse_levels("asks");

    if bids.is_empty() && asks.is_empty() {
        anyhow::bail!("depth message had no parseable levels");
    }

    Ok((bids, asks))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_depth_message_extracts_levels() {
        let text = r#"{"lastUpdateId":1,"bids":[["100.0","1.5"]],"asks":[["101.0","2.0"]]}"#;
        let (bids, asks) = parse_depth_message(text).unwrap();
        assert_eq!(bids.len(), 1);
        assert_eq!(asks.len(), 1);
        assert!((bids[0].price - 100.0).abs() < 1e-9);
        assert!((asks[0].size - 2.0).abs() < 1e-9);
    }

    #[test]
    fn manager_reports_imbalance() {
        let manager = OrderBookManager::new();
        manager.update(
            "BTCUSDT",
            vec![Level { price: 100.0, size: 10.0 }],
            vec![Level { price: 101.0, size: 5.0 }],
            1,
        );
        let imbalance = manager.imbalance("BTCUSDT").unwrap();
        assert!(imbalance > 0.0);
    }
}
