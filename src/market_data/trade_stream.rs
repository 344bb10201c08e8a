// =============================================================================
// Trade Stream Processor — Aggregates real-time trade data
// =============================================================================
//
// Retains a bounded window of raw trades, not just running CVD/volume
// totals — the `indicators::orderflow` component needs the trade sequence
// itself for tick-rule classification, trade-flow decay, and liquidity
// zones (spec.md §4.2.d).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use futures_util::StreamExt;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};

use crate::types::{Trade, TradeSide};

const DEFAULT_WINDOW_CAPACITY: usize = 2000;

/// Processes and aggregates individual trades from the Binance trade stream.
pub struct TradeStreamProcessor {
    symbol: String,
    window: RwLock<VecDeque<Trade>>,
    window_capacity: usize,
    cvd: RwLock<f64>,
    trade_count: AtomicU64,
    last_price: RwLock<f64>,
}

impl TradeStreamProcessor {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            window: RwLock::new(VecDeque::with_capacity(DEFAULT_WINDOW_CAPACITY)),
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            cvd: RwLock::new(0.0),
            trade_count: AtomicU64::new(0),
            last_price: RwLock::new(0.0),
        }
    }

    /// Process an incoming trade. `is_buyer_maker == true` means the taker is
    /// selling into a resting bid.
    pub fn process_trade(&self, price: f64, quantity: f64, is_buyer_maker: bool, ts_ms: i64) {
        let side = if is_buyer_maker { TradeSide::Sell } else { TradeSide::Buy };
        let signed = if side == TradeSide::Buy { quantity } else { -quantity };
        *self.cvd.write() += signed;
        *self.last_price.write() = price;
        let seq = self.trade_count.fetch_add(1, Ordering::Relaxed);

        let trade = Trade { id: seq.to_string(), price, size: quantity, side, ts_ms };
        let mut window = self.window.write();
        window.push_back(trade);
        while window.len() > self.window_capacity {
            window.pop_front();
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn cvd(&self) -> f64 {
        *self.cvd.read()
    }

    pub fn last_price(&self) -> f64 {
        *self.last_price.read()
    }

    pub fn trade_count(&self) -> u64 {
        self.trade_count.load(Ordering::Relaxed)
    }

    /// Snapshot the retained trade window in chronological order.
    pub fn trades(&self) -> Vec<Trade> {
        self.window.read().iter().cloned().collect()
    }

    pub fn buy_volume_ratio(&self) -> f64 {
        let window = self.window.read();
        let (buy, sell) = window.iter().fold((0.0, 0.0), |(b, s), t| match t.side {
            TradeSide::Buy => (b + t.size, s),
            TradeSide::Sell => (b, s + t.size),
            TradeSide::Unknown => (b, s),
        });
        let total = buy + sell;
        if total > 0.0 {
            buy / total
        } else {
            0.5
        }
    }
}

// ---------------------------------------------------------------------------
// Trade WebSocket stream
// ---------------------------------------------------------------------------

/// Connect to the Binance aggTrade WebSocket stream for a single symbol and
/// feed trades into `processor`.
///
/// Runs until the stream disconnects or an error occurs, then returns so that
/// the caller (main.rs) can handle reconnection.
pub async fn run_trade_stream(
    symbol: &str,
    processor: &Arc<TradeStreamProcessor>,
) -> Result<()> {
    let lower = symbol.to_lowercase();
    let url = format!("wss://stream.binance.com:9443/ws/{lower}@aggTrade");
    info!(url = %url, symbol = %symbol, "connecting to trade WebSocket");

    let (ws_stream, _response) = connect_async(&url)
        .await
        .context("failed to connect to trade WebSocket")?;

    info!(symbol = %symbol, "trade WebSocket connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        match read.next().await {
            Some(Ok(msg)) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    match parse_agg_trade(&text) {
                        Ok((price, quantity, is_buyer_maker, ts_ms)) => {
                            processor.process_trade(price, quantity, is_buyer_maker, ts_ms);
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to parse aggTrade message");
                        }
                    }
                }
            }
            Some(Err(e)) => {
                error!(symbol = %symbol, error = %e, "trade WebSocket read error");
                return Err(e.into());
            }
            None => {
                warn!(symbol = %symbol, "trade WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

/// Parse a Binance aggTrade message.
///
/// Expected shape:
/// ```json
/// { "e": "aggTrade", "s": "BTCUSDT", "p": "37000.00", "q": "0.123", "m": true, "T": 123456789 }
/// ```
fn parse_agg_trade(text: &str) -> Result<(f64, f64, bool, i64)> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse aggTrade JSON")?;

    let price: f64 = root["p"]
        .as_str()
        .context("missing field p")?
        .parse()
        .context("failed to parse price")?;

    let quantity: f64 = root["q"]
        .as_str()
        .context("missing field q")?
        .parse()
        .context("failed to parse quantity")?;

    let is_buyer_maker = root["m"]
        .as_bool()
        .context("missing field m")?;

    let ts_ms = root["T"].as_i64().unwrap_or(0);

    Ok((price, quantity, is_buyer_maker, ts_ms))
}
