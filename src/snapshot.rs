// =============================================================================
// Acquisition → Core seam (SPEC_FULL.md §4.0)
// =============================================================================
//
// `SnapshotBuilder::build(symbol)` assembles one `MarketSnapshot` from the
// acquisition layer's live state: closed candles per configured timeframe
// interval (`market_data::CandleBuffer`), the current orderbook
// (`market_data::OrderBookManager`), the retained trade window
// (`market_data::TradeStreamProcessor`), and the latest polled futures
// intelligence (`futures_intel::FuturesIntelCache`). It never itself talks to
// an exchange -- that's the job of the `run_*_stream` tasks and the
// `FuturesIntelCache::refresh` poller, both driven from `main.rs`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::TimeframeIntervals;
use crate::futures_intel::FuturesIntelCache;
use crate::market_data::{Candle, CandleBuffer, CandleKey, OrderBookManager, TradeStreamProcessor};
use crate::types::{MarketSnapshot, OhlcvFrame, OpenInterestSample, Sentiment, Ticker, Timeframe};

/// How many closed candles to pull per timeframe -- generous enough for the
/// indicators' longest lookback (Bollinger/ADX at period 20, price-structure
/// at lookback 20 plus the breakout bar).
const CANDLES_PER_FRAME: usize = 60;

fn candle_to_bar(c: &Candle) -> crate::types::Bar {
    crate::types::Bar {
        ts_ms: c.open_time,
        open: c.open,
        high: c.high,
        low: c.low,
        close: c.close,
        volume: c.volume,
    }
}

/// Assembles `MarketSnapshot`s for a fixed set of symbols from shared
/// acquisition-layer state. One builder serves every symbol; per-symbol
/// trade processors are registered individually since each owns its own
/// WebSocket connection.
pub struct SnapshotBuilder {
    candles: Arc<CandleBuffer>,
    orderbooks: Arc<OrderBookManager>,
    trade_processors: RwLock<HashMap<String, Arc<TradeStreamProcessor>>>,
    futures_intel: Arc<FuturesIntelCache>,
    intervals: TimeframeIntervals,
}

impl SnapshotBuilder {
    pub fn new(
        candles: Arc<CandleBuffer>,
        orderbooks: Arc<OrderBookManager>,
        futures_intel: Arc<FuturesIntelCache>,
        intervals: TimeframeIntervals,
    ) -> Self {
        Self {
            candles,
            orderbooks,
            trade_processors: RwLock::new(HashMap::new()),
            futures_intel,
            intervals,
        }
    }

    /// Register the trade processor backing a symbol's aggTrade stream.
    pub fn register_trade_processor(&self, symbol: &str, processor: Arc<TradeStreamProcessor>) {
        self.trade_processors.write().insert(symbol.to_string(), processor);
    }

    fn frame_for(&self, symbol: &str, interval: &str) -> Option<OhlcvFrame> {
        let key = CandleKey { symbol: symbol.to_string(), interval: interval.to_string() };
        let closed = self.candles.get_closed(&key, CANDLES_PER_FRAME);
        if closed.is_empty() {
            return None;
        }
        Some(OhlcvFrame { bars: closed.iter().map(candle_to_bar).collect() })
    }

    fn build_ticker(&self, symbol: &str, base_frame: Option<&OhlcvFrame>) -> Option<Ticker> {
        let book = self.orderbooks.get(symbol);
        let last = base_frame
            .and_then(|f| f.last_close())
            .or_else(|| self.trade_processors.read().get(symbol).map(|tp| tp.last_price()).filter(|p| *p > 0.0));

        if last.is_none() && book.is_none() {
            return None;
        }

        Some(Ticker {
            last,
            bid: book.as_ref().and_then(|b| b.best_bid()).map(|l| l.price),
            ask: book.as_ref().and_then(|b| b.best_ask()).map(|l| l.price),
            high: base_frame.map(|f| f.bars.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max)),
            low: base_frame.map(|f| f.bars.iter().map(|b| b.low).fold(f64::INFINITY, f64::min)),
            volume: base_frame.map(|f| f.bars.iter().map(|b| b.volume).sum()),
            percentage: base_frame.and_then(|f| {
                let first = f.bars.first()?.close;
                let last = f.bars.last()?.close;
                if first.abs() > f64::EPSILON {
                    Some((last - first) / first * 100.0)
                } else {
                    None
                }
            }),
        })
    }

    fn build_sentiment_and_oi(&self, symbol: &str) -> (Option<Sentiment>, Option<OpenInterestSample>) {
        let Some(intel) = self.futures_intel.get(symbol) else {
            return (None, None);
        };

        let sentiment = Sentiment {
            funding_rate: Some(intel.funding_rate),
            long_short_ratio: Some(intel.long_short_ratio),
            liquidations: vec![],
            open_interest: Some(intel.oi_current),
        };

        let oi_sample = OpenInterestSample {
            current: intel.oi_current,
            previous: intel.oi_previous,
            timestamp_ms: intel.updated_at_ms,
        };

        (Some(sentiment), Some(oi_sample))
    }

    /// Build a `MarketSnapshot` for `symbol` from current acquisition-layer
    /// state. Returns `None` only when no timeframe has any closed candles
    /// yet (e.g. immediately after startup, before the first kline closes).
    pub fn build(&self, symbol: &str, timestamp_ms: i64) -> Option<MarketSnapshot> {
        let mut ohlcv = HashMap::new();
        for interval in [
            self.intervals.base.as_str(),
            self.intervals.ltf.as_str(),
            self.intervals.mtf.as_str(),
            self.intervals.htf.as_str(),
        ] {
            let Some(tag) = crate::shaper::resolve_timeframe(interval) else {
                continue;
            };
            if let Some(frame) = self.frame_for(symbol, interval) {
                ohlcv.insert(tag, frame);
            }
        }

        if ohlcv.is_empty() {
            return None;
        }

        let orderbook = self.orderbooks.get(symbol);
        let trades = self
            .trade_processors
            .read()
            .get(symbol)
            .map(|tp| tp.trades())
            .unwrap_or_default();
        let ticker = self.build_ticker(symbol, ohlcv.get(&Timeframe::Base));
        let (sentiment, open_interest) = self.build_sentiment_and_oi(symbol);

        Some(MarketSnapshot {
            symbol: symbol.to_string(),
            exchange: "binance".to_string(),
            timestamp_ms,
            ohlcv,
            orderbook,
            trades,
            ticker,
            open_interest,
            sentiment,
        })
    }
}
