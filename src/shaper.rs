// =============================================================================
// Data Validator & Shaper (C1)
// =============================================================================
//
// `prepare(snapshot, indicator_kind) -> PreparedView | Reject` — pure, no
// side effects other than structured log events. Normalizes a
// `MarketSnapshot` into the per-indicator view each `Indicator` consumes,
// and rejects or repairs structurally invalid inputs rather than panicking.
//
// Grounded on `original_source`'s `_standardize_timeframes` /
// `_derive_missing_timeframe` / `_prepare_data_for_*` family, re-expressed as
// typed functions instead of dict-manipulating methods on a god object
// (spec.md §9's redesign note on "nested dict-of-dict OHLCV containers").

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::types::{Level, MarketSnapshot, OhlcvFrame, OrderBook, Ticker, Timeframe, Trade, TradeSide};

/// Resolve an exchange-native interval label to one of the four canonical
/// timeframe tags (spec.md §4.1 rule 3). Unknown labels fall back to a
/// numeric-prefix heuristic; labels with no numeric prefix are rejected.
pub fn resolve_timeframe(label: &str) -> Option<Timeframe> {
    match label {
        "1" | "1m" => return Some(Timeframe::Base),
        "5" | "5m" => return Some(Timeframe::Ltf),
        "30" | "30m" | "60" | "1h" | "120" | "180" => return Some(Timeframe::Mtf),
        "240" | "4h" | "360" | "720" | "1440" | "1d" => return Some(Timeframe::Htf),
        _ => {}
    }

    let numeric: String = label.chars().take_while(|c| c.is_ascii_digit()).collect();
    if numeric.is_empty() {
        return None;
    }
    let minutes: u64 = numeric.parse().ok()?;
    let tag = match minutes {
        1 => Timeframe::Base,
        5 => Timeframe::Ltf,
        15..=60 => Timeframe::Mtf,
        m if m >= 120 => Timeframe::Htf,
        _ => return None,
    };
    Some(tag)
}

/// Fallback source order for deriving a missing timeframe from available
/// ones (spec.md §4.1 rule 4), mirroring the original's `derivation_map`.
fn derivation_sources(missing: Timeframe) -> &'static [Timeframe] {
    match missing {
        Timeframe::Base => &[Timeframe::Ltf, Timeframe::Mtf, Timeframe::Htf],
        Timeframe::Ltf => &[Timeframe::Base, Timeframe::Mtf, Timeframe::Htf],
        Timeframe::Mtf => &[Timeframe::Ltf, Timeframe::Htf],
        Timeframe::Htf => &[Timeframe::Mtf],
    }
}

/// Standardize and, where possible, fill in missing timeframes. Frames
/// failing the structural check for `min_candles` are dropped before
/// derivation runs, so derivation never copies garbage forward.
pub fn standardize_timeframes(
    ohlcv: &HashMap<Timeframe, OhlcvFrame>,
    min_candles: usize,
) -> HashMap<Timeframe, OhlcvFrame> {
    let mut standardized: HashMap<Timeframe, OhlcvFrame> = HashMap::new();
    for tag in Timeframe::ALL {
        if let Some(frame) = ohlcv.get(&tag) {
            if frame.is_structurally_valid(min_candles) {
                standardized.insert(tag, frame.clone());
            } else {
                debug!(?tag, "dropping structurally invalid timeframe");
            }
        }
    }

    for tag in Timeframe::ALL {
        if standardized.contains_key(&tag) {
            continue;
        }
        if let Some(derived) = derive_missing_timeframe(&standardized, tag) {
            debug!(?tag, "derived missing timeframe from nearest available");
            standardized.insert(tag, derived);
        }
    }

    standardized
}

fn derive_missing_timeframe(
    timeframes: &HashMap<Timeframe, OhlcvFrame>,
    missing: Timeframe,
) -> Option<OhlcvFrame> {
    for source in derivation_sources(missing) {
        if let Some(frame) = timeframes.get(source) {
            if !frame.is_empty() {
                return Some(frame.clone());
            }
        }
    }
    None
}

/// Top-level structural check (spec.md §4.1 rule 1-2): at least one
/// acceptable OHLCV frame must exist after standardization.
pub fn validate_snapshot(snapshot: &MarketSnapshot, min_candles: usize) -> bool {
    if !snapshot.is_structurally_valid() {
        return false;
    }
    !standardize_timeframes(&snapshot.ohlcv, min_candles).is_empty()
}

/// Repair an orderbook per spec.md §4.1 rule 5: drop non-numeric/negative
/// levels, stamp a missing timestamp from the snapshot time.
pub fn clean_orderbook(book: &OrderBook, snapshot_ts_ms: i64) -> OrderBook {
    let clean_levels = |levels: &[Level]| -> Vec<Level> {
        levels
            .iter()
            .filter(|l| l.price.is_finite() && l.price >= 0.0 && l.size.is_finite() && l.size >= 0.0)
            .copied()
            .collect()
    };

    OrderBook {
        bids: clean_levels(&book.bids),
        asks: clean_levels(&book.asks),
        timestamp_ms: if book.timestamp_ms > 0 { book.timestamp_ms } else { snapshot_ts_ms },
    }
}

/// Repair a trade list per spec.md §4.1 rule 6: stamp missing timestamps and
/// repair missing prices using a documented fallback order.
pub fn clean_trades(
    trades: &[Trade],
    ticker: Option<&Ticker>,
    last_close: Option<f64>,
    snapshot_ts_ms: i64,
) -> Vec<Trade> {
    let mut last_valid_price: Option<f64> = None;
    let mut out = Vec::with_capacity(trades.len());

    for t in trades {
        let mut price = t.price;
        if !price.is_finite() || price <= 0.0 {
            price = ticker
                .and_then(|tk| tk.last)
                .or(last_close)
                .or(last_valid_price)
                .unwrap_or(0.0);
        }
        if price <= 0.0 {
            continue;
        }
        last_valid_price = Some(price);

        let ts_ms = if t.ts_ms > 0 { t.ts_ms } else { snapshot_ts_ms };

        out.push(Trade {
            id: t.id.clone(),
            price,
            size: t.size,
            side: t.side,
            ts_ms,
        });
    }

    out
}

/// Apply the tick rule to reclassify `unknown`-side trades in time order
/// (spec.md §4.2.d). Does not mutate the input; returns a new vector.
pub fn apply_tick_rule(trades: &[Trade]) -> Vec<Trade> {
    let mut out = Vec::with_capacity(trades.len());
    let mut last_known_price: Option<f64> = None;

    for t in trades {
        let mut side = t.side;
        if side == TradeSide::Unknown {
            if let Some(prev) = last_known_price {
                if t.price > prev {
                    side = TradeSide::Buy;
                } else if t.price < prev {
                    side = TradeSide::Sell;
                }
            }
        }
        if side != TradeSide::Unknown {
            last_known_price = Some(t.price);
        }
        out.push(Trade {
            id: t.id.clone(),
            price: t.price,
            size: t.size,
            side,
            ts_ms: t.ts_ms,
        });
    }

    if !out.is_empty() {
        let unknown = out.iter().filter(|t| t.side == TradeSide::Unknown).count();
        let frac = unknown as f64 / out.len() as f64;
        if frac > 0.10 {
            warn!(fraction = frac, "high share of unclassified trades after tick rule");
        }
    }

    out
}

/// A prepared, indicator-ready view over a snapshot. One struct, not six
/// (spec.md names six views but they all draw from the same normalized
/// fields, so the shaper builds this once per snapshot and indicators read
/// only the parts they need).
#[derive(Debug, Clone)]
pub struct PreparedView {
    pub symbol: String,
    pub timestamp_ms: i64,
    pub ohlcv: HashMap<Timeframe, OhlcvFrame>,
    pub orderbook: Option<OrderBook>,
    pub trades: Vec<Trade>,
    pub ticker: Option<Ticker>,
    pub open_interest: Option<crate::types::OpenInterestSample>,
    pub sentiment: Option<crate::types::Sentiment>,
}

impl PreparedView {
    pub fn base_frame(&self) -> Option<&OhlcvFrame> {
        self.ohlcv.get(&Timeframe::Base)
    }

    pub fn last_price(&self) -> Option<f64> {
        self.ticker
            .as_ref()
            .and_then(|t| t.last)
            .or_else(|| self.base_frame().and_then(|f| f.last_close()))
    }
}

/// Build the single normalized view every indicator reads from. Returns
/// `None` when the snapshot fails the top-level structural check
/// (spec.md §4.3 step 1 — caller falls back to a neutral `FusionResult`).
pub fn prepare(snapshot: &MarketSnapshot, min_candles: usize) -> Option<PreparedView> {
    if !validate_snapshot(snapshot, min_candles) {
        return None;
    }

    let ohlcv = standardize_timeframes(&snapshot.ohlcv, min_candles);
    let last_close = ohlcv.get(&Timeframe::Base).and_then(|f| f.last_close());

    let orderbook = snapshot
        .orderbook
        .as_ref()
        .map(|ob| clean_orderbook(ob, snapshot.timestamp_ms));

    let trades = clean_trades(
        &snapshot.trades,
        snapshot.ticker.as_ref(),
        last_close,
        snapshot.timestamp_ms,
    );
    let trades = apply_tick_rule(&trades);

    Some(PreparedView {
        symbol: snapshot.symbol.clone(),
        timestamp_ms: snapshot.timestamp_ms,
        ohlcv,
        orderbook,
        trades,
        ticker: snapshot.ticker.clone(),
        open_interest: snapshot.open_interest,
        sentiment: snapshot.sentiment.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Bar;

    fn bars(n: i64) -> OhlcvFrame {
        let mut f = OhlcvFrame::default();
        for i in 0..n {
            f.bars.push(Bar {
                ts_ms: i * 60_000,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0 + i as f64,
                volume: 10.0,
            });
        }
        f
    }

    #[test]
    fn resolve_timeframe_known_labels() {
        assert_eq!(resolve_timeframe("1m"), Some(Timeframe::Base));
        assert_eq!(resolve_timeframe("5"), Some(Timeframe::Ltf));
        assert_eq!(resolve_timeframe("1h"), Some(Timeframe::Mtf));
        assert_eq!(resolve_timeframe("4h"), Some(Timeframe::Htf));
    }

    #[test]
    fn resolve_timeframe_numeric_heuristic() {
        assert_eq!(resolve_timeframe("15m"), Some(Timeframe::Mtf));
        assert_eq!(resolve_timeframe("240m"), Some(Timeframe::Htf));
        assert_eq!(resolve_timeframe("garbage"), None);
    }

    #[test]
    fn standardize_drops_short_frames() {
        let mut input = HashMap::new();
        input.insert(Timeframe::Base, bars(5));
        let out = standardize_timeframes(&input, 20);
        assert!(out.is_empty());
    }

    #[test]
    fn standardize_derives_missing_from_available() {
        let mut input = HashMap::new();
        input.insert(Timeframe::Ltf, bars(30));
        let out = standardize_timeframes(&input, 20);
        assert!(out.contains_key(&Timeframe::Base));
        assert!(out.contains_key(&Timeframe::Ltf));
    }

    #[test]
    fn tick_rule_vignette() {
        let prices = [50000.0, 50100.0, 50050.0, 50050.0, 50150.0];
        let trades: Vec<Trade> = prices
            .iter()
            .enumerate()
            .map(|(i, p)| Trade {
                id: i.to_string(),
                price: *p,
                size: 1.0,
                side: TradeSide::Unknown,
                ts_ms: i as i64,
            })
            .collect();
        let out = apply_tick_rule(&trades);
        assert_eq!(out[0].side, TradeSide::Unknown);
        assert_eq!(out[1].side, TradeSide::Buy);
        assert_eq!(out[2].side, TradeSide::Sell);
        assert_eq!(out[3].side, TradeSide::Unknown);
        assert_eq!(out[4].side, TradeSide::Buy);
    }

    #[test]
    fn clean_orderbook_drops_invalid_levels() {
        let book = OrderBook {
            bids: vec![Level { price: -1.0, size: 1.0 }, Level { price: 100.0, size: 2.0 }],
            asks: vec![Level { price: 101.0, size: f64::NAN }],
            timestamp_ms: 0,
        };
        let cleaned = clean_orderbook(&book, 12345);
        assert_eq!(cleaned.bids.len(), 1);
        assert!(cleaned.asks.is_empty());
        assert_eq!(cleaned.timestamp_ms, 12345);
    }

    #[test]
    fn clean_trades_repairs_missing_price_from_last_close() {
        let trades = vec![Trade {
            id: "1".into(),
            price: 0.0,
            size: 1.0,
            side: TradeSide::Unknown,
            ts_ms: 0,
        }];
        let out = clean_trades(&trades, None, Some(42.0), 999);
        assert_eq!(out.len(), 1);
        assert!((out[0].price - 42.0).abs() < f64::EPSILON);
        assert_eq!(out[0].ts_ms, 999);
    }

    #[test]
    fn prepare_rejects_structurally_invalid_snapshot() {
        let snap = MarketSnapshot::default();
        assert!(prepare(&snap, 20).is_none());
    }

    #[test]
    fn prepare_accepts_valid_snapshot() {
        let mut snap = MarketSnapshot {
            symbol: "BTCUSDT".into(),
            timestamp_ms: 1,
            ..Default::default()
        };
        snap.ohlcv.insert(Timeframe::Base, bars(25));
        let view = prepare(&snap, 20).unwrap();
        assert!(view.base_frame().is_some());
    }
}
