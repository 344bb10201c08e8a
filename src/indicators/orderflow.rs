// =============================================================================
// Orderflow indicator (spec.md §4.2.d — highest complexity)
// =============================================================================
//
// Tick-rule classification is delegated to `shaper::apply_tick_rule`, which
// already ran once inside `shaper::prepare`; this indicator re-derives CVD
// and the open-interest scenario classifier from the already-classified
// trades the `PreparedView` carries. The CVD ratio step uses
// `rust_decimal::Decimal` to avoid the float-precision loss the original
// implementation was bitten by on very large cumulative volumes.
//
// Each sub-score call records its wall-clock duration into an in-process
// metrics table, exposed via `get_performance_metrics()` for external
// inspection (spec.md §4.2.d "Performance monitoring").

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::warn;

use crate::confluence::cache::SnapshotCache;
use crate::config::ConfluenceConfig;
use crate::indicators::{clip, safe_ratio, Indicator, MAX_CVD_VALUE, OI_EPSILON, VOLUME_EPSILON};
use crate::shaper::PreparedView;
use crate::types::{IndicatorKind, IndicatorResult, TradeSide, TriState};

const SLOW_OPERATION_MS: u128 = 100;

#[derive(Debug, Clone, Copy, Default)]
struct OperationStats {
    count: u64,
    total_ms: f64,
    min_ms: f64,
    max_ms: f64,
}

impl OperationStats {
    fn record(&mut self, duration_ms: f64) {
        self.count += 1;
        self.total_ms += duration_ms;
        self.min_ms = if self.count == 1 { duration_ms } else { self.min_ms.min(duration_ms) };
        self.max_ms = self.max_ms.max(duration_ms);
    }

    fn avg_ms(&self) -> f64 {
        safe_ratio(self.total_ms, self.count as f64, 0.0, VOLUME_EPSILON)
    }
}

#[derive(Default)]
pub struct OrderflowIndicator {
    metrics: Mutex<HashMap<String, OperationStats>>,
}

impl OrderflowIndicator {
    fn timed<T>(&self, operation: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        if elapsed_ms > SLOW_OPERATION_MS as f64 {
            warn!(operation, elapsed_ms, "orderflow sub-score exceeded 100ms");
        }
        self.metrics.lock().entry(operation.to_string()).or_default().record(elapsed_ms);
        out
    }

    /// `{operation: {count, total, min, max, avg}}`, all durations in
    /// milliseconds.
    pub fn get_performance_metrics(&self) -> HashMap<String, HashMap<String, f64>> {
        self.metrics
            .lock()
            .iter()
            .map(|(op, stats)| {
                let mut m = HashMap::new();
                m.insert("count".to_string(), stats.count as f64);
                m.insert("total".to_string(), stats.total_ms);
                m.insert("min".to_string(), stats.min_ms);
                m.insert("max".to_string(), stats.max_ms);
                m.insert("avg".to_string(), stats.avg_ms());
                (op.clone(), m)
            })
            .collect()
    }

    /// Cumulative Volume Delta score in [0,100]; 50 is perfectly balanced.
    fn cvd_score(view: &PreparedView, config: &ConfluenceConfig) -> f64 {
        let mut cvd = 0.0_f64;
        let mut total_volume = 0.0_f64;
        for t in &view.trades {
            total_volume += t.size.abs();
            cvd += match t.side {
                TradeSide::Buy => t.size,
                TradeSide::Sell => -t.size,
                TradeSide::Unknown => 0.0,
            };
        }

        if total_volume < VOLUME_EPSILON {
            return 50.0;
        }
        if cvd.abs() > MAX_CVD_VALUE {
            warn!(cvd, "abnormal CVD magnitude, returning neutral");
            return 50.0;
        }

        let cvd_dec = Decimal::try_from(cvd).unwrap_or_default();
        let total_dec = Decimal::try_from(total_volume).unwrap_or(Decimal::ONE);
        let cvd_pct = if total_dec.is_zero() {
            Decimal::ZERO
        } else {
            (cvd_dec / total_dec).clamp(Decimal::NEGATIVE_ONE, Decimal::ONE)
        };
        let cvd_pct = cvd_pct.to_f64().unwrap_or(0.0);

        let saturation = config.orderflow.cvd_saturation_threshold.max(VOLUME_EPSILON);
        let strength = clip(cvd_pct / saturation, -1.0, 1.0);
        clip(50.0 + 50.0 * strength, 0.0, 100.0)
    }

    /// Open-interest four-scenario classifier.
    fn open_interest_score(view: &PreparedView, config: &ConfluenceConfig) -> f64 {
        let Some(oi) = view.open_interest.as_ref() else {
            return 50.0;
        };
        let Some(frame) = view.base_frame() else {
            return 50.0;
        };
        if frame.bars.len() < 2 {
            return 50.0;
        }

        let prev_close = frame.bars[frame.bars.len() - 2].close;
        let last_close = frame.bars[frame.bars.len() - 1].close;
        if prev_close.abs() < OI_EPSILON {
            return 50.0;
        }
        let price_change_pct = (last_close - prev_close) / prev_close * 100.0;

        let oi_change_pct = clip(
            (oi.current - oi.previous) / oi.previous.abs().max(OI_EPSILON) * 100.0,
            -500.0,
            500.0,
        );

        let cfg = &config.orderflow.open_interest;
        let minimal = cfg.minimal_change_threshold * 100.0;
        let price_dir = cfg.price_direction_threshold * 100.0;

        if oi_change_pct.abs() < minimal || price_change_pct.abs() < price_dir {
            return 50.0;
        }

        let oi_up = oi_change_pct > 0.0;
        let price_up = price_change_pct > 0.0;

        let oi_strength = clip(oi_change_pct.abs() / cfg.oi_saturation_threshold, 0.0, 1.0);
        let price_strength = clip(price_change_pct.abs() / cfg.price_saturation_threshold, 0.0, 1.0);
        let magnitude = (oi_strength + price_strength) / 2.0;

        let bullish = match (oi_up, price_up) {
            (true, true) => true,   // Scenario 1: buildup
            (false, true) => false, // Scenario 2: short covering
            (true, false) => false, // Scenario 3: new shorts
            (false, false) => true, // Scenario 4: liquidation exhaustion
        };

        let signed = if bullish { magnitude } else { -magnitude };
        clip(50.0 + 50.0 * signed, 0.0, 100.0)
    }

    /// Volume-weighted buy/sell pressure, most recent trades weighted more.
    fn trade_flow_score(view: &PreparedView) -> f64 {
        if view.trades.is_empty() {
            return 50.0;
        }
        let n = view.trades.len();
        let mut weighted_buy = 0.0;
        let mut weighted_sell = 0.0;
        for (i, t) in view.trades.iter().enumerate() {
            let decay = (i + 1) as f64 / n as f64; // linearly increasing recency weight
            match t.side {
                TradeSide::Buy => weighted_buy += t.size * decay,
                TradeSide::Sell => weighted_sell += t.size * decay,
                TradeSide::Unknown => {}
            }
        }
        let total = weighted_buy + weighted_sell;
        clip(100.0 * safe_ratio(weighted_buy, total, 0.5, VOLUME_EPSILON), 0.0, 100.0)
    }

    /// Count-based (not volume-based) buy/sell trade imbalance.
    fn trades_imbalance_score(view: &PreparedView) -> f64 {
        let buys = view.trades.iter().filter(|t| t.side == TradeSide::Buy).count();
        let sells = view.trades.iter().filter(|t| t.side == TradeSide::Sell).count();
        let total = buys + sells;
        if total == 0 {
            return 50.0;
        }
        clip(100.0 * buys as f64 / total as f64, 0.0, 100.0)
    }

    /// Ratio of buy to sell average trade size, a proxy for directional
    /// aggression.
    fn trades_pressure_score(view: &PreparedView) -> f64 {
        let (buy_sum, buy_n) = view.trades.iter().filter(|t| t.side == TradeSide::Buy).fold(
            (0.0, 0u64),
            |(s, n), t| (s + t.size, n + 1),
        );
        let (sell_sum, sell_n) = view.trades.iter().filter(|t| t.side == TradeSide::Sell).fold(
            (0.0, 0u64),
            |(s, n), t| (s + t.size, n + 1),
        );
        if buy_n == 0 || sell_n == 0 {
            return 50.0;
        }
        let buy_avg = buy_sum / buy_n as f64;
        let sell_avg = sell_sum / sell_n as f64;
        let ratio = safe_ratio(buy_avg, buy_avg + sell_avg, 0.5, VOLUME_EPSILON);
        clip(100.0 * ratio, 0.0, 100.0)
    }

    /// Trades per second against a saturation point; higher activity scores
    /// toward the extremes rather than a direction, so this feeds into the
    /// confidence of the other flow scores rather than biasing them, and is
    /// reported as a component only.
    fn liquidity_score(view: &PreparedView) -> Option<f64> {
        if view.trades.len() < 2 {
            return None;
        }
        let span_ms = (view.trades.last()?.ts_ms - view.trades.first()?.ts_ms).max(1);
        let tps = view.trades.len() as f64 / (span_ms as f64 / 1000.0);
        // Saturates at 10 trades/sec.
        Some(clip(tps * 10.0, 0.0, 100.0))
    }

    /// Price buckets where cumulative traded volume exceeds the 80th
    /// percentile; reported as a count, normalized into [0,100] by treating
    /// a single dominant zone as maximally concentrated.
    fn liquidity_zones_score(view: &PreparedView) -> Option<f64> {
        if view.trades.len() < 5 {
            return None;
        }
        let mut buckets: HashMap<i64, f64> = HashMap::new();
        for t in &view.trades {
            if !t.price.is_finite() || t.price <= 0.0 {
                continue;
            }
            let bucket = (t.price * 100.0).round() as i64;
            *buckets.entry(bucket).or_insert(0.0) += t.size;
        }
        if buckets.is_empty() {
            return None;
        }
        let total: f64 = buckets.values().sum();
        let mut sorted: Vec<f64> = buckets.values().copied().collect();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
        let cutoff_idx = (sorted.len() as f64 * 0.2).ceil() as usize;
        let top_volume: f64 = sorted.iter().take(cutoff_idx.max(1)).sum();
        Some(clip(100.0 * safe_ratio(top_volume, total, 0.5, VOLUME_EPSILON), 0.0, 100.0))
    }
}

impl Indicator for OrderflowIndicator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Orderflow
    }

    fn calculate(&self, view: &PreparedView, _cache: &SnapshotCache, config: &ConfluenceConfig) -> IndicatorResult {
        if view.trades.is_empty() {
            return IndicatorResult::neutral_with("no_trades");
        }

        let mut components = HashMap::new();

        let cvd = self.timed("cvd", || Self::cvd_score(view, config));
        components.insert("cvd".to_string(), cvd);

        let oi = self.timed("open_interest", || Self::open_interest_score(view, config));
        components.insert("open_interest".to_string(), oi);

        let trade_flow = self.timed("trade_flow", || Self::trade_flow_score(view));
        components.insert("trade_flow".to_string(), trade_flow);

        let trades_imbalance = self.timed("trades_imbalance", || Self::trades_imbalance_score(view));
        components.insert("trades_imbalance".to_string(), trades_imbalance);

        let trades_pressure = self.timed("trades_pressure", || Self::trades_pressure_score(view));
        components.insert("trades_pressure".to_string(), trades_pressure);

        let mut scores = vec![cvd, oi, trade_flow, trades_imbalance, trades_pressure];

        if let Some(s) = self.timed("liquidity", || Self::liquidity_score(view)) {
            components.insert("liquidity".to_string(), s);
            scores.push(s);
        }
        if let Some(s) = self.timed("liquidity_zones", || Self::liquidity_zones_score(view)) {
            components.insert("liquidity_zones".to_string(), s);
            scores.push(s);
        }

        let score = clip(scores.iter().sum::<f64>() / scores.len() as f64, 0.0, 100.0);

        let mut signals = HashMap::new();
        signals.insert(
            "flow_bias".to_string(),
            if score > 60.0 {
                TriState::Bullish
            } else if score < 40.0 {
                TriState::Bearish
            } else {
                TriState::Neutral
            },
        );

        IndicatorResult {
            score,
            components,
            signals,
            metadata: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bar, OhlcvFrame, OpenInterestSample, Timeframe, Trade};
    use std::collections::HashMap as Map;

    fn trades(prices_and_sides: &[(f64, TradeSide)]) -> Vec<Trade> {
        prices_and_sides
            .iter()
            .enumerate()
            .map(|(i, (p, s))| Trade { id: i.to_string(), price: *p, size: 1.0, side: *s, ts_ms: i as i64 * 1000 })
            .collect()
    }

    fn base_view(trades_vec: Vec<Trade>) -> PreparedView {
        PreparedView {
            symbol: "X".into(),
            timestamp_ms: 1,
            ohlcv: Map::new(),
            orderbook: None,
            trades: trades_vec,
            ticker: None,
            open_interest: None,
            sentiment: None,
        }
    }

    #[test]
    fn neutral_without_trades() {
        let indicator = OrderflowIndicator::default();
        let view = base_view(vec![]);
        let result = indicator.calculate(&view, &SnapshotCache::default(), &ConfluenceConfig::default());
        assert_eq!(result.score, 50.0);
    }

    #[test]
    fn cvd_all_buys_is_fully_bullish() {
        let pairs = vec![(100.0, TradeSide::Buy); 10];
        let view = base_view(trades(&pairs));
        let cfg = ConfluenceConfig::default();
        let score = OrderflowIndicator::cvd_score(&view, &cfg);
        assert!((score - 100.0).abs() < 1e-6);
    }

    #[test]
    fn cvd_balanced_is_neutral() {
        let mut pairs = vec![(100.0, TradeSide::Buy); 5];
        pairs.extend(vec![(100.0, TradeSide::Sell); 5]);
        let view = base_view(trades(&pairs));
        let cfg = ConfluenceConfig::default();
        let score = OrderflowIndicator::cvd_score(&view, &cfg);
        assert!((score - 50.0).abs() < 1e-6);
    }

    #[test]
    fn open_interest_scenario_one_is_bullish_vignette() {
        let mut frame = OhlcvFrame::default();
        frame.bars.push(Bar { ts_ms: 0, open: 50000.0, high: 50100.0, low: 49900.0, close: 50000.0, volume: 1000.0 });
        frame.bars.push(Bar { ts_ms: 1, open: 50000.0, high: 50800.0, low: 50000.0, close: 50750.0, volume: 1000.0 });
        let mut ohlcv = Map::new();
        ohlcv.insert(Timeframe::Base, frame);

        let view = PreparedView {
            symbol: "X".into(),
            timestamp_ms: 1,
            ohlcv,
            orderbook: None,
            trades: vec![Trade { id: "1".into(), price: 50000.0, size: 1.0, side: TradeSide::Buy, ts_ms: 1 }],
            ticker: None,
            open_interest: Some(OpenInterestSample { current: 1040.0, previous: 1000.0, timestamp_ms: 1 }),
            sentiment: None,
        };
        let cfg = ConfluenceConfig::default();
        let score = OrderflowIndicator::open_interest_score(&view, &cfg);
        assert!(score >= 65.0, "score={}", score);
    }

    #[test]
    fn open_interest_below_minimal_change_is_neutral() {
        let mut frame = OhlcvFrame::default();
        frame.bars.push(Bar { ts_ms: 0, open: 50000.0, high: 50010.0, low: 49990.0, close: 50000.0, volume: 1.0 });
        frame.bars.push(Bar { ts_ms: 1, open: 50000.0, high: 50010.0, low: 49990.0, close: 50005.0, volume: 1.0 });
        let mut ohlcv = Map::new();
        ohlcv.insert(Timeframe::Base, frame);
        let view = PreparedView {
            symbol: "X".into(),
            timestamp_ms: 1,
            ohlcv,
            orderbook: None,
            trades: vec![Trade { id: "1".into(), price: 50000.0, size: 1.0, side: TradeSide::Buy, ts_ms: 1 }],
            ticker: None,
            open_interest: Some(OpenInterestSample { current: 1001.0, previous: 1000.0, timestamp_ms: 1 }),
            sentiment: None,
        };
        let cfg = ConfluenceConfig::default();
        let score = OrderflowIndicator::open_interest_score(&view, &cfg);
        assert_eq!(score, 50.0);
    }

    #[test]
    fn performance_metrics_populated_after_calculate() {
        let indicator = OrderflowIndicator::default();
        let view = base_view(trades(&[(100.0, TradeSide::Buy), (101.0, TradeSide::Sell)]));
        let _ = indicator.calculate(&view, &SnapshotCache::default(), &ConfluenceConfig::default());
        let metrics = indicator.get_performance_metrics();
        assert!(metrics.contains_key("cvd"));
        assert_eq!(metrics["cvd"]["count"], 1.0);
    }

    #[test]
    fn score_always_in_range() {
        let indicator = OrderflowIndicator::default();
        let view = base_view(trades(&[(100.0, TradeSide::Buy), (50.0, TradeSide::Sell), (200.0, TradeSide::Buy)]));
        let result = indicator.calculate(&view, &SnapshotCache::default(), &ConfluenceConfig::default());
        assert!((0.0..=100.0).contains(&result.score));
        assert!(result.score.is_finite());
    }
}
