// =============================================================================
// Volume indicator (spec.md §4.2.b)
// =============================================================================
//
// Scores a symbol's recent trading activity on three axes: volume trend
// (is the base-timeframe bar volume picking up or drying up), volume
// anomaly (does the latest bar stand out against its recent history), and
// buy/sell volume balance computed from the tick-rule-classified trades the
// shaper already produced. A final range/volume sanity check downgrades
// the score toward neutral when price barely moved on heavy volume or vice
// versa, since that divergence signals the other sub-scores are reading
// noise rather than participation.

use std::collections::HashMap;

use crate::confluence::cache::SnapshotCache;
use crate::config::ConfluenceConfig;
use crate::indicators::{clip, safe_ratio, Indicator, VOLUME_EPSILON};
use crate::shaper::PreparedView;
use crate::types::{IndicatorKind, IndicatorResult, OhlcvFrame, TradeSide, TriState};

#[derive(Default)]
pub struct VolumeIndicator;

impl VolumeIndicator {
    /// Mean volume of the bars preceding the most recent one versus the
    /// most recent bar itself; a ratio above 1 means volume is expanding.
    fn volume_trend_score(frame: &OhlcvFrame) -> Option<f64> {
        if frame.bars.len() < 11 {
            return None;
        }
        let recent = frame.bars.last()?.volume;
        let window = &frame.bars[frame.bars.len() - 11..frame.bars.len() - 1];
        let baseline = window.iter().map(|b| b.volume).sum::<f64>() / window.len() as f64;
        let ratio = safe_ratio(recent, baseline, 1.0, VOLUME_EPSILON);
        // ratio of 1.0 -> 50 (no change), ratio of 2.0+ -> 100, ratio of 0 -> 0.
        Some(clip(50.0 * ratio, 0.0, 100.0))
    }

    /// How many standard deviations the latest bar's volume sits from the
    /// trailing mean, mapped into [0,100] with 50 meaning "unremarkable".
    fn volume_anomaly_score(frame: &OhlcvFrame) -> Option<f64> {
        if frame.bars.len() < 21 {
            return None;
        }
        let window = &frame.bars[frame.bars.len() - 21..frame.bars.len() - 1];
        let recent = frame.bars.last()?.volume;
        let mean = window.iter().map(|b| b.volume).sum::<f64>() / window.len() as f64;
        let variance = window.iter().map(|b| (b.volume - mean).powi(2)).sum::<f64>() / window.len() as f64;
        let std_dev = variance.sqrt();
        let z = safe_ratio(recent - mean, std_dev, 0.0, VOLUME_EPSILON);
        Some(clip(50.0 + z * 15.0, 0.0, 100.0))
    }

    /// Buy-volume share of classified trades, in [0,100]. `None` when no
    /// trade has a known side.
    fn trade_balance_score(view: &PreparedView) -> Option<f64> {
        let mut buy = 0.0;
        let mut sell = 0.0;
        for t in &view.trades {
            match t.side {
                TradeSide::Buy => buy += t.size,
                TradeSide::Sell => sell += t.size,
                TradeSide::Unknown => {}
            }
        }
        let total = buy + sell;
        if total <= VOLUME_EPSILON {
            return None;
        }
        Some(clip(100.0 * buy / total, 0.0, 100.0))
    }

    /// Penalizes bars where price range and volume move in opposite
    /// directions relative to their own trailing baselines (heavy volume,
    /// flat range, or vice versa): such bars don't confirm the move the
    /// other sub-scores assume.
    fn range_volume_coherence(frame: &OhlcvFrame) -> Option<f64> {
        if frame.bars.len() < 11 {
            return None;
        }
        let last = frame.bars.last()?;
        let window = &frame.bars[frame.bars.len() - 11..frame.bars.len() - 1];
        let range_baseline = window.iter().map(|b| b.high - b.low).sum::<f64>() / window.len() as f64;
        let volume_baseline = window.iter().map(|b| b.volume).sum::<f64>() / window.len() as f64;

        let range_ratio = safe_ratio(last.high - last.low, range_baseline, 1.0, VOLUME_EPSILON);
        let volume_ratio = safe_ratio(last.volume, volume_baseline, 1.0, VOLUME_EPSILON);

        // Coherent (both expand or both contract together) -> 100, heavily
        // divergent -> 0.
        let divergence = (range_ratio - volume_ratio).abs();
        Some(clip(100.0 - divergence * 30.0, 0.0, 100.0))
    }
}

impl Indicator for VolumeIndicator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Volume
    }

    fn calculate(&self, view: &PreparedView, _cache: &SnapshotCache, _config: &ConfluenceConfig) -> IndicatorResult {
        let Some(frame) = view.base_frame() else {
            return IndicatorResult::neutral_with("no_base_timeframe");
        };

        let mut components = HashMap::new();
        let mut scores = Vec::new();

        if let Some(s) = Self::volume_trend_score(frame) {
            components.insert("volume_trend".to_string(), s);
            scores.push(s);
        }
        if let Some(s) = Self::volume_anomaly_score(frame) {
            components.insert("volume_anomaly".to_string(), s);
            scores.push(s);
        }
        if let Some(s) = Self::trade_balance_score(view) {
            components.insert("trade_balance".to_string(), s);
            scores.push(s);
        }
        if let Some(s) = Self::range_volume_coherence(frame) {
            components.insert("range_volume_coherence".to_string(), s);
            scores.push(s);
        }

        if scores.is_empty() {
            return IndicatorResult::neutral_with("insufficient_volume_history");
        }

        let score = clip(scores.iter().sum::<f64>() / scores.len() as f64, 0.0, 100.0);

        let mut signals = HashMap::new();
        signals.insert(
            "volume_bias".to_string(),
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
    use crate::types::{Bar, Timeframe, Trade};
    use std::collections::HashMap as Map;

    fn view_with_bars(volumes: &[f64]) -> PreparedView {
        let mut frame = OhlcvFrame::default();
        for (i, v) in volumes.iter().enumerate() {
            frame.bars.push(Bar {
                ts_ms: i as i64 * 60_000,
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
                volume: *v,
            });
        }
        let mut ohlcv = Map::new();
        ohlcv.insert(Timeframe::Base, frame);
        PreparedView {
            symbol: "X".into(),
            timestamp_ms: 1,
            ohlcv,
            orderbook: None,
            trades: vec![],
            ticker: None,
            open_interest: None,
            sentiment: None,
        }
    }

    #[test]
    fn neutral_without_base_frame() {
        let view = PreparedView {
            symbol: "X".into(),
            timestamp_ms: 1,
            ohlcv: Map::new(),
            orderbook: None,
            trades: vec![],
            ticker: None,
            open_interest: None,
            sentiment: None,
        };
        let indicator = VolumeIndicator::default();
        let result = indicator.calculate(&view, &SnapshotCache::default(), &ConfluenceConfig::default());
        assert_eq!(result.score, 50.0);
    }

    #[test]
    fn volume_spike_scores_above_neutral() {
        let mut volumes = vec![10.0; 20];
        *volumes.last_mut().unwrap() = 50.0;
        let view = view_with_bars(&volumes);
        let indicator = VolumeIndicator::default();
        let result = indicator.calculate(&view, &SnapshotCache::default(), &ConfluenceConfig::default());
        assert!(result.score > 50.0, "score={}", result.score);
    }

    #[test]
    fn buy_dominant_trades_raise_balance_component() {
        let mut view = view_with_bars(&vec![10.0; 20]);
        view.trades = vec![
            Trade { id: "1".into(), price: 100.0, size: 5.0, side: TradeSide::Buy, ts_ms: 1 },
            Trade { id: "2".into(), price: 100.5, size: 1.0, side: TradeSide::Sell, ts_ms: 2 },
        ];
        let indicator = VolumeIndicator::default();
        let result = indicator.calculate(&view, &SnapshotCache::default(), &ConfluenceConfig::default());
        let balance = result.components.get("trade_balance").copied().unwrap();
        assert!(balance > 50.0, "balance={}", balance);
    }

    #[test]
    fn score_always_in_range() {
        let view = view_with_bars(&[1.0, 0.0, 1000.0, 2.0, 3.0, 900.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        let indicator = VolumeIndicator::default();
        let result = indicator.calculate(&view, &SnapshotCache::default(), &ConfluenceConfig::default());
        assert!((0.0..=100.0).contains(&result.score));
        assert!(result.score.is_finite());
    }
}
