// =============================================================================
// Technical indicator (spec.md §4.2.a)
// =============================================================================
//
// Operates per timeframe, combining momentum (RSI), trend (EMA alignment),
// oscillator strength (ADX), and moving-average/volatility structure
// (Bollinger band width) into a per-timeframe [0,100] score, then blends the
// four timeframes with tag weights `{base:0.4, ltf:0.3, mtf:0.2, htf:0.1}`.
//
// The per-timeframe sub-indicators are the donor's own `indicators::{ema,
// rsi,adx,bollinger}` math, previously wired up ad hoc inside
// `strategy.rs::evaluate_symbol`; here they're reused directly against
// whichever timeframe tag is being scored instead of being pinned to "5M
// only".

use std::collections::HashMap;

use crate::indicators::{adx, bollinger, clip, ema, rsi, Indicator};
use crate::confluence::cache::SnapshotCache;
use crate::config::ConfluenceConfig;
use crate::shaper::PreparedView;
use crate::types::{IndicatorKind, IndicatorResult, OhlcvFrame, Timeframe, TriState};

const TAG_WEIGHTS: [(Timeframe, f64); 4] = [
    (Timeframe::Base, 0.4),
    (Timeframe::Ltf, 0.3),
    (Timeframe::Mtf, 0.2),
    (Timeframe::Htf, 0.1),
];

#[derive(Default)]
pub struct TechnicalIndicator;

impl TechnicalIndicator {
    /// Per-timeframe aggregate of momentum/trend/oscillator sub-scores,
    /// each in [0,100], combined by unweighted mean (spec.md: "the
    /// per-timeframe score is their weighted mean, clipped").
    fn score_timeframe(frame: &OhlcvFrame) -> Option<(f64, HashMap<String, f64>)> {
        let closes = frame.closes();
        if closes.len() < 15 {
            return None;
        }

        let mut subs: HashMap<String, f64> = HashMap::new();

        if let Some((rsi_val, _)) = rsi::current_rsi(&closes, 14) {
            // RSI itself is already a [0,100] momentum read.
            subs.insert("momentum_rsi".to_string(), clip(rsi_val, 0.0, 100.0));
        }

        if let Some((aligned, strength)) = ema::ema_trend_aligned(&closes) {
            let trend_score = if aligned {
                50.0 + clip(strength, 0.0, 1.0) * 50.0
            } else {
                50.0 - clip(strength, 0.0, 1.0) * 50.0
            };
            subs.insert("trend_ema".to_string(), clip(trend_score, 0.0, 100.0));
        }

        let bars: Vec<crate::types::Bar> = frame.bars.clone();
        if let Some(adx_val) = adx::calculate_adx(&bars, 14) {
            // ADX measures trend strength, not direction; map [0,100] ADX
            // directly (already bounded in practice, clip for safety).
            subs.insert("oscillator_adx".to_string(), clip(adx_val, 0.0, 100.0));
        }

        if let Some(bb) = bollinger::calculate_bollinger(&closes, 20, 2.0) {
            // Narrower bands (squeeze) score higher on the "structure ready
            // to move" axis; widen this to a [0,100] scale with 20% width
            // treated as the low end.
            let ma_score = clip(100.0 - (bb.width * 5.0), 0.0, 100.0);
            subs.insert("ma_alignment_bbw".to_string(), ma_score);
        }

        if subs.is_empty() {
            return None;
        }

        let mean = subs.values().sum::<f64>() / subs.len() as f64;
        Some((clip(mean, 0.0, 100.0), subs))
    }
}

impl Indicator for TechnicalIndicator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Technical
    }

    fn calculate(&self, view: &PreparedView, _cache: &SnapshotCache, _config: &ConfluenceConfig) -> IndicatorResult {
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        let mut components = HashMap::new();
        let mut signals = HashMap::new();

        for (tag, weight) in TAG_WEIGHTS {
            let Some(frame) = view.ohlcv.get(&tag) else {
                continue;
            };
            let Some((score, subs)) = Self::score_timeframe(frame) else {
                continue;
            };

            weighted_sum += score * weight;
            weight_total += weight;

            for (name, value) in subs {
                components.insert(format!("{}_{}", tag, name), value);
            }

            let state = if score > 60.0 {
                TriState::Bullish
            } else if score < 40.0 {
                TriState::Bearish
            } else {
                TriState::Neutral
            };
            signals.insert(format!("{}_bias", tag), state);
        }

        if weight_total <= 0.0 {
            return IndicatorResult::neutral_with("insufficient_timeframes");
        }

        let score = clip(weighted_sum / weight_total, 0.0, 100.0);

        IndicatorResult {
            score,
            components,
            signals,
            metadata: HashMap::new(),
        }
    }
}
