// =============================================================================
// Price-structure indicator (spec.md §4.2.f)
// =============================================================================
//
// Requires all four timeframe tags; the shaper's derivation fallback
// (spec.md §4.1 rule 4) means this indicator usually sees a full set even
// when the upstream snapshot only carried one or two native timeframes.
// Support/resistance levels come from each frame's trailing high/low
// extremes; breakout detection compares the current close against the
// prior range. The range-volume validity check reuses the volume
// indicator's `range_volume_coherence` component as a confirmation gate on
// any detected breakout (spec.md: "consumes the volume indicator's
// output").

use std::collections::HashMap;

use crate::confluence::cache::SnapshotCache;
use crate::config::ConfluenceConfig;
use crate::indicators::volume::VolumeIndicator;
use crate::indicators::{clip, safe_ratio, Indicator};
use crate::shaper::PreparedView;
use crate::types::{IndicatorKind, IndicatorResult, OhlcvFrame, Timeframe, TriState};

#[derive(Default)]
pub struct PriceStructureIndicator;

struct RangeRead {
    support: f64,
    resistance: f64,
    position_pct: f64, // 0 = at support, 100 = at resistance
    breakout: Option<bool>, // Some(true) = broke above, Some(false) = broke below
}

impl PriceStructureIndicator {
    fn analyze_frame(frame: &OhlcvFrame, lookback: usize) -> Option<RangeRead> {
        if frame.bars.len() < lookback + 1 {
            return None;
        }
        let window = &frame.bars[frame.bars.len() - 1 - lookback..frame.bars.len() - 1];
        let support = window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        let resistance = window.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let last_close = frame.bars.last()?.close;

        if !support.is_finite() || !resistance.is_finite() || resistance <= support {
            return None;
        }

        let position_pct = clip(100.0 * safe_ratio(last_close - support, resistance - support, 0.5, 1e-9), 0.0, 100.0);

        let breakout = if last_close > resistance {
            Some(true)
        } else if last_close < support {
            Some(false)
        } else {
            None
        };

        Some(RangeRead { support, resistance, position_pct, breakout })
    }

    fn score_frame(read: &RangeRead) -> f64 {
        match read.breakout {
            Some(true) => 85.0,
            Some(false) => 15.0,
            None => read.position_pct,
        }
    }
}

const TAG_WEIGHTS: [(Timeframe, f64); 4] = [
    (Timeframe::Base, 0.25),
    (Timeframe::Ltf, 0.25),
    (Timeframe::Mtf, 0.25),
    (Timeframe::Htf, 0.25),
];

impl Indicator for PriceStructureIndicator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::PriceStructure
    }

    fn calculate(&self, view: &PreparedView, cache: &SnapshotCache, config: &ConfluenceConfig) -> IndicatorResult {
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        let mut components = HashMap::new();
        let mut signals = HashMap::new();
        let mut any_breakout = false;

        for (tag, weight) in TAG_WEIGHTS {
            let Some(frame) = view.ohlcv.get(&tag) else {
                continue;
            };
            let Some(read) = Self::analyze_frame(frame, 20) else {
                continue;
            };

            let score = Self::score_frame(&read);
            weighted_sum += score * weight;
            weight_total += weight;

            components.insert(format!("{}_support", tag), read.support);
            components.insert(format!("{}_resistance", tag), read.resistance);
            components.insert(format!("{}_position_pct", tag), read.position_pct);

            if read.breakout.is_some() {
                any_breakout = true;
            }

            signals.insert(
                format!("{}_structure", tag),
                match read.breakout {
                    Some(true) => TriState::Bullish,
                    Some(false) => TriState::Bearish,
                    None => TriState::Neutral,
                },
            );
        }

        if weight_total <= 0.0 {
            return IndicatorResult::neutral_with("insufficient_timeframes");
        }

        let mut score = clip(weighted_sum / weight_total, 0.0, 100.0);

        // A breakout unconfirmed by volume/range coherence is downgraded
        // toward neutral rather than trusted outright.
        if any_breakout {
            let coherence = cache.get_or_compute("range_volume_coherence", || {
                let volume_result = VolumeIndicator::default().calculate(view, cache, config);
                volume_result.components.get("range_volume_coherence").copied().unwrap_or(50.0)
            });
            if coherence < 40.0 {
                score = score * 0.5 + 50.0 * 0.5;
                components.insert("breakout_confirmation".to_string(), coherence);
            }
        }

        IndicatorResult {
            score,
            components,
            signals,
            metadata: HashMap::new(),
        }
    }
}
