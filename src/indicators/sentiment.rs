// =============================================================================
// Sentiment indicator (spec.md §4.2.e)
// =============================================================================
//
// When `MarketSnapshot.sentiment` is absent or incomplete, derives the same
// features from ticker + base-timeframe OHLCV instead of failing: 24h price
// change and volatility come straight off the exchange-native ticker
// fields; funding rate and long/short ratio fall back to neutral-sentinel
// defaults (0.0 and 1.0 respectively) rather than penalizing the composite
// for data a spot/no-derivatives symbol will never have.

use std::collections::HashMap;

use crate::confluence::cache::SnapshotCache;
use crate::config::ConfluenceConfig;
use crate::indicators::{clip, safe_ratio, Indicator, PRICE_EPSILON};
use crate::shaper::PreparedView;
use crate::types::{IndicatorKind, IndicatorResult, TriState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarketTrend {
    StronglyBullish,
    Bullish,
    Neutral,
    VolatileNeutral,
    Bearish,
    StronglyBearish,
}

impl MarketTrend {
    fn as_str(self) -> &'static str {
        match self {
            MarketTrend::StronglyBullish => "strongly_bullish",
            MarketTrend::Bullish => "bullish",
            MarketTrend::Neutral => "neutral",
            MarketTrend::VolatileNeutral => "volatile_neutral",
            MarketTrend::Bearish => "bearish",
            MarketTrend::StronglyBearish => "strongly_bearish",
        }
    }

    fn classify(price_change_pct: f64, volatility_pct: f64) -> Self {
        const HIGH_VOL: f64 = 5.0;
        if volatility_pct > HIGH_VOL && price_change_pct.abs() < 1.0 {
            return MarketTrend::VolatileNeutral;
        }
        if price_change_pct > 5.0 {
            MarketTrend::StronglyBullish
        } else if price_change_pct > 1.0 {
            MarketTrend::Bullish
        } else if price_change_pct < -5.0 {
            MarketTrend::StronglyBearish
        } else if price_change_pct < -1.0 {
            MarketTrend::Bearish
        } else {
            MarketTrend::Neutral
        }
    }

    fn as_score(self) -> f64 {
        match self {
            MarketTrend::StronglyBullish => 90.0,
            MarketTrend::Bullish => 70.0,
            MarketTrend::Neutral => 50.0,
            MarketTrend::VolatileNeutral => 45.0,
            MarketTrend::Bearish => 30.0,
            MarketTrend::StronglyBearish => 10.0,
        }
    }
}

#[derive(Default)]
pub struct SentimentIndicator;

struct DerivedFeatures {
    price_change_pct: f64,
    volume_change_pct: Option<f64>,
    volatility_pct: f64,
    funding_rate: f64,
    long_short_ratio: f64,
}

impl SentimentIndicator {
    fn derive(view: &PreparedView) -> Option<DerivedFeatures> {
        let frame = view.base_frame()?;
        if frame.bars.len() < 2 {
            return None;
        }

        let first = frame.bars.first()?;
        let last = frame.bars.last()?;
        let price_change_pct = if first.close.abs() > PRICE_EPSILON {
            (last.close - first.close) / first.close * 100.0
        } else {
            0.0
        };

        let volume_change_pct = if frame.bars.len() >= 2 {
            let first_vol = first.volume;
            let last_vol = last.volume;
            if first_vol.abs() > PRICE_EPSILON {
                Some((last_vol - first_vol) / first_vol * 100.0)
            } else {
                None
            }
        } else {
            None
        };

        let ranges: Vec<f64> = frame
            .bars
            .iter()
            .filter(|b| b.close.abs() > PRICE_EPSILON)
            .map(|b| (b.high - b.low) / b.close)
            .collect();
        let volatility_pct = if ranges.is_empty() {
            0.0
        } else {
            let mean = ranges.iter().sum::<f64>() / ranges.len() as f64;
            let variance = ranges.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / ranges.len() as f64;
            variance.sqrt() * 100.0
        };

        let (funding_rate, long_short_ratio) = match view.sentiment.as_ref() {
            Some(s) => (s.funding_rate.unwrap_or(0.0), s.long_short_ratio.unwrap_or(1.0)),
            None => (0.0, 1.0),
        };

        Some(DerivedFeatures {
            price_change_pct,
            volume_change_pct,
            volatility_pct,
            funding_rate,
            long_short_ratio,
        })
    }

    /// Composite fear/greed index in [0,100]: price change (40%), volume
    /// change (15%), inverse volatility (15%), long/short ratio (15%),
    /// funding rate (15%).
    fn fear_greed_index(features: &DerivedFeatures) -> f64 {
        let price_component = clip(50.0 + features.price_change_pct * 4.0, 0.0, 100.0);
        let volume_component = features
            .volume_change_pct
            .map(|v| clip(50.0 + v * 0.5, 0.0, 100.0))
            .unwrap_or(50.0);
        let volatility_component = clip(100.0 - features.volatility_pct * 5.0, 0.0, 100.0);
        let ratio_component = clip(50.0 * safe_ratio(features.long_short_ratio, 2.0, 1.0, 1e-9), 0.0, 100.0);
        let funding_component = clip(50.0 - features.funding_rate * 5_000.0, 0.0, 100.0);

        clip(
            price_component * 0.40
                + volume_component * 0.15
                + volatility_component * 0.15
                + ratio_component * 0.15
                + funding_component * 0.15,
            0.0,
            100.0,
        )
    }
}

impl Indicator for SentimentIndicator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Sentiment
    }

    fn calculate(&self, view: &PreparedView, _cache: &SnapshotCache, _config: &ConfluenceConfig) -> IndicatorResult {
        let Some(features) = Self::derive(view) else {
            return IndicatorResult::neutral_with("insufficient_history");
        };

        let trend = MarketTrend::classify(features.price_change_pct, features.volatility_pct);
        let fear_greed = Self::fear_greed_index(&features);

        let mut components = HashMap::new();
        components.insert("price_change_pct".to_string(), features.price_change_pct);
        components.insert("volatility_pct".to_string(), features.volatility_pct);
        components.insert("fear_greed".to_string(), fear_greed);
        components.insert("trend_score".to_string(), trend.as_score());
        if let Some(v) = features.volume_change_pct {
            components.insert("volume_change_pct".to_string(), v);
        }

        let score = clip((fear_greed + trend.as_score()) / 2.0, 0.0, 100.0);

        let mut signals = HashMap::new();
        signals.insert(
            "market_trend".to_string(),
            if matches!(trend, MarketTrend::StronglyBullish | MarketTrend::Bullish) {
                TriState::Bullish
            } else if matches!(trend, MarketTrend::StronglyBearish | MarketTrend::Bearish) {
                TriState::Bearish
            } else {
                TriState::Neutral
            },
        );

        let mut metadata = HashMap::new();
        metadata.insert("market_trend".to_string(), trend.as_str().to_string());

        IndicatorResult { score, components, signals, metadata }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bar, OhlcvFrame, Sentiment, Timeframe};
    use std::collections::HashMap as Map;

    fn view_with_prices(closes: &[f64]) -> PreparedView {
        let mut frame = OhlcvFrame::default();
        for (i, c) in closes.iter().enumerate() {
            frame.bars.push(Bar { ts_ms: i as i64 * 60_000, open: *c, high: c + 1.0, low: c - 1.0, close: *c, volume: 10.0 });
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
    fn neutral_without_history() {
        let view = view_with_prices(&[100.0]);
        let indicator = SentimentIndicator::default();
        let result = indicator.calculate(&view, &SnapshotCache::default(), &ConfluenceConfig::default());
        assert_eq!(result.score, 50.0);
    }

    #[test]
    fn strong_rally_classifies_strongly_bullish() {
        let view = view_with_prices(&[100.0, 110.0]);
        let indicator = SentimentIndicator::default();
        let result = indicator.calculate(&view, &SnapshotCache::default(), &ConfluenceConfig::default());
        assert_eq!(result.metadata.get("market_trend").unwrap(), "strongly_bullish");
        assert!(result.score > 50.0);
    }

    #[test]
    fn missing_sentiment_falls_back_to_neutral_funding() {
        let mut view = view_with_prices(&[100.0, 100.5]);
        view.sentiment = None;
        let features = SentimentIndicator::derive(&view).unwrap();
        assert_eq!(features.funding_rate, 0.0);
        assert_eq!(features.long_short_ratio, 1.0);
    }

    #[test]
    fn explicit_sentiment_overrides_defaults() {
        let mut view = view_with_prices(&[100.0, 100.5]);
        view.sentiment = Some(Sentiment { funding_rate: Some(0.01), long_short_ratio: Some(2.0), liquidations: vec![], open_interest: None });
        let features = SentimentIndicator::derive(&view).unwrap();
        assert_eq!(features.funding_rate, 0.01);
        assert_eq!(features.long_short_ratio, 2.0);
    }

    #[test]
    fn score_always_in_range() {
        let view = view_with_prices(&[100.0, 50.0, 500.0]);
        let indicator = SentimentIndicator::default();
        let result = indicator.calculate(&view, &SnapshotCache::default(), &ConfluenceConfig::default());
        assert!((0.0..=100.0).contains(&result.score));
        assert!(result.score.is_finite());
    }
}
