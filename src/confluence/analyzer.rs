// =============================================================================
// Confluence Analyzer (C3)
// =============================================================================
//
// `analyze(snapshot) -> FusionResult`: fans out to all six indicators, tolerates
// individual indicator failure/timeout by excluding that indicator from
// fusion, and never returns an error — only ever a syntactically valid
// `FusionResult` (spec.md §4.3, §7).
//
// Grounded on the donor's `main.rs` `tokio::spawn` + soft-timeout idiom,
// generalized from "one task per WebSocket stream" to "one task per
// indicator, joined with a per-task soft timeout and an outer hard budget"
// (spec.md §9's redesign note on coroutine orchestration -> tasks + join).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::ConfluenceConfig;
use crate::confluence::cache::SnapshotCache;
use crate::confluence::fusion;
use crate::error::CoreError;
use crate::indicators::orderbook::OrderbookIndicator;
use crate::indicators::orderflow::OrderflowIndicator;
use crate::indicators::price_structure::PriceStructureIndicator;
use crate::indicators::sentiment::SentimentIndicator;
use crate::indicators::technical::TechnicalIndicator;
use crate::indicators::volume::VolumeIndicator;
use crate::indicators::Indicator;
use crate::shaper;
use crate::types::{FusionResult, IndicatorKind, IndicatorResult, MarketSnapshot};

/// Orchestrates C1 -> six parallel C2 calls -> fusion, for one snapshot at a
/// time. Holds only immutable configuration; no snapshot-scoped state
/// survives past a single `analyze` call.
pub struct Analyzer {
    config: Arc<ConfluenceConfig>,
}

impl Analyzer {
    pub fn new(config: Arc<ConfluenceConfig>) -> Self {
        Self { config }
    }

    pub async fn analyze(&self, snapshot: &MarketSnapshot) -> FusionResult {
        let view = match shaper::prepare(snapshot, self.config.min_candles) {
            Some(v) => v,
            None => {
                warn!(symbol = %snapshot.symbol, "snapshot failed top-level validation");
                return FusionResult::neutral();
            }
        };

        let cache = Arc::new(SnapshotCache::new(self.config.tracker.cache_capacity.min(4096)));
        let view = Arc::new(view);
        let config = self.config.clone();

        let soft_budget = Duration::from_millis(config.indicator_soft_budget_ms);
        let hard_budget = Duration::from_millis(config.analysis_hard_budget_ms);

        let indicators: Vec<Box<dyn Indicator + Send + Sync>> = vec![
            Box::new(TechnicalIndicator::default()),
            Box::new(VolumeIndicator::default()),
            Box::new(OrderbookIndicator::default()),
            Box::new(OrderflowIndicator::default()),
            Box::new(SentimentIndicator::default()),
            Box::new(PriceStructureIndicator::default()),
        ];
        let total_expected = indicators.len();

        let mut handles = Vec::with_capacity(indicators.len());
        for indicator in indicators {
            let view = view.clone();
            let cache = cache.clone();
            let config = config.clone();
            let handle = tokio::spawn(async move {
                let kind = indicator.kind();
                let fut = async { indicator.calculate(&view, &cache, &config) };
                match tokio::time::timeout(soft_budget, fut).await {
                    Ok(result) => Some((kind, result)),
                    Err(_) => {
                        let err = CoreError::IndicatorTimeout { indicator: kind };
                        warn!(%kind, error = %err, "indicator exceeded its soft timeout");
                        None
                    }
                }
            });
            handles.push(handle);
        }

        let joined = futures_util::future::join_all(handles);
        let results: HashMap<IndicatorKind, IndicatorResult> =
            match tokio::time::timeout(hard_budget, joined).await {
                Ok(outcomes) => outcomes
                    .into_iter()
                    .filter_map(|r| r.ok().flatten())
                    .collect(),
                Err(_) => {
                    warn!(symbol = %snapshot.symbol, error = %CoreError::AnalysisTimeout, "analysis exceeded its hard timeout budget");
                    HashMap::new()
                }
            };

        if results.is_empty() {
            warn!(symbol = %snapshot.symbol, "every indicator failed or timed out");
            return FusionResult::neutral();
        }

        fusion::fuse(&results, &config, total_expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bar, OhlcvFrame, Timeframe};

    fn snapshot_with_bars(n: i64) -> MarketSnapshot {
        let mut frame = OhlcvFrame::default();
        for i in 0..n {
            frame.bars.push(Bar {
                ts_ms: i * 60_000,
                open: 100.0 + i as f64,
                high: 101.0 + i as f64,
                low: 99.0 + i as f64,
                close: 100.0 + i as f64,
                volume: 10.0,
            });
        }
        let mut ohlcv = HashMap::new();
        ohlcv.insert(Timeframe::Base, frame);
        MarketSnapshot {
            symbol: "BTCUSDT".into(),
            exchange: "test".into(),
            timestamp_ms: 1,
            ohlcv,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn invalid_snapshot_yields_neutral_result() {
        let analyzer = Analyzer::new(Arc::new(ConfluenceConfig::default()));
        let fused = analyzer.analyze(&MarketSnapshot::default()).await;
        assert_eq!(fused.reliability, 0.0);
        assert_eq!(fused.score, 50.0);
    }

    #[tokio::test]
    async fn valid_snapshot_produces_in_range_result() {
        let analyzer = Analyzer::new(Arc::new(ConfluenceConfig::default()));
        let snapshot = snapshot_with_bars(60);
        let fused = analyzer.analyze(&snapshot).await;
        assert!((0.0..=100.0).contains(&fused.score));
        assert!(fused.score.is_finite());
        assert!(fused.consensus > 0.0 && fused.consensus <= 1.0);
        assert!(fused.disagreement >= 0.0);
    }

    #[tokio::test]
    async fn analysis_is_deterministic() {
        let analyzer = Analyzer::new(Arc::new(ConfluenceConfig::default()));
        let snapshot = snapshot_with_bars(60);
        let a = analyzer.analyze(&snapshot).await;
        let b = analyzer.analyze(&snapshot).await;
        assert_eq!(a.score, b.score);
        assert_eq!(a.score_raw, b.score_raw);
    }
}
