// =============================================================================
// Futures Intelligence Module
// =============================================================================
//
// Aggregates three independent data sources from the Binance Futures API:
//
//   1. Funding Rate     — contrarian signal (extreme funding predicts reversal)
//   2. Open Interest    — participation signal (OI + price divergence = caution)
//   3. Long/Short Ratio — crowd positioning (contrarian fade at extremes)
//
// Each sub-module fetches data independently. `FuturesIntelCache` polls all
// three per symbol and retains the latest reading (plus the open-interest
// reading immediately prior to it) so that `snapshot.rs` can assemble a
// `Sentiment` and `OpenInterestSample` without making a network call on every
// analysis cycle.

pub mod funding_rate;
pub mod long_short_ratio;
pub mod open_interest;

pub use funding_rate::{FundingRateMonitor, FundingState};
pub use long_short_ratio::{LSState, LongShortMonitor};
pub use open_interest::{OIState, OpenInterestTracker};

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::warn;

/// The latest futures-intelligence reading retained for one symbol.
#[derive(Debug, Clone, Copy)]
pub struct CachedIntel {
    pub oi_current: f64,
    pub oi_previous: f64,
    pub funding_rate: f64,
    pub long_short_ratio: f64,
    pub updated_at_ms: i64,
}

/// Per-symbol cache of the most recent funding-rate / open-interest /
/// long-short-ratio readings, refreshed on a poll interval independent of
/// the analysis cadence (spec.md §4.0 — the acquisition layer owns its own
/// refresh cadence for REST-polled data).
#[derive(Default)]
pub struct FuturesIntelCache {
    entries: RwLock<HashMap<String, CachedIntel>>,
}

impl FuturesIntelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str) -> Option<CachedIntel> {
        self.entries.read().get(symbol).copied()
    }

    /// Seed or overwrite the cached reading for a symbol directly, bypassing
    /// the network fetch. Used by tests and by callers replaying recorded
    /// readings.
    pub fn set(&self, symbol: &str, intel: CachedIntel) {
        self.entries.write().insert(symbol.to_string(), intel);
    }

    /// Fetch all three sources for `symbol` and update the cache. Each
    /// source is independent -- a failure in one does not block the others
    /// from updating, mirroring the donor's per-source `warn!`-and-continue
    /// style.
    pub async fn refresh(
        &self,
        symbol: &str,
        funding: &FundingRateMonitor,
        long_short: &LongShortMonitor,
        open_interest: &OpenInterestTracker,
    ) {
        let previous = self.get(symbol);

        let funding_rate = match funding.fetch(symbol).await {
            Ok(state) => Some(state.rate),
            Err(e) => {
                warn!(symbol, error = %e, "funding rate refresh failed");
                None
            }
        };

        let long_short_ratio = match long_short.fetch(symbol).await {
            Ok(state) => Some(state.ratio),
            Err(e) => {
                warn!(symbol, error = %e, "long/short ratio refresh failed");
                None
            }
        };

        let oi_current = match open_interest.fetch(symbol).await {
            Ok(state) => Some(state.current_oi),
            Err(e) => {
                warn!(symbol, error = %e, "open interest refresh failed");
                None
            }
        };

        let merged = CachedIntel {
            oi_current: oi_current.unwrap_or_else(|| previous.map_or(0.0, |p| p.oi_current)),
            oi_previous: previous.map_or(0.0, |p| p.oi_current),
            funding_rate: funding_rate.unwrap_or_else(|| previous.map_or(0.0, |p| p.funding_rate)),
            long_short_ratio: long_short_ratio
                .unwrap_or_else(|| previous.map_or(1.0, |p| p.long_short_ratio)),
            updated_at_ms: chrono::Utc::now().timestamp_millis(),
        };

        self.entries.write().insert(symbol.to_string(), merged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_starts_empty() {
        let cache = FuturesIntelCache::new();
        assert!(cache.get("BTCUSDT").is_none());
    }

    #[test]
    fn manual_rotation_preserves_prior_oi_as_previous() {
        let cache = FuturesIntelCache::new();
        cache.set(
            "BTCUSDT",
            CachedIntel { oi_current: 1000.0, oi_previous: 0.0, funding_rate: 0.0001, long_short_ratio: 1.2, updated_at_ms: 1 },
        );
        let first = cache.get("BTCUSDT").unwrap();
        let rotated = CachedIntel {
            oi_current: 1040.0,
            oi_previous: first.oi_current,
            funding_rate: first.funding_rate,
            long_short_ratio: first.long_short_ratio,
            updated_at_ms: 2,
        };
        cache.set("BTCUSDT", rotated);
        let second = cache.get("BTCUSDT").unwrap();
        assert_eq!(second.oi_previous, 1000.0);
        assert_eq!(second.oi_current, 1040.0);
    }
}
