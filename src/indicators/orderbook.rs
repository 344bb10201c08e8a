// =============================================================================
// Orderbook indicator (spec.md §4.2.c)
// =============================================================================
//
// Reads the level-2 book the shaper cleaned and stamps with a snapshot
// timestamp, and scores imbalance, spread, depth, and price-impact axes.
// Neutral whenever either side has fewer than three levels — below that,
// per-level sub-scores are dominated by noise rather than real liquidity
// structure (spec.md §4.2.c edge case).

use std::collections::HashMap;

use crate::confluence::cache::SnapshotCache;
use crate::config::ConfluenceConfig;
use crate::indicators::{clip, safe_ratio, Indicator, PRICE_EPSILON, VOLUME_EPSILON};
use crate::shaper::PreparedView;
use crate::types::{IndicatorKind, IndicatorResult, OrderBook, TriState};

const MIN_LEVELS: usize = 3;

#[derive(Default)]
pub struct OrderbookIndicator;

impl OrderbookIndicator {
    /// Bid depth share of total depth across the first `MIN_LEVELS.max(depth)`
    /// levels, in [0,100].
    fn imbalance_score(book: &OrderBook) -> f64 {
        let depth = book.depth_levels();
        let bid_vol: f64 = book.bids[..depth].iter().map(|l| l.size).sum();
        let ask_vol: f64 = book.asks[..depth].iter().map(|l| l.size).sum();
        let total = bid_vol + ask_vol;
        clip(100.0 * safe_ratio(bid_vol, total, 0.5, VOLUME_EPSILON), 0.0, 100.0)
    }

    /// Narrower relative spread scores higher (more liquid / less uncertain).
    fn spread_score(book: &OrderBook) -> Option<f64> {
        let bid = book.best_bid()?;
        let ask = book.best_ask()?;
        let mid = (bid.price + ask.price) / 2.0;
        if mid <= PRICE_EPSILON {
            return None;
        }
        let spread_pct = (ask.price - bid.price) / mid;
        // 0% spread -> 100, 0.5% spread or wider -> 0.
        Some(clip(100.0 - spread_pct * 20_000.0, 0.0, 100.0))
    }

    /// Ratio of total depth to the best-level size, an indicator of how much
    /// liquidity sits beyond the touch versus concentrated at it.
    fn depth_score(book: &OrderBook) -> Option<f64> {
        let depth = book.depth_levels();
        if depth < MIN_LEVELS {
            return None;
        }
        let touch = book.bids[0].size.min(book.asks[0].size);
        let total: f64 = book.bids[..depth].iter().map(|l| l.size).sum::<f64>()
            + book.asks[..depth].iter().map(|l| l.size).sum::<f64>();
        let ratio = safe_ratio(total, touch, 1.0, VOLUME_EPSILON);
        // Shallow book (ratio near 2, i.e. mostly touch liquidity) -> 50;
        // deep book (ratio >> depth) -> up toward 100.
        Some(clip(30.0 + ratio, 0.0, 100.0))
    }

    /// Estimated price impact (%) of a market order sized at the touch
    /// depth walking the book, bid side vs ask side; a cheaper bid-side
    /// impact than ask-side implies upward pressure.
    fn price_impact_score(book: &OrderBook) -> Option<f64> {
        let mid = book.mid()?;
        if mid <= PRICE_EPSILON {
            return None;
        }
        let target_size = book.bids[0].size.max(book.asks[0].size) * 5.0;

        let walk = |levels: &[crate::types::Level]| -> Option<f64> {
            let mut remaining = target_size;
            let mut notional = 0.0;
            let mut filled = 0.0;
            for l in levels {
                if remaining <= 0.0 {
                    break;
                }
                let take = l.size.min(remaining);
                notional += take * l.price;
                filled += take;
                remaining -= take;
            }
            if filled <= VOLUME_EPSILON {
                return None;
            }
            Some(notional / filled)
        };

        let bid_avg = walk(&book.bids)?;
        let ask_avg = walk(&book.asks)?;
        let bid_impact = (mid - bid_avg).abs() / mid;
        let ask_impact = (ask_avg - mid).abs() / mid;

        // Cheaper to sell into the bid side than buy the ask side implies
        // sell-side pressure is thin relative to buy-side -> bullish tilt.
        let tilt = ask_impact - bid_impact;
        Some(clip(50.0 + tilt * 5_000.0, 0.0, 100.0))
    }
}

impl Indicator for OrderbookIndicator {
    fn kind(&self) -> IndicatorKind {
        IndicatorKind::Orderbook
    }

    fn calculate(&self, view: &PreparedView, _cache: &SnapshotCache, _config: &ConfluenceConfig) -> IndicatorResult {
        let Some(book) = view.orderbook.as_ref() else {
            return IndicatorResult::neutral_with("no_orderbook");
        };
        if book.bids.len() < MIN_LEVELS || book.asks.len() < MIN_LEVELS {
            return IndicatorResult::neutral_with("insufficient_depth");
        }

        let mut components = HashMap::new();
        let mut scores = Vec::new();

        let imbalance = Self::imbalance_score(book);
        components.insert("imbalance".to_string(), imbalance);
        scores.push(imbalance);

        if let Some(s) = Self::spread_score(book) {
            components.insert("spread".to_string(), s);
            scores.push(s);
        }
        if let Some(s) = Self::depth_score(book) {
            components.insert("depth".to_string(), s);
            scores.push(s);
        }
        if let Some(s) = Self::price_impact_score(book) {
            components.insert("price_impact".to_string(), s);
            scores.push(s);
        }

        if scores.is_empty() {
            return IndicatorResult::neutral_with("no_usable_book_metrics");
        }

        let score = clip(scores.iter().sum::<f64>() / scores.len() as f64, 0.0, 100.0);

        let mut signals = HashMap::new();
        signals.insert(
            "book_bias".to_string(),
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
