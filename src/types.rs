// =============================================================================
// Shared data model for the confluence analysis pipeline
// =============================================================================
//
// Every wire-shape type components pass between each other lives here: the
// inbound `MarketSnapshot`, the per-component `IndicatorResult`, the fused
// `FusionResult`, the outbound `Signal`, and the append-only `QualityRecord`.
// Optional fields carry `#[serde(default)]` so the shape can evolve without
// breaking deserialization of older payloads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The four canonical period tags this system uses internally, regardless of
/// the exchange-native interval label a snapshot arrived with. Ordered
/// `Base <= Ltf <= Mtf <= Htf` by period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    Base,
    Ltf,
    Mtf,
    Htf,
}

impl Timeframe {
    pub const ALL: [Timeframe; 4] = [Timeframe::Base, Timeframe::Ltf, Timeframe::Mtf, Timeframe::Htf];

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::Base => "base",
            Timeframe::Ltf => "ltf",
            Timeframe::Mtf => "mtf",
            Timeframe::Htf => "htf",
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single OHLCV bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// An ordered sequence of bars for one timeframe tag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OhlcvFrame {
    pub bars: Vec<Bar>,
}

impl OhlcvFrame {
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|b| b.close)
    }

    /// Timestamps strictly increasing, at least `min_candles` bars, and at
    /// least one finite close.
    pub fn is_structurally_valid(&self, min_candles: usize) -> bool {
        if self.bars.len() < min_candles {
            return false;
        }
        self.bars.windows(2).all(|w| w[1].ts_ms > w[0].ts_ms)
            && self.bars.iter().any(|b| b.close.is_finite())
    }
}

/// A single price/size level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: f64,
    pub size: f64,
}

/// A two-sided orderbook snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    /// Descending in price.
    pub bids: Vec<Level>,
    /// Ascending in price.
    pub asks: Vec<Level>,
    pub timestamp_ms: i64,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<Level> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<Level> {
        self.asks.first().copied()
    }

    /// Mid price, valid only when both sides are present and the book isn't
    /// crossed.
    pub fn mid(&self) -> Option<f64> {
        let bid = self.best_bid()?;
        let ask = self.best_ask()?;
        if ask.price > bid.price {
            Some((bid.price + ask.price) / 2.0)
        } else {
            None
        }
    }

    pub fn depth_levels(&self) -> usize {
        self.bids.len().min(self.asks.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Buy,
    Sell,
    Unknown,
}

impl Default for TradeSide {
    fn default() -> Self {
        TradeSide::Unknown
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub price: f64,
    pub size: f64,
    pub side: TradeSide,
    pub ts_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ticker {
    #[serde(default)]
    pub last: Option<f64>,
    #[serde(default)]
    pub bid: Option<f64>,
    #[serde(default)]
    pub ask: Option<f64>,
    #[serde(default)]
    pub high: Option<f64>,
    #[serde(default)]
    pub low: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub percentage: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OpenInterestSample {
    pub current: f64,
    pub previous: f64,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Liquidation {
    pub side: TradeSide,
    pub price: f64,
    pub size: f64,
    pub ts_ms: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sentiment {
    #[serde(default)]
    pub funding_rate: Option<f64>,
    #[serde(default)]
    pub long_short_ratio: Option<f64>,
    #[serde(default)]
    pub liquidations: Vec<Liquidation>,
    #[serde(default)]
    pub open_interest: Option<f64>,
}

/// One sample for one symbol at one instant: the unit of work the core
/// pipeline is handed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub exchange: String,
    pub timestamp_ms: i64,
    pub ohlcv: HashMap<Timeframe, OhlcvFrame>,
    #[serde(default)]
    pub orderbook: Option<OrderBook>,
    #[serde(default)]
    pub trades: Vec<Trade>,
    #[serde(default)]
    pub ticker: Option<Ticker>,
    #[serde(default)]
    pub open_interest: Option<OpenInterestSample>,
    #[serde(default)]
    pub sentiment: Option<Sentiment>,
}

impl MarketSnapshot {
    pub fn is_structurally_valid(&self) -> bool {
        !self.symbol.is_empty() && self.timestamp_ms > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndicatorKind {
    Technical,
    Volume,
    Orderbook,
    Orderflow,
    Sentiment,
    PriceStructure,
}

impl IndicatorKind {
    pub const ALL: [IndicatorKind; 6] = [
        IndicatorKind::Technical,
        IndicatorKind::Volume,
        IndicatorKind::Orderbook,
        IndicatorKind::Orderflow,
        IndicatorKind::Sentiment,
        IndicatorKind::PriceStructure,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IndicatorKind::Technical => "technical",
            IndicatorKind::Volume => "volume",
            IndicatorKind::Orderbook => "orderbook",
            IndicatorKind::Orderflow => "orderflow",
            IndicatorKind::Sentiment => "sentiment",
            IndicatorKind::PriceStructure => "price_structure",
        }
    }
}

impl std::fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriState {
    Bullish,
    Bearish,
    Neutral,
}

/// Output of one indicator's `calculate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorResult {
    pub score: f64,
    pub components: HashMap<String, f64>,
    pub signals: HashMap<String, TriState>,
    pub metadata: HashMap<String, String>,
}

impl IndicatorResult {
    /// The neutral result every indicator falls back to on insufficient
    /// data or a numeric anomaly.
    pub fn neutral() -> Self {
        Self {
            score: 50.0,
            components: HashMap::new(),
            signals: HashMap::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn neutral_with(reason: &str) -> Self {
        let mut r = Self::neutral();
        r.metadata.insert("reason".to_string(), reason.to_string());
        r
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionResult {
    pub score: f64,
    pub score_raw: f64,
    pub consensus: f64,
    pub confidence: f64,
    pub disagreement: f64,
    pub components: HashMap<IndicatorKind, IndicatorResult>,
    pub reliability: f64,
}

impl FusionResult {
    /// Returned on validation failure or when every indicator fails.
    pub fn neutral() -> Self {
        Self {
            score: 50.0,
            score_raw: 0.0,
            consensus: 1.0,
            confidence: 0.0,
            disagreement: 0.0,
            components: HashMap::new(),
            reliability: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalType {
    Buy,
    Sell,
    Hold,
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalType::Buy => write!(f, "BUY"),
            SignalType::Sell => write!(f, "SELL"),
            SignalType::Hold => write!(f, "HOLD"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalStrength {
    VeryStrong,
    Strong,
    Moderate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    pub buy: f64,
    pub sell: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub timestamp_ms: i64,
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub strength: SignalStrength,
    pub score: f64,
    pub consensus: f64,
    pub confidence: f64,
    pub disagreement: f64,
    pub price: f64,
    pub components: HashMap<String, f64>,
    pub thresholds: Thresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityRecord {
    pub ts_iso: String,
    pub ts_ms: i64,
    pub symbol: String,
    pub score_adjusted: f64,
    pub score_base: f64,
    pub quality_impact: f64,
    pub consensus: f64,
    pub confidence: f64,
    pub disagreement: f64,
    #[serde(default)]
    pub signal_type: Option<SignalType>,
    pub filtered: bool,
    #[serde(default)]
    pub filter_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframe_ordering() {
        assert!(Timeframe::Base < Timeframe::Ltf);
        assert!(Timeframe::Ltf < Timeframe::Mtf);
        assert!(Timeframe::Mtf < Timeframe::Htf);
    }

    #[test]
    fn orderbook_mid_requires_uncrossed_book() {
        let mut ob = OrderBook::default();
        ob.bids.push(Level { price: 100.0, size: 1.0 });
        ob.asks.push(Level { price: 101.0, size: 1.0 });
        assert_eq!(ob.mid(), Some(100.5));

        let mut crossed = OrderBook::default();
        crossed.bids.push(Level { price: 101.0, size: 1.0 });
        crossed.asks.push(Level { price: 100.0, size: 1.0 });
        assert_eq!(crossed.mid(), None);
    }

    #[test]
    fn orderbook_mid_empty_book_is_none() {
        assert_eq!(OrderBook::default().mid(), None);
    }

    #[test]
    fn indicator_result_neutral_is_in_range() {
        let r = IndicatorResult::neutral();
        assert_eq!(r.score, 50.0);
    }

    #[test]
    fn ohlcv_frame_structural_validity() {
        let mut frame = OhlcvFrame::default();
        for i in 0..25 {
            frame.bars.push(Bar {
                ts_ms: i * 1000,
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 1.0,
            });
        }
        assert!(frame.is_structurally_valid(20));
        assert!(!frame.is_structurally_valid(50));
    }
}
