// =============================================================================
// Signal Generator (C4)
// =============================================================================
//
// `generate(fusion_result, symbol, timestamp_ms, price) -> (Option<Signal>,
// QualityRecord)`: quality filter, threshold classifier, strength bucketing,
// per-symbol dedup/cooldown, then a `QualityRecord` the caller hands to the
// tracker and an optional `Signal` the caller hands to the sink (spec.md
// §4.4). Decision order follows the spec exactly; failures in either
// downstream consumer are the caller's concern, not this type's -- `generate`
// itself never fails.
//
// Grounded on `signals/signal_decay.rs`'s `RwLock<HashMap<key, Entry {
// .., recorded_at: Instant }>>` shape, repurposed here from strength-decay
// lookup to cooldown-window lookup: same per-key timestamped-entry table
// guarded by `parking_lot::RwLock`, same `Instant`-based elapsed-time check.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;

use crate::config::{ConfluenceConfig, Thresholds as ConfigThresholds};
use crate::types::{FusionResult, QualityRecord, Signal, SignalStrength, SignalType, Thresholds};

struct CooldownEntry {
    signal_type: SignalType,
    dispatched_at: Instant,
}

/// Outcome of one `generate` call: the quality record always gets written to
/// the tracker; the signal is only present when the candidate survived every
/// gate.
pub struct SignalOutcome {
    pub signal: Option<Signal>,
    pub quality_record: QualityRecord,
}

/// Classifies fused confluence scores into dispatchable trade signals.
/// Holds the per-symbol dedup/cooldown table; otherwise stateless.
pub struct SignalGenerator {
    config: Arc<ConfluenceConfig>,
    cooldowns: RwLock<HashMap<String, CooldownEntry>>,
}

fn classify(score: f64, thresholds: &ConfigThresholds) -> SignalType {
    if score >= thresholds.buy {
        SignalType::Buy
    } else if score <= thresholds.sell {
        SignalType::Sell
    } else {
        SignalType::Hold
    }
}

fn classify_strength(signal_type: SignalType, score: f64) -> SignalStrength {
    match signal_type {
        SignalType::Buy => {
            if score >= 80.0 {
                SignalStrength::VeryStrong
            } else if score >= 70.0 {
                SignalStrength::Strong
            } else {
                SignalStrength::Moderate
            }
        }
        SignalType::Sell => {
            if score <= 20.0 {
                SignalStrength::VeryStrong
            } else if score <= 30.0 {
                SignalStrength::Strong
            } else {
                SignalStrength::Moderate
            }
        }
        SignalType::Hold => SignalStrength::Moderate,
    }
}

impl SignalGenerator {
    pub fn new(config: Arc<ConfluenceConfig>) -> Self {
        Self { config, cooldowns: RwLock::new(HashMap::new()) }
    }

    /// Returns `true` if a candidate of `signal_type` for `symbol` clears the
    /// dedup/cooldown gate (and records the dispatch), `false` if it should
    /// be suppressed.
    ///
    /// A same-direction repeat within `cooldown_seconds` is suppressed. A
    /// type flip (BUY<->SELL) bypasses the cooldown clock only once the new
    /// score has cleared the opposite threshold by at least
    /// `thresholds.neutral_buffer`; otherwise it is treated like a
    /// same-direction repeat, preventing threshold-boundary flicker from
    /// dispatching a flip every few ticks.
    fn check_cooldown(&self, symbol: &str, signal_type: SignalType, score: f64) -> bool {
        let mut table = self.cooldowns.write();
        let now = Instant::now();

        if let Some(entry) = table.get(symbol) {
            if entry.signal_type == signal_type {
                let elapsed = now.duration_since(entry.dispatched_at).as_secs();
                if elapsed < self.config.cooldown_seconds {
                    return false;
                }
            } else {
                let buffer = self.config.thresholds.neutral_buffer;
                let cleared = match signal_type {
                    SignalType::Buy => score >= self.config.thresholds.buy + buffer,
                    SignalType::Sell => score <= self.config.thresholds.sell - buffer,
                    SignalType::Hold => true,
                };
                if !cleared {
                    let elapsed = now.duration_since(entry.dispatched_at).as_secs();
                    if elapsed < self.config.cooldown_seconds {
                        return false;
                    }
                }
            }
        }

        table.insert(symbol.to_string(), CooldownEntry { signal_type, dispatched_at: now });
        true
    }

    /// Run one fused score through the full decision pipeline.
    pub fn generate(&self, fusion: &FusionResult, symbol: &str, timestamp_ms: i64, price: f64) -> SignalOutcome {
        let classification = classify(fusion.score, &self.config.thresholds);

        let mut filtered = false;
        let mut filter_reason: Option<String> = None;

        if self.config.quality_filter.enabled {
            if fusion.confidence < self.config.quality_filter.min_confidence {
                filtered = true;
                filter_reason = Some("low_confidence".to_string());
            } else if fusion.disagreement > self.config.quality_filter.max_disagreement {
                filtered = true;
                filter_reason = Some("high_disagreement".to_string());
            }
        }

        let mut signal = None;
        if !filtered && classification != SignalType::Hold {
            if self.check_cooldown(symbol, classification, fusion.score) {
                let strength = classify_strength(classification, fusion.score);
                let components: HashMap<String, f64> = fusion
                    .components
                    .iter()
                    .map(|(kind, result)| (kind.to_string(), result.score))
                    .collect();

                signal = Some(Signal {
                    symbol: symbol.to_string(),
                    timestamp_ms,
                    signal_type: classification,
                    strength,
                    score: fusion.score,
                    consensus: fusion.consensus,
                    confidence: fusion.confidence,
                    disagreement: fusion.disagreement,
                    price,
                    components,
                    thresholds: Thresholds { buy: self.config.thresholds.buy, sell: self.config.thresholds.sell },
                });
            } else {
                filtered = true;
                filter_reason = Some("cooldown".to_string());
            }
        }

        let score_base = ((fusion.score_raw + 1.0) / 2.0 * 100.0).clamp(0.0, 100.0);
        let quality_record = QualityRecord {
            ts_iso: Utc::now().to_rfc3339(),
            ts_ms: timestamp_ms,
            symbol: symbol.to_string(),
            score_adjusted: fusion.score,
            score_base,
            quality_impact: fusion.score - score_base,
            consensus: fusion.consensus,
            confidence: fusion.confidence,
            disagreement: fusion.disagreement,
            signal_type: Some(classification),
            filtered,
            filter_reason,
        };

        SignalOutcome { signal, quality_record }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IndicatorKind;

    fn fusion(score: f64, confidence: f64, disagreement: f64) -> FusionResult {
        FusionResult {
            score,
            score_raw: (score / 100.0) * 2.0 - 1.0,
            consensus: 1.0 - disagreement,
            confidence,
            disagreement,
            components: HashMap::new(),
            reliability: 1.0,
        }
    }

    #[test]
    fn strong_confident_score_dispatches_buy() {
        let gen = SignalGenerator::new(Arc::new(ConfluenceConfig::default()));
        let outcome = gen.generate(&fusion(85.0, 0.8, 0.05), "BTCUSDT", 1, 50000.0);
        let signal = outcome.signal.expect("expected a dispatched signal");
        assert_eq!(signal.signal_type, SignalType::Buy);
        assert_eq!(signal.strength, SignalStrength::VeryStrong);
        assert!(!outcome.quality_record.filtered);
    }

    #[test]
    fn low_confidence_is_filtered_even_above_buy_threshold() {
        let gen = SignalGenerator::new(Arc::new(ConfluenceConfig::default()));
        let outcome = gen.generate(&fusion(85.0, 0.1, 0.05), "BTCUSDT", 1, 50000.0);
        assert!(outcome.signal.is_none());
        assert_eq!(outcome.quality_record.filter_reason.as_deref(), Some("low_confidence"));
    }

    #[test]
    fn high_disagreement_is_filtered() {
        let gen = SignalGenerator::new(Arc::new(ConfluenceConfig::default()));
        let outcome = gen.generate(&fusion(85.0, 0.8, 0.5), "BTCUSDT", 1, 50000.0);
        assert!(outcome.signal.is_none());
        assert_eq!(outcome.quality_record.filter_reason.as_deref(), Some("high_disagreement"));
    }

    #[test]
    fn mid_range_score_is_hold_and_not_dispatched() {
        let gen = SignalGenerator::new(Arc::new(ConfluenceConfig::default()));
        let outcome = gen.generate(&fusion(50.0, 0.8, 0.05), "BTCUSDT", 1, 50000.0);
        assert!(outcome.signal.is_none());
        assert_eq!(outcome.quality_record.signal_type, Some(SignalType::Hold));
        assert!(!outcome.quality_record.filtered);
    }

    #[test]
    fn repeat_buy_within_cooldown_is_suppressed() {
        let gen = SignalGenerator::new(Arc::new(ConfluenceConfig::default()));
        let first = gen.generate(&fusion(85.0, 0.8, 0.05), "BTCUSDT", 1, 50000.0);
        assert!(first.signal.is_some());
        let second = gen.generate(&fusion(86.0, 0.8, 0.05), "BTCUSDT", 2, 50010.0);
        assert!(second.signal.is_none());
        assert_eq!(second.quality_record.filter_reason.as_deref(), Some("cooldown"));
    }

    #[test]
    fn distinct_symbols_have_independent_cooldowns() {
        let gen = SignalGenerator::new(Arc::new(ConfluenceConfig::default()));
        gen.generate(&fusion(85.0, 0.8, 0.05), "BTCUSDT", 1, 50000.0);
        let outcome = gen.generate(&fusion(85.0, 0.8, 0.05), "ETHUSDT", 1, 3000.0);
        assert!(outcome.signal.is_some());
    }

    #[test]
    fn type_flip_clearing_buffer_bypasses_cooldown() {
        let gen = SignalGenerator::new(Arc::new(ConfluenceConfig::default()));
        let first = gen.generate(&fusion(85.0, 0.8, 0.05), "BTCUSDT", 1, 50000.0);
        assert!(first.signal.is_some());
        // Sell threshold is 35, buffer 5 -> needs <= 30 to bypass cooldown.
        let flipped = gen.generate(&fusion(20.0, 0.8, 0.05), "BTCUSDT", 2, 49000.0);
        assert!(flipped.signal.is_some());
        assert_eq!(flipped.signal.unwrap().signal_type, SignalType::Sell);
    }

    #[test]
    fn quality_filter_disabled_lets_low_confidence_through() {
        let mut cfg = ConfluenceConfig::default();
        cfg.quality_filter.enabled = false;
        let gen = SignalGenerator::new(Arc::new(cfg));
        let outcome = gen.generate(&fusion(85.0, 0.0, 0.9), "BTCUSDT", 1, 50000.0);
        assert!(outcome.signal.is_some());
    }

    #[test]
    fn quality_record_reports_indicator_unaware_score_base() {
        let gen = SignalGenerator::new(Arc::new(ConfluenceConfig::default()));
        let outcome = gen.generate(&fusion(50.0, 1.0, 0.0), "BTCUSDT", 1, 100.0);
        assert!((outcome.quality_record.score_base - 50.0).abs() < 1e-9);
        assert!(outcome.quality_record.quality_impact.abs() < 1e-9);
        let _ = IndicatorKind::ALL;
    }
}
