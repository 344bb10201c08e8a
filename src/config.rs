// =============================================================================
// ConfluenceConfig — immutable configuration for the analysis pipeline
// =============================================================================
//
// A single configuration value built once at startup and passed into the
// pipeline by reference — no singleton, no package-level mutation. This
// replaces the source's global config dict (spec.md §9 redesign note).
//
// Persistence follows the donor's `runtime_config.rs` atomic tmp + rename
// pattern; every field carries `#[serde(default = "...")]` so that loading
// an older config file never fails when a new field is added.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::CoreError;
use crate::types::IndicatorKind;

fn default_component_weights() -> HashMap<IndicatorKind, f64> {
    let mut m = HashMap::new();
    m.insert(IndicatorKind::Technical, 0.20);
    m.insert(IndicatorKind::Volume, 0.10);
    m.insert(IndicatorKind::Orderflow, 0.25);
    m.insert(IndicatorKind::Sentiment, 0.15);
    m.insert(IndicatorKind::Orderbook, 0.20);
    m.insert(IndicatorKind::PriceStructure, 0.10);
    m
}

fn default_buy_threshold() -> f64 {
    68.0
}

fn default_sell_threshold() -> f64 {
    35.0
}

fn default_neutral_buffer() -> f64 {
    5.0
}

fn default_min_confidence() -> f64 {
    0.3
}

fn default_max_disagreement() -> f64 {
    0.3
}

fn default_cooldown_seconds() -> u64 {
    300
}

fn default_cvd_saturation() -> f64 {
    0.15
}

fn default_minimal_change_threshold() -> f64 {
    0.02
}

fn default_price_direction_threshold() -> f64 {
    0.01
}

fn default_oi_saturation_threshold() -> f64 {
    2.0
}

fn default_price_saturation_threshold() -> f64 {
    1.0
}

fn default_log_dir() -> String {
    "logs/quality_metrics".to_string()
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_min_candles() -> usize {
    20
}

fn default_indicator_soft_budget_ms() -> u64 {
    1000
}

fn default_analysis_hard_budget_ms() -> u64 {
    5000
}

fn default_base_interval() -> String {
    "1m".to_string()
}

fn default_ltf_interval() -> String {
    "5m".to_string()
}

fn default_mtf_interval() -> String {
    "1h".to_string()
}

fn default_htf_interval() -> String {
    "4h".to_string()
}

/// `confluence.thresholds`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_buy_threshold")]
    pub buy: f64,
    #[serde(default = "default_sell_threshold")]
    pub sell: f64,
    #[serde(default = "default_neutral_buffer")]
    pub neutral_buffer: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            buy: default_buy_threshold(),
            sell: default_sell_threshold(),
            neutral_buffer: default_neutral_buffer(),
        }
    }
}

/// `confluence.quality_filter`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityFilterConfig {
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_max_disagreement")]
    pub max_disagreement: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for QualityFilterConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            max_disagreement: default_max_disagreement(),
            enabled: true,
        }
    }
}

pub(crate) fn default_true() -> bool {
    true
}

/// `orderflow.open_interest.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenInterestConfig {
    #[serde(default = "default_minimal_change_threshold")]
    pub minimal_change_threshold: f64,
    #[serde(default = "default_price_direction_threshold")]
    pub price_direction_threshold: f64,
    #[serde(default = "default_oi_saturation_threshold")]
    pub oi_saturation_threshold: f64,
    #[serde(default = "default_price_saturation_threshold")]
    pub price_saturation_threshold: f64,
}

impl Default for OpenInterestConfig {
    fn default() -> Self {
        Self {
            minimal_change_threshold: default_minimal_change_threshold(),
            price_direction_threshold: default_price_direction_threshold(),
            oi_saturation_threshold: default_oi_saturation_threshold(),
            price_saturation_threshold: default_price_saturation_threshold(),
        }
    }
}

/// `orderflow.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderflowConfig {
    #[serde(default = "default_cvd_saturation")]
    pub cvd_saturation_threshold: f64,
    #[serde(default)]
    pub open_interest: OpenInterestConfig,
}

impl Default for OrderflowConfig {
    fn default() -> Self {
        Self {
            cvd_saturation_threshold: default_cvd_saturation(),
            open_interest: OpenInterestConfig::default(),
        }
    }
}

/// `timeframes.{base,ltf,mtf,htf}.interval` — exchange-native labels used by
/// the interval→tag resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeframeIntervals {
    #[serde(default = "default_base_interval")]
    pub base: String,
    #[serde(default = "default_ltf_interval")]
    pub ltf: String,
    #[serde(default = "default_mtf_interval")]
    pub mtf: String,
    #[serde(default = "default_htf_interval")]
    pub htf: String,
}

impl Default for TimeframeIntervals {
    fn default() -> Self {
        Self {
            base: default_base_interval(),
            ltf: default_ltf_interval(),
            mtf: default_mtf_interval(),
            htf: default_htf_interval(),
        }
    }
}

/// `tracker.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

/// Top-level, immutable configuration for the confluence pipeline.
///
/// Every field has a serde default so older JSON files missing new fields
/// still deserialize correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluenceConfig {
    #[serde(default = "default_component_weights")]
    pub component_weights: HashMap<IndicatorKind, f64>,

    #[serde(default)]
    pub thresholds: Thresholds,

    #[serde(default)]
    pub quality_filter: QualityFilterConfig,

    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,

    #[serde(default)]
    pub orderflow: OrderflowConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,

    #[serde(default)]
    pub timeframes: TimeframeIntervals,

    #[serde(default = "default_min_candles")]
    pub min_candles: usize,

    #[serde(default = "default_indicator_soft_budget_ms")]
    pub indicator_soft_budget_ms: u64,

    #[serde(default = "default_analysis_hard_budget_ms")]
    pub analysis_hard_budget_ms: u64,
}

impl Default for ConfluenceConfig {
    fn default() -> Self {
        Self {
            component_weights: default_component_weights(),
            thresholds: Thresholds::default(),
            quality_filter: QualityFilterConfig::default(),
            cooldown_seconds: default_cooldown_seconds(),
            orderflow: OrderflowConfig::default(),
            tracker: TrackerConfig::default(),
            timeframes: TimeframeIntervals::default(),
            min_candles: default_min_candles(),
            indicator_soft_budget_ms: default_indicator_soft_budget_ms(),
            analysis_hard_budget_ms: default_analysis_hard_budget_ms(),
        }
    }
}

impl ConfluenceConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Config(format!("failed to read confluence config from {}: {e}", path.display()))
        })?;

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            CoreError::Config(format!("failed to parse confluence config from {}: {e}", path.display()))
        })?;

        info!(path = %path.display(), "confluence config loaded");
        Ok(config)
    }

    /// Persist the configuration to `path` using an atomic write (write to
    /// `.tmp`, then rename), preventing corruption on crash.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialize confluence config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "confluence config saved (atomic)");
        Ok(())
    }

    /// Weights normalized to sum to 1 over only the indicator kinds present
    /// in `present`; missing indicators' weight is proportionally
    /// redistributed (spec.md §4.3.a).
    pub fn normalized_weights(&self, present: &[IndicatorKind]) -> HashMap<IndicatorKind, f64> {
        let total: f64 = present
            .iter()
            .map(|k| self.component_weights.get(k).copied().unwrap_or(0.0))
            .sum();

        let mut out = HashMap::new();
        if total <= 0.0 {
            let even = 1.0 / present.len().max(1) as f64;
            for k in present {
                out.insert(*k, even);
            }
            return out;
        }

        for k in present {
            let w = self.component_weights.get(k).copied().unwrap_or(0.0);
            out.insert(*k, w / total);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = ConfluenceConfig::default();
        assert!((cfg.thresholds.buy - 68.0).abs() < f64::EPSILON);
        assert!((cfg.thresholds.sell - 35.0).abs() < f64::EPSILON);
        assert_eq!(cfg.cooldown_seconds, 300);
        assert!((cfg.orderflow.cvd_saturation_threshold - 0.15).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: ConfluenceConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.min_candles, 20);
        assert_eq!(cfg.tracker.cache_capacity, 1000);
    }

    #[test]
    fn normalized_weights_redistribute_over_present_set() {
        let cfg = ConfluenceConfig::default();
        let present = [IndicatorKind::Technical, IndicatorKind::Volume];
        let w = cfg.normalized_weights(&present);
        let sum: f64 = w.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn normalized_weights_all_six_sum_to_one() {
        let cfg = ConfluenceConfig::default();
        let w = cfg.normalized_weights(&IndicatorKind::ALL);
        let sum: f64 = w.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn roundtrip_serialization() {
        let cfg = ConfluenceConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: ConfluenceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.cooldown_seconds, cfg2.cooldown_seconds);
        assert!((cfg.thresholds.buy - cfg2.thresholds.buy).abs() < f64::EPSILON);
    }
}
