// =============================================================================
// Quality-adjusted fusion (spec.md §4.3.a)
// =============================================================================
//
// Takes the per-indicator scores collected by the analyzer and produces the
// `FusionResult`: a signed raw score, consensus/confidence/disagreement
// quality metrics, and the quality-adjusted final score.
//
// `WeightedScorer::score` in `signals::weighted_score` is the direct
// ancestor of this function — a weight lookup plus per-signal contribution
// struct — generalized here from a regime-keyed weight table to the fixed
// six-indicator quality-adjusted formula this spec mandates. Only the
// quality-adjusted path exists; spec.md §9 explicitly removes the legacy
// weighted-sum-then-clip path the source carried alongside it.

use std::collections::HashMap;

use crate::config::ConfluenceConfig;
use crate::types::{FusionResult, IndicatorKind, IndicatorResult};

/// Fuse per-indicator results into a single `FusionResult`.
///
/// `results` must be non-empty; callers fall back to
/// `FusionResult::neutral()` themselves when every indicator failed
/// (spec.md §4.3 step 1 and the `AllIndicatorsFailed` case of step 5).
pub fn fuse(
    results: &HashMap<IndicatorKind, IndicatorResult>,
    config: &ConfluenceConfig,
    total_indicators_expected: usize,
) -> FusionResult {
    if results.is_empty() {
        return FusionResult::neutral();
    }

    let present: Vec<IndicatorKind> = results.keys().copied().collect();
    let weights = config.normalized_weights(&present);

    // normalized[i] = (score[i] - 50) / 50, in [-1, 1].
    let normalized: Vec<(IndicatorKind, f64)> = present
        .iter()
        .map(|k| (*k, (results[k].score - 50.0) / 50.0))
        .collect();

    let score_raw: f64 = normalized
        .iter()
        .map(|(k, n)| weights.get(k).copied().unwrap_or(0.0) * n)
        .sum();
    let score_raw = score_raw.clamp(-1.0, 1.0);

    // Population variance of the normalized values. Defined as 0 for a
    // single sample (spec.md §4.3.a property: "single indicator -> no
    // crash; variance defined as 0 for one sample, so consensus = 1").
    let n = normalized.len() as f64;
    let mean: f64 = normalized.iter().map(|(_, v)| v).sum::<f64>() / n;
    let disagreement = if normalized.len() <= 1 {
        0.0
    } else {
        normalized.iter().map(|(_, v)| (v - mean).powi(2)).sum::<f64>() / n
    };

    let consensus = (-disagreement * 2.0).exp();
    let confidence = score_raw.abs() * consensus;

    let base_score_01 = (score_raw + 1.0) / 2.0;
    let adjusted_score_01 = base_score_01 * (0.5 + 0.5 * consensus);
    let score = (adjusted_score_01 * 100.0).clamp(0.0, 100.0);

    let successful = results.len();
    let reliability = if total_indicators_expected == 0 {
        0.0
    } else {
        successful as f64 / total_indicators_expected as f64
    };

    FusionResult {
        score,
        score_raw,
        consensus,
        confidence,
        disagreement,
        components: results.clone(),
        reliability,
    }
}
