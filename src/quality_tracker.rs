// =============================================================================
// Quality Metrics Tracker (C5)
// =============================================================================
//
// Append-only line-delimited JSON, one file per UTC day
// (`quality_metrics_YYYYMMDD.jsonl`), plus a bounded in-memory ring used for
// the `statistics`/`filter_effectiveness` queries (spec.md §4.5).
//
// Grounded on `original_source/src/monitoring/quality_metrics_tracker.py`:
// `_ensure_log_file`'s day-rollover check, `metrics_cache`'s
// `cache_size_limit`-bounded list, and the exact aggregate fields
// `get_statistics`/`get_filter_effectiveness` compute (mean/median/min/max,
// sample stdev, filter-reason histogram, filtered-vs-passed group averages).
// The atomic-file-write idiom (directory creation, append) follows
// `config.rs`'s synchronous `std::fs` usage rather than introducing async
// file I/O the donor never uses for config/log persistence.

use std::collections::{HashMap, VecDeque};
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::error::CoreError;
use crate::types::QualityRecord;

struct CurrentFile {
    date_str: String,
    path: PathBuf,
}

/// Tracks and logs quality metrics (consensus, confidence, disagreement)
/// alongside each signal's filter outcome, for later threshold tuning.
pub struct QualityMetricsTracker {
    log_dir: PathBuf,
    current_file: RwLock<Option<CurrentFile>>,
    cache: RwLock<VecDeque<QualityRecord>>,
    cache_limit: usize,
}

impl QualityMetricsTracker {
    /// Create a tracker writing under `log_dir`, creating it if needed.
    pub fn new(log_dir: impl AsRef<Path>, cache_limit: usize) -> Result<Self> {
        let log_dir = log_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("failed to create quality metrics log dir {}", log_dir.display()))?;

        Ok(Self {
            log_dir,
            current_file: RwLock::new(None),
            cache: RwLock::new(VecDeque::with_capacity(cache_limit.min(4096))),
            cache_limit,
        })
    }

    fn ensure_log_file(&self) -> Result<PathBuf> {
        let date_str = Utc::now().format("%Y%m%d").to_string();
        {
            let current = self.current_file.read();
            if let Some(cur) = current.as_ref() {
                if cur.date_str == date_str {
                    return Ok(cur.path.clone());
                }
            }
        }

        let path = self.log_dir.join(format!("quality_metrics_{date_str}.jsonl"));
        *self.current_file.write() = Some(CurrentFile { date_str, path: path.clone() });
        Ok(path)
    }

    /// Append `record` to today's JSONL file and the in-memory ring.
    pub fn log(&self, record: QualityRecord) -> Result<()> {
        let path = self.ensure_log_file()?;
        let line = serde_json::to_string(&record)
            .map_err(|e| CoreError::TrackerIo(format!("failed to serialize quality record: {e}")))?;

        let mut file = OpenOptions::new().create(true).append(true).open(&path).map_err(|e| {
            CoreError::TrackerIo(format!("failed to open quality metrics log {}: {e}", path.display()))
        })?;
        writeln!(file, "{line}")
            .map_err(|e| CoreError::TrackerIo(format!("failed to append quality metrics line: {e}")))?;

        let mut cache = self.cache.write();
        cache.push_back(record);
        while cache.len() > self.cache_limit {
            cache.pop_front();
        }

        Ok(())
    }

    fn window(&self, hours: u64, symbol: Option<&str>) -> Vec<QualityRecord> {
        let cutoff_ms = Utc::now().timestamp_millis() - (hours as i64 * 3_600_000);
        self.cache
            .read()
            .iter()
            .filter(|r| r.ts_ms >= cutoff_ms && symbol.map_or(true, |s| r.symbol == s))
            .cloned()
            .collect()
    }

    /// Aggregate statistics over the trailing `hours`, optionally scoped to
    /// one symbol. Returns `None` when no records fall in the window.
    pub fn statistics(&self, hours: u64, symbol: Option<&str>) -> Option<QualityStatistics> {
        let records = self.window(hours, symbol);
        if records.is_empty() {
            return None;
        }

        let confidences: Vec<f64> = records.iter().map(|r| r.confidence).collect();
        let consensuses: Vec<f64> = records.iter().map(|r| r.consensus).collect();
        let disagreements: Vec<f64> = records.iter().map(|r| r.disagreement).collect();

        let filtered_count = records.iter().filter(|r| r.filtered).count();
        let total = records.len();

        Some(QualityStatistics {
            period_hours: hours,
            symbol: symbol.map(str::to_string).unwrap_or_else(|| "all".to_string()),
            total_signals: total,
            signals_filtered: filtered_count,
            filter_rate: if total > 0 { filtered_count as f64 / total as f64 * 100.0 } else { 0.0 },
            confidence: summarize(&confidences),
            consensus: summarize(&consensuses),
            disagreement: summarize(&disagreements),
            filter_reasons: count_filter_reasons(&records),
        })
    }

    /// Compare the average quality metrics of filtered vs. passed signals
    /// over the trailing `hours`.
    pub fn filter_effectiveness(&self, hours: u64) -> Option<FilterEffectiveness> {
        let records = self.window(hours, None);
        if records.is_empty() {
            return None;
        }

        let (filtered, passed): (Vec<_>, Vec<_>) = records.iter().partition(|r| r.filtered);

        Some(FilterEffectiveness {
            period_hours: hours,
            total_signals: records.len(),
            filtered_signals: group_averages(&filtered),
            passed_signals: group_averages(&passed),
            filter_rate: filtered.len() as f64 / records.len() as f64 * 100.0,
            filter_reasons: count_filter_reasons(filtered.iter().copied()),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub stdev: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityStatistics {
    pub period_hours: u64,
    pub symbol: String,
    pub total_signals: usize,
    pub signals_filtered: usize,
    pub filter_rate: f64,
    pub confidence: MetricSummary,
    pub consensus: MetricSummary,
    pub disagreement: MetricSummary,
    pub filter_reasons: HashMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupAverages {
    pub avg_confidence: f64,
    pub avg_consensus: f64,
    pub avg_disagreement: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterEffectiveness {
    pub period_hours: u64,
    pub total_signals: usize,
    pub filtered_signals: Option<GroupAverages>,
    pub passed_signals: Option<GroupAverages>,
    pub filter_rate: f64,
    pub filter_reasons: HashMap<String, usize>,
}

fn summarize(values: &[f64]) -> MetricSummary {
    let n = values.len();
    let mean = values.iter().sum::<f64>() / n as f64;
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median = if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    };
    let min = sorted.first().copied().unwrap_or(0.0);
    let max = sorted.last().copied().unwrap_or(0.0);
    let stdev = if n > 1 {
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        variance.sqrt()
    } else {
        0.0
    };

    MetricSummary { mean, median, min, max, stdev }
}

fn group_averages(records: &[&QualityRecord]) -> Option<GroupAverages> {
    if records.is_empty() {
        return None;
    }
    let n = records.len() as f64;
    Some(GroupAverages {
        avg_confidence: records.iter().map(|r| r.confidence).sum::<f64>() / n,
        avg_consensus: records.iter().map(|r| r.consensus).sum::<f64>() / n,
        avg_disagreement: records.iter().map(|r| r.disagreement).sum::<f64>() / n,
        count: records.len(),
    })
}

fn count_filter_reasons<'a>(records: impl IntoIterator<Item = &'a QualityRecord>) -> HashMap<String, usize> {
    let mut reasons = HashMap::new();
    for r in records {
        if r.filtered {
            if let Some(reason) = &r.filter_reason {
                *reasons.entry(reason.clone()).or_insert(0) += 1;
            }
        }
    }
    reasons
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignalType;

    fn record(symbol: &str, ts_ms: i64, confidence: f64, filtered: bool, reason: Option<&str>) -> QualityRecord {
        QualityRecord {
            ts_iso: Utc::now().to_rfc3339(),
            ts_ms,
            symbol: symbol.to_string(),
            score_adjusted: 70.0,
            score_base: 65.0,
            quality_impact: 5.0,
            consensus: 0.9,
            confidence,
            disagreement: 0.1,
            signal_type: Some(SignalType::Buy),
            filtered,
            filter_reason: reason.map(str::to_string),
        }
    }

    #[test]
    fn log_and_statistics_roundtrip() {
        let dir = std::env::temp_dir().join(format!("qmt-test-{}", std::process::id()));
        let tracker = QualityMetricsTracker::new(&dir, 1000).unwrap();
        let now = Utc::now().timestamp_millis();
        tracker.log(record("BTCUSDT", now, 0.6, false, None)).unwrap();
        tracker.log(record("BTCUSDT", now, 0.2, true, Some("low_confidence"))).unwrap();

        let stats = tracker.statistics(24, None).unwrap();
        assert_eq!(stats.total_signals, 2);
        assert_eq!(stats.signals_filtered, 1);
        assert!((stats.filter_rate - 50.0).abs() < 1e-9);
        assert_eq!(*stats.filter_reasons.get("low_confidence").unwrap(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn statistics_empty_window_is_none() {
        let dir = std::env::temp_dir().join(format!("qmt-test-empty-{}", std::process::id()));
        let tracker = QualityMetricsTracker::new(&dir, 1000).unwrap();
        assert!(tracker.statistics(24, None).is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn cache_is_bounded() {
        let dir = std::env::temp_dir().join(format!("qmt-test-bound-{}", std::process::id()));
        let tracker = QualityMetricsTracker::new(&dir, 3).unwrap();
        let now = Utc::now().timestamp_millis();
        for i in 0..10 {
            tracker.log(record("BTCUSDT", now, 0.5, false, None)).unwrap();
            let _ = i;
        }
        assert_eq!(tracker.cache.read().len(), 3);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn filter_effectiveness_splits_groups() {
        let dir = std::env::temp_dir().join(format!("qmt-test-fe-{}", std::process::id()));
        let tracker = QualityMetricsTracker::new(&dir, 1000).unwrap();
        let now = Utc::now().timestamp_millis();
        tracker.log(record("BTCUSDT", now, 0.8, false, None)).unwrap();
        tracker.log(record("ETHUSDT", now, 0.1, true, Some("high_disagreement"))).unwrap();

        let eff = tracker.filter_effectiveness(24).unwrap();
        assert_eq!(eff.total_signals, 2);
        assert!(eff.filtered_signals.is_some());
        assert!(eff.passed_signals.is_some());
        std::fs::remove_dir_all(&dir).ok();
    }
}
