// =============================================================================
// Per-snapshot cache
// =============================================================================
//
// Created fresh inside every `Analyzer::analyze` call and dropped at the end
// of the function — never stored on any long-lived state (spec.md §9's
// redesign note on "per-call caches": a snapshot-scoped cache object rather
// than a process-wide one, to avoid cross-snapshot contamination).
//
// Shape follows the donor's `signals::signal_decay::SignalDecayManager`: a
// `parking_lot::RwLock`-guarded keyed table, bounded instead of decayed.

use std::collections::HashMap;

use parking_lot::RwLock;

/// A bounded key/value memoization scratchpad shared by the six indicator
/// calls for a single snapshot. Indicators use it to avoid repeating
/// sub-computations (e.g. tick-rule classification) that more than one of
/// them needs.
pub struct SnapshotCache {
    entries: RwLock<HashMap<String, f64>>,
    capacity: usize,
}

impl SnapshotCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.entries.read().get(key).copied()
    }

    pub fn put(&self, key: impl Into<String>, value: f64) {
        let key = key.into();
        let mut entries = self.entries.write();
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            return;
        }
        entries.insert(key, value);
    }

    pub fn get_or_compute(&self, key: &str, compute: impl FnOnce() -> f64) -> f64 {
        if let Some(v) = self.get(key) {
            return v;
        }
        let v = compute();
        self.put(key.to_string(), v);
        v
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_compute_memoizes() {
        let cache = SnapshotCache::default();
        let mut calls = 0;
        for _ in 0..3 {
            cache.get_or_compute("k", || {
                calls += 1;
                42.0
            });
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn respects_capacity() {
        let cache = SnapshotCache::new(1);
        cache.put("a", 1.0);
        cache.put("b", 2.0);
        assert_eq!(cache.get("a"), Some(1.0));
        assert_eq!(cache.get("b"), None);
    }
}
