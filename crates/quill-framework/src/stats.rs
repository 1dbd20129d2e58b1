//! Lock-free named counters.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// A set of named monotonic counters, shared across the framework.
///
/// Counters appear on first increment. Reads are approximate under
/// concurrent writes, which is fine for accounting.
#[derive(Default)]
pub struct StatsCollector {
    counters: DashMap<String, AtomicU64>,
}

impl StatsCollector {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one to `key`.
    pub fn inc(&self, key: &str) {
        self.add(key, 1);
    }

    /// Adds `delta` to `key`.
    pub fn add(&self, key: &str, delta: u64) {
        self.counters
            .entry(key.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }

    /// Current value of `key`, `0` when never incremented.
    pub fn get(&self, key: &str) -> u64 {
        self.counters
            .get(key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Snapshot of every counter.
    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.counters
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counts_and_snapshots() {
        let stats = StatsCollector::new();
        stats.inc("sent");
        stats.add("sent", 2);
        stats.inc("retry");

        assert_eq!(stats.get("sent"), 3);
        assert_eq!(stats.get("retry"), 1);
        assert_eq!(stats.get("missing"), 0);

        let snap = stats.snapshot();
        assert_eq!(snap.get("sent"), Some(&3));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_sum() {
        let stats = Arc::new(StatsCollector::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let stats = Arc::clone(&stats);
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    stats.inc("n");
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(stats.get("n"), 1600);
    }
}
