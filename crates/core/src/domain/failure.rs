// Failure Record (circuit breaker window)

use serde::{Deserialize, Serialize};

/// Append-only, time-pruned list of failure timestamps (ms on a monotonic clock)
///
/// Invariant: after `prune(now)` no entry is older than `window_ms`.
/// Successful heartbeats never clear the record; only time does.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    window_ms: i64,
    failures: Vec<i64>,
}

impl FailureRecord {
    pub fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            failures: Vec::new(),
        }
    }

    /// Append a failure and return the pruned count inside the window
    pub fn record(&mut self, now_millis: i64) -> usize {
        self.failures.push(now_millis);
        self.prune(now_millis)
    }

    /// Drop entries older than the window; idempotent for a given `now`
    pub fn prune(&mut self, now_millis: i64) -> usize {
        let cutoff = now_millis - self.window_ms;
        self.failures.retain(|&ts| ts >= cutoff);
        self.failures.len()
    }

    /// Count of failures inside the window as of `now`
    pub fn count(&mut self, now_millis: i64) -> usize {
        self.prune(now_millis)
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_inside_window_accumulate() {
        let mut record = FailureRecord::new(60_000);
        assert_eq!(record.record(0), 1);
        assert_eq!(record.record(6_000), 2);
        assert_eq!(record.record(12_000), 3);
    }

    #[test]
    fn test_old_failures_are_pruned() {
        let mut record = FailureRecord::new(60_000);
        record.record(0);
        record.record(10_000);

        // First entry is now 60.001s old
        assert_eq!(record.record(60_001), 2);
        assert_eq!(record.count(200_000), 0);
    }

    #[test]
    fn test_prune_is_idempotent() {
        let mut record = FailureRecord::new(60_000);
        record.record(1_000);
        record.record(30_000);
        record.record(50_000);

        let first = record.prune(75_000);
        let second = record.prune(75_000);
        assert_eq!(first, 2);
        assert_eq!(first, second);
    }

    #[test]
    fn test_boundary_entry_is_kept() {
        let mut record = FailureRecord::new(60_000);
        record.record(0);
        assert_eq!(record.count(60_000), 1);
        assert_eq!(record.count(60_001), 0);
    }
}
