//! Run counters shared by the pipeline stages.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Monotonic row counters, updated concurrently by the reader and workers.
#[derive(Debug, Default)]
pub struct RunStats {
    seen: AtomicU64,
    accepted: AtomicU64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_seen(&self) {
        self.seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn seen(&self) -> u64 {
        self.seen.load(Ordering::Relaxed)
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Final figures for a finished run.
    pub fn summary(&self, job: impl Into<String>, elapsed: Duration) -> RunSummary {
        let rows = self.seen();
        let accepted = self.accepted();
        RunSummary {
            job: job.into(),
            rows,
            accepted,
            rejected: rows.saturating_sub(accepted),
            elapsed,
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub job: String,
    pub rows: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_rejected_is_derived() {
        let stats = RunStats::new();
        for _ in 0..5 {
            stats.record_seen();
        }
        for _ in 0..3 {
            stats.record_accepted();
        }
        let summary = stats.summary("j", Duration::ZERO);
        assert_eq!((summary.rows, summary.accepted, summary.rejected), (5, 3, 2));
    }

    #[test]
    fn test_concurrent_increments() {
        let stats = Arc::new(RunStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_seen();
                        stats.record_accepted();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.seen(), 8000);
        assert_eq!(stats.accepted(), 8000);
    }
}
