//! Atomic counters for materializer observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`CacheMetrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. on shutdown or after a polling round).
//!
//! Each `Materializer` owns its own counters; nothing here is process-wide.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::cache::PublishOutcome;

/// Atomic counters, no locking.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    cycles: AtomicU64,
    failures: AtomicU64,
    reused: AtomicU64,
    created: AtomicU64,
    replaced: AtomicU64,
}

/// Point-in-time copy of [`CacheMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub cycles: u64,
    pub failures: u64,
    pub reused: u64,
    pub created: u64,
    pub replaced: u64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a started cycle.
    pub fn inc_cycles(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "cycles", "counter incremented");
    }

    /// Count a cycle that aborted before publishing.
    pub fn inc_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "failures", "counter incremented");
    }

    /// Count a publish by its outcome.
    pub fn record_publish(&self, outcome: PublishOutcome) {
        let counter = match outcome {
            PublishOutcome::Reused => &self.reused,
            PublishOutcome::Created => &self.created,
            PublishOutcome::Replaced => &self.replaced,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = ?outcome, "counter incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            created: self.created.load(Ordering::Relaxed),
            replaced: self.replaced.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            metric = "flush",
            cycles = snapshot.cycles,
            failures = snapshot.failures,
            reused = snapshot.reused,
            created = snapshot.created,
            replaced = snapshot.replaced,
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.cycles.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.reused.store(0, Ordering::Relaxed);
        self.created.store(0, Ordering::Relaxed);
        self.replaced.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = CacheMetrics::new();
        m.inc_cycles();
        m.inc_cycles();
        m.inc_failures();
        m.record_publish(PublishOutcome::Created);
        m.record_publish(PublishOutcome::Reused);
        m.record_publish(PublishOutcome::Reused);

        let snapshot = m.snapshot();
        assert_eq!(snapshot.cycles, 2);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.created, 1);
        assert_eq!(snapshot.reused, 2);
        assert_eq!(snapshot.replaced, 0);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = CacheMetrics::new();
        m.inc_cycles();
        m.record_publish(PublishOutcome::Replaced);
        m.reset();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }
}
