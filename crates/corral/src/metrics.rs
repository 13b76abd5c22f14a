//! Pool counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Internal counters, updated with relaxed atomics.
#[derive(Debug, Default)]
pub(crate) struct PoolMetrics {
    pub(crate) connections_created: AtomicU64,
    pub(crate) connections_closed: AtomicU64,
    pub(crate) checkouts: AtomicU64,
    pub(crate) reuses: AtomicU64,
    pub(crate) timeouts: AtomicU64,
    pub(crate) validation_failures: AtomicU64,
}

impl PoolMetrics {
    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_created: self.connections_created.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            checkouts: self.checkouts.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the pool's lifetime counters.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub struct MetricsSnapshot {
    /// Connections opened by the factory on the pool's behalf.
    pub connections_created: u64,
    /// Connections that left the pool: closed (stale, overflow, or dead on
    /// release), or abandoned because they were still borrowed at release.
    pub connections_closed: u64,
    /// Successful acquires.
    pub checkouts: u64,
    /// Acquires satisfied from the idle set rather than a fresh open.
    pub reuses: u64,
    /// Acquires that gave up waiting for capacity.
    pub timeouts: u64,
    /// Liveness probes that failed (acquire or release path).
    pub validation_failures: u64,
}

impl MetricsSnapshot {
    /// Fraction of checkouts served from the idle set, in `[0.0, 1.0]`.
    #[must_use]
    pub fn reuse_rate(&self) -> f64 {
        if self.checkouts == 0 {
            return 0.0;
        }
        self.reuses as f64 / self.checkouts as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = PoolMetrics::default();
        metrics.checkouts.store(4, Ordering::Relaxed);
        metrics.reuses.store(3, Ordering::Relaxed);

        let snap = metrics.snapshot();
        assert_eq!(snap.checkouts, 4);
        assert_eq!(snap.reuses, 3);
        assert!((snap.reuse_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reuse_rate_with_no_checkouts() {
        let snap = PoolMetrics::default().snapshot();
        assert_eq!(snap.reuse_rate(), 0.0);
    }
}
