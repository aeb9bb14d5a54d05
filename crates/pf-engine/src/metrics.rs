use std::sync::atomic::{AtomicU64, Ordering};

use pf_cache::CacheStats;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub(crate) struct CoreMetrics {
    evaluations: AtomicU64,
    interpolations: AtomicU64,
    constant_evaluations: AtomicU64,
    constants_published: AtomicU64,
    materializations: AtomicU64,
    rollbacks: AtomicU64,
}

impl CoreMetrics {
    pub(crate) fn record_evaluation(&self) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_interpolations(&self, count: u64) {
        self.interpolations.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_constant_evaluation(&self) {
        self.constant_evaluations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_published(&self, count: usize) {
        self.constants_published
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_materialization(&self) {
        self.materializations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, cache: CacheStats) -> MetricsSnapshot {
        MetricsSnapshot {
            evaluations: self.evaluations.load(Ordering::Relaxed),
            interpolations: self.interpolations.load(Ordering::Relaxed),
            constant_evaluations: self.constant_evaluations.load(Ordering::Relaxed),
            constants_published: self.constants_published.load(Ordering::Relaxed),
            materializations: self.materializations.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            cache,
        }
    }
}

/// Point-in-time counters for one [`crate::ComputationCore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Frame-scope evaluation requests, cached or not.
    pub evaluations: u64,
    /// Scattered-to-grid interpolations actually performed.
    pub interpolations: u64,
    pub constant_evaluations: u64,
    pub constants_published: u64,
    pub materializations: u64,
    pub rollbacks: u64,
    pub cache: CacheStats,
}
