//! Lock metrics.
//!
//! Counters are per-locker, atomic and `Relaxed`: they are diagnostics, never
//! part of the locking protocol. Recording must not block, so nothing here
//! touches the table guard or the global lock.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Aggregated counters for one [`EntityLocker`](crate::EntityLocker).
#[derive(Debug, Default)]
pub struct LockMetrics {
    /// Outermost entity lock acquisitions.
    pub entity_acquisitions: AtomicU64,
    /// Nested acquisitions by a thread that already owned the entity lock.
    pub reentrant_acquisitions: AtomicU64,
    /// Waits on the table guard's condition after a failed immediate attempt.
    pub contention_waits: AtomicU64,
    /// Global exclusive acquisitions.
    pub global_acquisitions: AtomicU64,
    /// Acquisitions that failed with a timeout (global or entity).
    pub timeouts: AtomicU64,
    /// Acquisitions that failed because the context was cancelled.
    pub cancellations: AtomicU64,
    /// Lock-table entries created.
    pub entries_created: AtomicU64,
    /// Lock-table entries removed.
    pub entries_removed: AtomicU64,
    /// Largest table size observed.
    pub table_high_water: AtomicU64,
}

impl LockMetrics {
    /// Create a new metrics instance with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn observe_table_len(&self, len: usize) {
        self.table_high_water
            .fetch_max(len as u64, Ordering::Relaxed);
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        for counter in [
            &self.entity_acquisitions,
            &self.reentrant_acquisitions,
            &self.contention_waits,
            &self.global_acquisitions,
            &self.timeouts,
            &self.cancellations,
            &self.entries_created,
            &self.entries_removed,
            &self.table_high_water,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> LockMetricsSnapshot {
        LockMetricsSnapshot {
            entity_acquisitions: self.entity_acquisitions.load(Ordering::Relaxed),
            reentrant_acquisitions: self.reentrant_acquisitions.load(Ordering::Relaxed),
            contention_waits: self.contention_waits.load(Ordering::Relaxed),
            global_acquisitions: self.global_acquisitions.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            entries_created: self.entries_created.load(Ordering::Relaxed),
            entries_removed: self.entries_removed.load(Ordering::Relaxed),
            table_high_water: self.table_high_water.load(Ordering::Relaxed),
        }
    }
}

/// Serializable snapshot of [`LockMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct LockMetricsSnapshot {
    pub entity_acquisitions: u64,
    pub reentrant_acquisitions: u64,
    pub contention_waits: u64,
    pub global_acquisitions: u64,
    pub timeouts: u64,
    pub cancellations: u64,
    pub entries_created: u64,
    pub entries_removed: u64,
    pub table_high_water: u64,
}

impl LockMetricsSnapshot {
    /// Entries created but not yet removed. Zero whenever the table is empty.
    #[must_use]
    pub fn live_entries(&self) -> u64 {
        self.entries_created.saturating_sub(self.entries_removed)
    }
}
