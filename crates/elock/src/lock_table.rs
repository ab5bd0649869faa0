//! Keyed table of reentrant entity locks.
//!
//! The table lives inside a single mutex (the table guard). Every transition
//! of a key (absent → locked by T → released → absent) happens while holding
//! it, so lookup-or-create and removal can never interleave into two lock
//! records for one key. Entries exist only while some thread owns them: the
//! call that drops a key's hold count to zero removes the entry before the
//! guard is released, and the table is empty whenever no thread is inside an
//! entity-level critical section.
//!
//! Contended waiters park on a condition variable paired with the guard.
//! Releases wake them early; otherwise each wait is bounded by the backoff
//! interval so deadlines and cancellation are re-checked at that cadence.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use elock_error::{LockError, LockTarget, Result};
use elock_types::{Cx, EntityKey};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::deadline::Deadline;
use crate::observability::LockMetrics;

/// Ownership record for one key: owning thread and hold count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EntityLock {
    owner: ThreadId,
    holds: usize,
}

/// Outcome of one immediate acquisition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TryAcquire {
    /// Lock obtained; `holds` is the hold count after this acquisition.
    Acquired { holds: usize },
    /// Another thread owns the key.
    Held { owner: ThreadId },
}

pub struct LockTable {
    entries: Mutex<HashMap<EntityKey, EntityLock>>,
    released: Condvar,
    metrics: Arc<LockMetrics>,
}

impl LockTable {
    #[must_use]
    pub fn new(metrics: Arc<LockMetrics>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            metrics,
        }
    }

    /// Get-or-create the record for `key` and try to take it for `me`.
    /// Must be called with the table guard held.
    fn try_acquire_locked(
        entries: &mut HashMap<EntityKey, EntityLock>,
        metrics: &LockMetrics,
        key: &EntityKey,
        me: ThreadId,
    ) -> TryAcquire {
        if let Some(lock) = entries.get_mut(key) {
            if lock.owner != me {
                return TryAcquire::Held { owner: lock.owner };
            }
            lock.holds += 1;
            LockMetrics::incr(&metrics.reentrant_acquisitions);
            return TryAcquire::Acquired { holds: lock.holds };
        }
        entries.insert(key.clone(), EntityLock { owner: me, holds: 1 });
        LockMetrics::incr(&metrics.entries_created);
        LockMetrics::incr(&metrics.entity_acquisitions);
        metrics.observe_table_len(entries.len());
        debug!(%key, table_len = entries.len(), "entity lock entry created");
        TryAcquire::Acquired { holds: 1 }
    }

    /// Acquire `key` for the calling thread, waiting while another thread
    /// owns it.
    ///
    /// Fails with `Timeout` once `deadline` passes and with `Cancelled` when
    /// `cx` is cancelled; in both cases nothing is left held and the guard is
    /// released.
    pub(crate) fn acquire<'a>(
        &'a self,
        key: &EntityKey,
        cx: Option<&Cx>,
        deadline: &Deadline,
        backoff: Duration,
    ) -> Result<EntityGuard<'a>> {
        let me = thread::current().id();
        let mut entries = self.entries.lock();
        let mut waits: u64 = 0;
        loop {
            match Self::try_acquire_locked(&mut entries, &self.metrics, key, me) {
                TryAcquire::Acquired { holds } => {
                    if waits > 0 {
                        trace!(%key, waits, holds, "entity lock acquired after contention");
                    }
                    return Ok(EntityGuard {
                        table: self,
                        key: key.clone(),
                        owner: me,
                        _not_send: PhantomData,
                    });
                }
                TryAcquire::Held { owner } => {
                    if deadline.is_expired() {
                        return Err(deadline.timeout_error(LockTarget::Entity(key.to_string())));
                    }
                    waits += 1;
                    LockMetrics::incr(&self.metrics.contention_waits);
                    trace!(%key, ?owner, waits, "entity lock contended, waiting");
                    // Releases the guard while parked.
                    self.released
                        .wait_for(&mut entries, deadline.slice(backoff));
                    if let Some(cx) = cx {
                        cx.checkpoint().map_err(|c| {
                            LockError::cancelled(LockTarget::Entity(key.to_string()), c)
                        })?;
                    }
                }
            }
        }
    }

    /// Drop one hold of `key` owned by `me`; at zero, remove the entry and
    /// wake waiters. Entry removal and lock release are one step under the
    /// guard.
    fn release(&self, key: &EntityKey, me: ThreadId) {
        let mut entries = self.entries.lock();
        let Some(lock) = entries.get_mut(key) else {
            debug_assert!(false, "release of absent entity lock {key}");
            return;
        };
        debug_assert_eq!(lock.owner, me, "entity lock {key} released by non-owner");
        lock.holds -= 1;
        if lock.holds > 0 {
            return;
        }
        entries.remove(key);
        LockMetrics::incr(&self.metrics.entries_removed);
        debug!(%key, table_len = entries.len(), "entity lock entry removed");
        drop(entries);
        self.released.notify_all();
    }

    /// Number of keys currently locked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Thread owning `key`, if any.
    #[must_use]
    pub fn holder(&self, key: &EntityKey) -> Option<ThreadId> {
        self.entries.lock().get(key).map(|lock| lock.owner)
    }

    /// Hold count of `key` (0 when absent).
    #[must_use]
    pub fn hold_count(&self, key: &EntityKey) -> usize {
        self.entries.lock().get(key).map_or(0, |lock| lock.holds)
    }
}

impl std::fmt::Debug for LockTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockTable")
            .field("len", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// EntityGuard
// ---------------------------------------------------------------------------

/// RAII hold on one entity lock. Dropping it releases one hold, removing the
/// table entry when it was the last. Not `Send`: ownership is per thread.
#[must_use = "the entity lock is released as soon as the guard is dropped"]
pub(crate) struct EntityGuard<'a> {
    table: &'a LockTable,
    key: EntityKey,
    owner: ThreadId,
    _not_send: PhantomData<*const ()>,
}

impl Drop for EntityGuard<'_> {
    fn drop(&mut self) {
        self.table.release(&self.key, self.owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    const BACKOFF: Duration = Duration::from_millis(5);

    fn table() -> Arc<LockTable> {
        Arc::new(LockTable::new(Arc::new(LockMetrics::new())))
    }

    fn key(id: &str) -> EntityKey {
        EntityKey::new("test", id)
    }

    #[test]
    fn test_entry_lives_exactly_as_long_as_the_hold() {
        let table = table();
        assert!(table.is_empty());
        let guard = table
            .acquire(&key("a"), None, &Deadline::start(None), BACKOFF)
            .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.holder(&key("a")), Some(thread::current().id()));
        drop(guard);
        assert!(table.is_empty());
        assert_eq!(table.holder(&key("a")), None);
    }

    #[test]
    fn test_reentrant_holds_count_up_and_down() {
        let table = table();
        let k = key("a");
        let outer = table.acquire(&k, None, &Deadline::start(None), BACKOFF).unwrap();
        let inner = table.acquire(&k, None, &Deadline::start(None), BACKOFF).unwrap();
        assert_eq!(table.hold_count(&k), 2);
        // An already-expired deadline still gets one immediate attempt.
        let third = table
            .acquire(&k, None, &Deadline::start(Some(Duration::ZERO)), BACKOFF)
            .unwrap();
        assert_eq!(table.hold_count(&k), 3);
        drop(third);
        drop(inner);
        assert_eq!(table.hold_count(&k), 1);
        assert_eq!(table.len(), 1);
        drop(outer);
        assert!(table.is_empty());

        let snap = table.metrics.snapshot();
        assert_eq!(snap.entity_acquisitions, 1);
        assert_eq!(snap.reentrant_acquisitions, 2);
        assert_eq!(snap.live_entries(), 0);
    }

    #[test]
    fn test_other_thread_sees_held() {
        let table = table();
        let _guard = table
            .acquire(&key("a"), None, &Deadline::start(None), BACKOFF)
            .unwrap();
        let t = Arc::clone(&table);
        thread::spawn(move || {
            let now = Deadline::start(Some(Duration::ZERO));
            assert!(t.acquire(&key("a"), None, &now, BACKOFF).is_err());
            let other = t.acquire(&key("b"), None, &now, BACKOFF).unwrap();
            assert_eq!(t.len(), 2);
            assert_eq!(t.holder(&key("b")), Some(thread::current().id()));
            drop(other);
        })
        .join()
        .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.holder(&key("a")), Some(thread::current().id()));
    }

    #[test]
    fn test_timeout_leaves_nothing_held() {
        let table = table();
        let _guard = table
            .acquire(&key("a"), None, &Deadline::start(None), BACKOFF)
            .unwrap();
        let t = Arc::clone(&table);
        let err = thread::spawn(move || {
            let deadline = Deadline::start(Some(Duration::from_millis(40)));
            t.acquire(&key("a"), None, &deadline, BACKOFF).map(|_| ())
        })
        .join()
        .unwrap()
        .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.target(), Some(&LockTarget::Entity(key("a").to_string())));
        assert_eq!(table.hold_count(&key("a")), 1);
        assert!(table.metrics.snapshot().contention_waits > 0);
    }

    #[test]
    fn test_release_wakes_waiter_before_backoff_elapses() {
        let table = table();
        let holder = table
            .acquire(&key("a"), None, &Deadline::start(None), BACKOFF)
            .unwrap();
        let (tx, rx) = mpsc::channel();
        let t = Arc::clone(&table);
        let waiter = thread::spawn(move || {
            tx.send(()).unwrap();
            let long_backoff = Duration::from_secs(30);
            let deadline = Deadline::start(Some(Duration::from_secs(10)));
            let started = std::time::Instant::now();
            let guard = t.acquire(&key("a"), None, &deadline, long_backoff).unwrap();
            drop(guard);
            started.elapsed()
        });
        rx.recv().unwrap();
        thread::sleep(Duration::from_millis(20));
        drop(holder);
        let waited = waiter.join().unwrap();
        assert!(waited < Duration::from_secs(5), "waited={waited:?}");
        assert!(table.is_empty());
    }

    #[test]
    fn test_cancelled_waiter_unwinds() {
        let table = table();
        let _guard = table
            .acquire(&key("a"), None, &Deadline::start(None), BACKOFF)
            .unwrap();
        let cx = Cx::new();
        let waiter_cx = cx.clone();
        let t = Arc::clone(&table);
        let waiter = thread::spawn(move || {
            t.acquire(&key("a"), Some(&waiter_cx), &Deadline::start(None), BACKOFF)
                .map(|_| ())
        });
        thread::sleep(Duration::from_millis(20));
        cx.cancel();
        let err = waiter.join().unwrap().unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(table.hold_count(&key("a")), 1);
    }
}
