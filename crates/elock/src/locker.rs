//! Lock executor: runs caller actions under entity or global locks.
//!
//! ## Protocol
//!
//! Entity operations ([`EntityLocker::lock_execute`] and friends):
//! 1. fix the deadline from the monotonic clock,
//! 2. take the global lock shared (within the deadline),
//! 3. take the entity lock through the table (within the same deadline),
//! 4. run the action,
//! 5. unwind in reverse: table entry and entity lock, then global shared.
//!
//! Global operations ([`EntityLocker::global_lock_execute`] and friends) take
//! the global lock exclusive, which excludes every entity operation in flight
//! or starting concurrently.
//!
//! Step 5 runs on every exit path, unwinding panics included, because both
//! holds are RAII guards dropped in reverse declaration order. An action's
//! own outcome (including an `Err`) is returned untouched.
//!
//! ## Reentrancy
//!
//! A thread may call back into the same locker from inside an action: nested
//! entity calls for a key it already owns, entity calls from inside a global
//! action, and nested global calls all proceed without blocking. A global
//! call from inside an entity action would need a shared-to-exclusive upgrade
//! and waits until its timeout or context ends it.

use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;

use elock_error::{LockError, Result};
use elock_types::{Cx, EntityId, EntityKey};
use tracing::{info, warn};

use crate::config::LockerConfig;
use crate::deadline::Deadline;
use crate::global_lock::{GlobalLock, GlobalMode};
use crate::lock_table::LockTable;
use crate::observability::{LockMetrics, LockMetricsSnapshot};

/// Fine-grained per-entity locking under a global shared/exclusive lock.
///
/// Share it between threads by reference (scoped threads) or through an
/// `Arc`.
pub struct EntityLocker {
    config: LockerConfig,
    global: GlobalLock,
    table: LockTable,
    metrics: Arc<LockMetrics>,
}

impl EntityLocker {
    /// Create a locker with [`LockerConfig::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::build(LockerConfig::default())
    }

    /// Create a locker with a validated configuration.
    pub fn with_config(config: LockerConfig) -> Result<Self> {
        Ok(Self::build(config.validated()?))
    }

    fn build(config: LockerConfig) -> Self {
        let metrics = Arc::new(LockMetrics::new());
        Self {
            config,
            global: GlobalLock::new(),
            table: LockTable::new(Arc::clone(&metrics)),
            metrics,
        }
    }

    #[must_use]
    pub fn config(&self) -> &LockerConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Global operations
    // -----------------------------------------------------------------------

    /// Run `action` under the global exclusive lock, waiting as long as it
    /// takes.
    pub fn global_lock_execute<R>(&self, action: impl FnOnce() -> R) -> Result<R> {
        self.global_lock_execute_inner(None, None, action)
    }

    /// Like [`Self::global_lock_execute`], failing with
    /// [`LockError::Timeout`] if the lock is not obtained within `timeout`.
    pub fn global_lock_execute_timeout<R>(
        &self,
        timeout: Duration,
        action: impl FnOnce() -> R,
    ) -> Result<R> {
        self.global_lock_execute_inner(None, Some(timeout), action)
    }

    /// Like [`Self::global_lock_execute`], cancellable through `cx` and
    /// optionally bounded by `timeout`.
    pub fn global_lock_execute_with<R>(
        &self,
        cx: &Cx,
        timeout: Option<Duration>,
        action: impl FnOnce() -> R,
    ) -> Result<R> {
        self.global_lock_execute_inner(Some(cx), timeout, action)
    }

    fn global_lock_execute_inner<R>(
        &self,
        cx: Option<&Cx>,
        timeout: Option<Duration>,
        action: impl FnOnce() -> R,
    ) -> Result<R> {
        let deadline = Deadline::start(timeout);
        let _global = self
            .global
            .acquire(GlobalMode::Exclusive, cx, &deadline, self.config.cancel_poll())
            .map_err(|err| self.record_failure(err))?;
        LockMetrics::incr(&self.metrics.global_acquisitions);
        info!(waited = ?deadline.elapsed(), "global exclusive section entered");
        let _exit = SectionLog("global exclusive section left");
        Ok(action())
    }

    // -----------------------------------------------------------------------
    // Entity operations
    // -----------------------------------------------------------------------

    /// Run `action` under `entity`'s exclusive reentrant lock while holding
    /// the global lock shared, waiting as long as it takes.
    pub fn lock_execute<E, R>(&self, entity: &E, action: impl FnOnce() -> R) -> Result<R>
    where
        E: EntityId + ?Sized,
    {
        self.lock_execute_inner(None, None, &entity.entity_key(), action)
    }

    /// Like [`Self::lock_execute`], failing with [`LockError::Timeout`] when
    /// both locks are not obtained within `timeout`. One budget covers the
    /// global wait and the entity wait together.
    pub fn lock_execute_timeout<E, R>(
        &self,
        timeout: Duration,
        entity: &E,
        action: impl FnOnce() -> R,
    ) -> Result<R>
    where
        E: EntityId + ?Sized,
    {
        self.lock_execute_inner(None, Some(timeout), &entity.entity_key(), action)
    }

    /// Like [`Self::lock_execute`], cancellable through `cx` and optionally
    /// bounded by `timeout`.
    pub fn lock_execute_with<E, R>(
        &self,
        cx: &Cx,
        timeout: Option<Duration>,
        entity: &E,
        action: impl FnOnce() -> R,
    ) -> Result<R>
    where
        E: EntityId + ?Sized,
    {
        self.lock_execute_inner(Some(cx), timeout, &entity.entity_key(), action)
    }

    fn lock_execute_inner<R>(
        &self,
        cx: Option<&Cx>,
        timeout: Option<Duration>,
        key: &EntityKey,
        action: impl FnOnce() -> R,
    ) -> Result<R> {
        let deadline = Deadline::start(timeout);
        // Declaration order is release order in reverse: entity, then global.
        let _global = self
            .global
            .acquire(GlobalMode::Shared, cx, &deadline, self.config.cancel_poll())
            .map_err(|err| self.record_failure(err))?;
        let _entity = self
            .table
            .acquire(key, cx, &deadline, self.config.backoff())
            .map_err(|err| self.record_failure(err))?;
        Ok(action())
    }

    fn record_failure(&self, err: LockError) -> LockError {
        match &err {
            LockError::Timeout { target, waited } => {
                LockMetrics::incr(&self.metrics.timeouts);
                warn!(%target, ?waited, "lock acquisition timed out");
            }
            LockError::Cancelled { target, reason } => {
                LockMetrics::incr(&self.metrics.cancellations);
                warn!(%target, %reason, "lock acquisition cancelled");
            }
            LockError::InvalidConfig { .. } => {}
        }
        err
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Number of entity keys currently locked.
    #[must_use]
    pub fn table_len(&self) -> usize {
        self.table.len()
    }

    #[must_use]
    pub fn is_table_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Thread currently owning `entity`'s lock, if any.
    #[must_use]
    pub fn holder<E: EntityId + ?Sized>(&self, entity: &E) -> Option<ThreadId> {
        self.table.holder(&entity.entity_key())
    }

    /// Hold count of `entity`'s lock (0 when unlocked).
    #[must_use]
    pub fn hold_count<E: EntityId + ?Sized>(&self, entity: &E) -> usize {
        self.table.hold_count(&entity.entity_key())
    }

    #[must_use]
    pub fn global(&self) -> &GlobalLock {
        &self.global
    }

    #[must_use]
    pub fn metrics(&self) -> LockMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }
}

impl Default for EntityLocker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EntityLocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityLocker")
            .field("config", &self.config)
            .field("global", &self.global)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

/// Logs when a global section is left, on every exit path.
struct SectionLog(&'static str);

impl Drop for SectionLog {
    fn drop(&mut self) {
        info!("{}", self.0);
    }
}
