//! The global shared/exclusive lock.
//!
//! Every entity-level operation holds it shared for its whole duration;
//! global operations hold it exclusive. The underlying primitive is a
//! `parking_lot::RwLock`, which queues new readers behind a waiting writer.
//! That fairness would deadlock a thread re-entering in shared mode while a
//! writer waits, so per-thread hold counts are kept alongside the lock:
//!
//! - already holding shared, asking shared: recursive read, never queued.
//! - already holding exclusive, asking either mode: granted without touching
//!   the `RwLock`, the outer exclusive hold covers it.
//! - holding only shared, asking exclusive: upgrade is not supported; the
//!   wait can only end through the caller's timeout or context.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use elock_error::{LockError, LockTarget, Result};
use elock_types::Cx;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::deadline::Deadline;

static NEXT_GLOBAL_LOCK_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static HOLDS: RefCell<HashMap<u64, Holds>> = RefCell::new(HashMap::new());
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Holds {
    shared: usize,
    exclusive: usize,
}

/// Mode of a global-lock hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalMode {
    Shared,
    Exclusive,
}

pub struct GlobalLock {
    id: u64,
    rw: RwLock<()>,
}

impl GlobalLock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_GLOBAL_LOCK_ID.fetch_add(1, Ordering::Relaxed),
            rw: RwLock::new(()),
        }
    }

    /// Acquire in `mode`, giving up at `deadline` or when `cx` is cancelled.
    ///
    /// Without a context and without a deadline this blocks until granted.
    /// With a context, waits are cut into slices of at most `poll` so that
    /// cancellation is observed promptly.
    pub(crate) fn acquire(
        &self,
        mode: GlobalMode,
        cx: Option<&Cx>,
        deadline: &Deadline,
        poll: Duration,
    ) -> Result<GlobalGuard<'_>> {
        let held = self.holds();
        let raw = if held.exclusive > 0 {
            RawGuard::Covered
        } else if mode == GlobalMode::Shared && held.shared > 0 {
            RawGuard::Shared(self.rw.read_recursive())
        } else {
            self.acquire_raw(mode, cx, deadline, poll)?
        };
        self.adjust_holds(mode, true);
        Ok(GlobalGuard {
            lock: self,
            mode,
            _raw: raw,
        })
    }

    fn acquire_raw(
        &self,
        mode: GlobalMode,
        cx: Option<&Cx>,
        deadline: &Deadline,
        poll: Duration,
    ) -> Result<RawGuard<'_>> {
        if cx.is_none() && !deadline.is_bounded() {
            return Ok(match mode {
                GlobalMode::Shared => RawGuard::Shared(self.rw.read()),
                GlobalMode::Exclusive => RawGuard::Exclusive(self.rw.write()),
            });
        }

        loop {
            if let Some(cx) = cx {
                cx.checkpoint()
                    .map_err(|c| LockError::cancelled(LockTarget::Global, c))?;
            }
            let wait = match (cx, deadline.remaining()) {
                (Some(_), _) => deadline.slice(poll),
                (None, Some(left)) => left,
                (None, None) => poll,
            };
            let raw = match mode {
                GlobalMode::Shared => self.rw.try_read_for(wait).map(RawGuard::Shared),
                GlobalMode::Exclusive => self.rw.try_write_for(wait).map(RawGuard::Exclusive),
            };
            if let Some(raw) = raw {
                return Ok(raw);
            }
            if deadline.is_expired() {
                return Err(deadline.timeout_error(LockTarget::Global));
            }
        }
    }

    fn holds(&self) -> Holds {
        HOLDS.with(|h| h.borrow().get(&self.id).copied().unwrap_or_default())
    }

    fn adjust_holds(&self, mode: GlobalMode, acquire: bool) {
        HOLDS.with(|h| {
            let mut map = h.borrow_mut();
            let holds = map.entry(self.id).or_default();
            let slot = match mode {
                GlobalMode::Shared => &mut holds.shared,
                GlobalMode::Exclusive => &mut holds.exclusive,
            };
            if acquire {
                *slot += 1;
            } else {
                *slot -= 1;
            }
            if *holds == Holds::default() {
                map.remove(&self.id);
            }
        });
    }

    /// Whether the calling thread currently holds this lock in `mode`.
    #[must_use]
    pub fn held_by_current_thread(&self, mode: GlobalMode) -> bool {
        let holds = self.holds();
        match mode {
            GlobalMode::Shared => holds.shared > 0,
            GlobalMode::Exclusive => holds.exclusive > 0,
        }
    }

    /// Whether any thread holds the lock in any mode.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.rw.is_locked()
    }

    #[must_use]
    pub fn is_locked_exclusive(&self) -> bool {
        self.rw.is_locked_exclusive()
    }
}

impl Default for GlobalLock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GlobalLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalLock")
            .field("id", &self.id)
            .field("locked", &self.rw.is_locked())
            .field("exclusive", &self.rw.is_locked_exclusive())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// GlobalGuard
// ---------------------------------------------------------------------------

// The payload guards are never read; they are held so their `Drop` unlocks.
#[allow(dead_code)]
enum RawGuard<'a> {
    Shared(RwLockReadGuard<'a, ()>),
    Exclusive(RwLockWriteGuard<'a, ()>),
    /// Granted under an exclusive hold the same thread already owns.
    Covered,
}

/// RAII hold on the global lock. Not `Send`: the per-thread hold count is
/// released on the thread that took it.
#[must_use = "the global lock is released as soon as the guard is dropped"]
pub struct GlobalGuard<'a> {
    lock: &'a GlobalLock,
    mode: GlobalMode,
    _raw: RawGuard<'a>,
}

impl Drop for GlobalGuard<'_> {
    fn drop(&mut self) {
        // The raw guard (a field) is released right after this body runs.
        self.lock.adjust_holds(self.mode, false);
    }
}
