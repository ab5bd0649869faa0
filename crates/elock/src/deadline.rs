//! One overall time budget per locking call.
//!
//! The deadline is fixed once at call entry from the monotonic clock and the
//! same value bounds the global-lock wait and the entity wait that follows.

use std::time::{Duration, Instant};

use elock_error::{LockError, LockTarget};

#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    started: Instant,
    at: Option<Instant>,
}

impl Deadline {
    pub(crate) fn start(timeout: Option<Duration>) -> Self {
        let started = Instant::now();
        Self {
            started,
            // Unrepresentable instants behave as "no deadline".
            at: timeout.and_then(|t| started.checked_add(t)),
        }
    }

    pub(crate) fn is_bounded(&self) -> bool {
        self.at.is_some()
    }

    /// Time left, `None` when unbounded.
    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub(crate) fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Length of the next bounded wait: `max`, clipped to the time left.
    pub(crate) fn slice(&self, max: Duration) -> Duration {
        self.remaining().map_or(max, |left| left.min(max))
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn timeout_error(&self, target: LockTarget) -> LockError {
        LockError::timeout(target, self.elapsed())
    }
}
