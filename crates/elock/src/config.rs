//! Locker configuration.

use std::time::Duration;

use elock_error::{LockError, Result};
use serde::{Deserialize, Serialize};

/// Default upper bound on one wait between entity-lock attempts.
pub const DEFAULT_BACKOFF_MS: u64 = 50;

/// Default slice length for cancellable global-lock waits.
pub const DEFAULT_CANCEL_POLL_MS: u64 = 10;

/// Tunables for an [`EntityLocker`](crate::EntityLocker).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockerConfig {
    /// Longest a contended entity waiter sleeps before re-checking the
    /// table, its deadline and its context. Releases wake waiters early.
    pub backoff_ms: u64,
    /// Longest a cancellable global-lock wait blocks before re-checking
    /// its context.
    pub cancel_poll_ms: u64,
}

impl Default for LockerConfig {
    fn default() -> Self {
        Self {
            backoff_ms: DEFAULT_BACKOFF_MS,
            cancel_poll_ms: DEFAULT_CANCEL_POLL_MS,
        }
    }
}

impl LockerConfig {
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff_ms = duration_to_ms(backoff);
        self
    }

    #[must_use]
    pub fn with_cancel_poll(mut self, poll: Duration) -> Self {
        self.cancel_poll_ms = duration_to_ms(poll);
        self
    }

    #[must_use]
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    #[must_use]
    pub fn cancel_poll(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_ms)
    }

    /// Validate the configuration.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.backoff_ms == 0 {
            errors.push("backoff_ms must be > 0".to_owned());
        }
        if self.cancel_poll_ms == 0 {
            errors.push("cancel_poll_ms must be > 0".to_owned());
        }
        errors
    }

    /// Parse and validate a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| LockError::invalid_config(e.to_string()))?;
        config.validated()
    }

    /// Return `self` if it passes [`Self::validate`].
    pub fn validated(self) -> Result<Self> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(LockError::invalid_config(errors.join("; ")))
        }
    }
}

fn duration_to_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
