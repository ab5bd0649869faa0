use std::fmt;
use std::time::Duration;

use elock_types::cx::{CancelReason, Cancelled};
use thiserror::Error;

/// Which lock an acquisition was waiting for when it failed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockTarget {
    /// The global lock, in either mode.
    Global,
    /// A keyed entity lock; carries the rendered entity key.
    Entity(String),
}

impl fmt::Display for LockTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global lock"),
            Self::Entity(key) => write!(f, "entity {key}"),
        }
    }
}

/// Primary error type for elock operations.
///
/// Errors raised by a caller's action are never wrapped here: the action's
/// own return value travels back to the caller untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The caller's deadline elapsed before the lock was obtained.
    #[error("can't get lock for {target} in given time {waited:?}")]
    Timeout { target: LockTarget, waited: Duration },

    /// The waiting thread's context was cancelled.
    #[error("lock acquisition for {target} cancelled: {reason}")]
    Cancelled {
        target: LockTarget,
        reason: CancelReason,
    },

    /// Configuration failed validation or could not be parsed.
    #[error("invalid locker configuration: {detail}")]
    InvalidConfig { detail: String },
}

impl LockError {
    /// Create a timeout error.
    pub fn timeout(target: LockTarget, waited: Duration) -> Self {
        Self::Timeout { target, waited }
    }

    /// Create a cancellation error from a failed checkpoint.
    pub fn cancelled(target: LockTarget, cancelled: Cancelled) -> Self {
        Self::Cancelled {
            target,
            reason: cancelled.reason(),
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(detail: impl Into<String>) -> Self {
        Self::InvalidConfig {
            detail: detail.into(),
        }
    }

    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Whether retrying the same call may succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// The lock the failed acquisition was waiting for, if any.
    pub const fn target(&self) -> Option<&LockTarget> {
        match self {
            Self::Timeout { target, .. } | Self::Cancelled { target, .. } => Some(target),
            Self::InvalidConfig { .. } => None,
        }
    }

    /// Human-friendly suggestion for handling this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Timeout { .. } => Some("Retry later or raise the timeout"),
            Self::Cancelled { .. } => None,
            Self::InvalidConfig { .. } => Some("Both backoff_ms and cancel_poll_ms must be > 0"),
        }
    }
}

/// Result type alias using `LockError`.
pub type Result<T, E = LockError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use elock_types::Cx;

    #[test]
    fn error_display_timeout_entity() {
        let err = LockError::timeout(
            LockTarget::Entity("order###7".to_owned()),
            Duration::from_millis(250),
        );
        assert_eq!(
            err.to_string(),
            "can't get lock for entity order###7 in given time 250ms"
        );
    }

    #[test]
    fn error_display_timeout_global() {
        let err = LockError::timeout(LockTarget::Global, Duration::from_secs(1));
        assert_eq!(err.to_string(), "can't get lock for global lock in given time 1s");
    }

    #[test]
    fn error_from_checkpoint() {
        let cx = Cx::new();
        cx.cancel_with_reason(CancelReason::Shutdown);
        let cancelled = cx.checkpoint().unwrap_err();
        let err = LockError::cancelled(LockTarget::Global, cancelled);
        assert!(err.is_cancelled());
        assert!(!err.is_transient());
        assert_eq!(
            err,
            LockError::Cancelled {
                target: LockTarget::Global,
                reason: CancelReason::Shutdown,
            }
        );
        assert_eq!(
            err.to_string(),
            "lock acquisition for global lock cancelled: shutdown"
        );
    }

    #[test]
    fn error_classification() {
        let timeout = LockError::timeout(LockTarget::Global, Duration::ZERO);
        assert!(timeout.is_timeout());
        assert!(timeout.is_transient());
        assert_eq!(timeout.target(), Some(&LockTarget::Global));

        let config = LockError::invalid_config("backoff_ms must be > 0");
        assert!(!config.is_timeout());
        assert!(config.target().is_none());
        assert!(config.suggestion().is_some());
    }
}
