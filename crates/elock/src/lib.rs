//! Per-entity reentrant locks layered under a global shared/exclusive lock.
//!
//! [`EntityLocker`] offers two kinds of critical section:
//!
//! - **entity**: [`EntityLocker::lock_execute`] serializes actions on one
//!   entity while actions on other entities run in parallel;
//! - **global**: [`EntityLocker::global_lock_execute`] excludes all entity
//!   work for its duration.
//!
//! Both are reentrant for the calling thread, accept an optional timeout
//! (one budget per call) and, through the `_with` variants, a cancellation
//! context. The keyed table shrinks back to empty as soon as contention
//! ends, so idle entities never accumulate entries.
//!
//! ```
//! use std::borrow::Cow;
//! use elock::{EntityId, EntityLocker};
//!
//! struct Account(u64);
//!
//! impl EntityId for Account {
//!     fn entity_id(&self) -> Cow<'_, str> {
//!         Cow::Owned(self.0.to_string())
//!     }
//! }
//!
//! let locker = EntityLocker::new();
//! let balance = locker.lock_execute(&Account(7), || 100).unwrap();
//! assert_eq!(balance, 100);
//! assert!(locker.is_table_empty());
//! ```

pub mod config;
mod deadline;
pub mod global_lock;
pub mod lock_table;
pub mod locker;
pub mod observability;

pub use config::{DEFAULT_BACKOFF_MS, DEFAULT_CANCEL_POLL_MS, LockerConfig};
pub use elock_error::{LockError, LockTarget, Result};
pub use elock_types::{CancelReason, CancelState, Cx, EntityId, EntityKey};
pub use global_lock::{GlobalLock, GlobalMode};
pub use lock_table::LockTable;
pub use locker::EntityLocker;
pub use observability::{LockMetrics, LockMetricsSnapshot};
