//! Cancellation context (`Cx`) for blocking lock waits.
//!
//! A `Cx` is a cloneable handle to shared cancellation state. Waiters call
//! [`Cx::checkpoint`] between bounded waits; once any clone of the context has
//! been cancelled, the next checkpoint fails and the waiter unwinds without
//! leaving partial lock state behind.
//!
//! Cancellation propagates from a parent to every context created through
//! [`Cx::create_child`], never the other way around.

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

// ---------------------------------------------------------------------------
// Cancellation state machine
// ---------------------------------------------------------------------------

/// Observable state of a context's cancellation lifecycle.
///
/// ```text
/// Running → CancelRequested → Cancelled
/// ```
///
/// `CancelRequested` becomes `Cancelled` the first time a checkpoint observes
/// the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelState {
    Running,
    CancelRequested,
    Cancelled,
}

/// Reason for cancellation, ordered from weakest to strongest.
///
/// Repeated requests are monotone: the strongest reason wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CancelReason {
    UserInterrupt = 0,
    Shutdown = 1,
    Abort = 2,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserInterrupt => write!(f, "user interrupt"),
            Self::Shutdown => write!(f, "shutdown"),
            Self::Abort => write!(f, "abort"),
        }
    }
}

/// Error returned by [`Cx::checkpoint`] once cancellation is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled {
    reason: CancelReason,
}

impl Cancelled {
    #[must_use]
    pub const fn reason(&self) -> CancelReason {
        self.reason
    }
}

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cancelled: {}", self.reason)
    }
}

impl std::error::Error for Cancelled {}

#[derive(Debug)]
struct CxInner {
    cancel_requested: AtomicBool,
    cancel_state: Mutex<CancelState>,
    cancel_reason: Mutex<Option<CancelReason>>,
    children: Mutex<Vec<Arc<Self>>>,
}

impl CxInner {
    fn new() -> Self {
        Self {
            cancel_requested: AtomicBool::new(false),
            cancel_state: Mutex::new(CancelState::Running),
            cancel_reason: Mutex::new(None),
            children: Mutex::new(Vec::new()),
        }
    }

    fn reason(&self) -> Option<CancelReason> {
        *self
            .cancel_reason
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Propagate cancellation to a node and all its descendants.
///
/// Each node's lock is released before recursing into children.
fn propagate_cancel(inner: &CxInner, reason: CancelReason) {
    {
        let mut r = inner
            .cancel_reason
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match *r {
            Some(existing) if existing >= reason => {}
            _ => *r = Some(reason),
        }
    }

    {
        let mut state = inner
            .cancel_state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *state == CancelState::Running {
            *state = CancelState::CancelRequested;
        }
    }

    // Publish the flag last so a checkpoint that sees it also sees the reason.
    inner.cancel_requested.store(true, Ordering::Release);

    let children: Vec<Arc<CxInner>> = {
        let guard = inner
            .children
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.clone()
    };
    for child in &children {
        propagate_cancel(child, reason);
    }
}

// ---------------------------------------------------------------------------
// Cx
// ---------------------------------------------------------------------------

/// Cancellation context passed to cancellable lock acquisitions.
#[derive(Debug, Clone)]
pub struct Cx {
    inner: Arc<CxInner>,
}

impl Default for Cx {
    fn default() -> Self {
        Self::new()
    }
}

impl Cx {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CxInner::new()),
        }
    }

    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::Acquire)
    }

    /// Request cancellation with the default reason (`UserInterrupt`).
    pub fn cancel(&self) {
        self.cancel_with_reason(CancelReason::UserInterrupt);
    }

    /// Request cancellation with an explicit reason.
    ///
    /// The strongest reason wins; cancellation propagates to all descendants.
    pub fn cancel_with_reason(&self, reason: CancelReason) {
        propagate_cancel(&self.inner, reason);
    }

    #[must_use]
    pub fn cancel_state(&self) -> CancelState {
        *self
            .inner
            .cancel_state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.inner.reason()
    }

    /// Fail with [`Cancelled`] if cancellation has been requested.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if !self.inner.cancel_requested.load(Ordering::Acquire) {
            return Ok(());
        }
        {
            let mut state = self
                .inner
                .cancel_state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if *state == CancelState::CancelRequested {
                *state = CancelState::Cancelled;
            }
        }
        Err(Cancelled {
            reason: self.inner.reason().unwrap_or(CancelReason::UserInterrupt),
        })
    }

    /// Create a child context with independent cancellation state.
    /// Cancelling `self` later also cancels the child.
    #[must_use]
    pub fn create_child(&self) -> Self {
        let child = Self::new();
        {
            let mut children = self
                .inner
                .children
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            children.push(Arc::clone(&child.inner));
        }
        if let Some(reason) = self.inner.reason() {
            propagate_cancel(&child.inner, reason);
        }
        child
    }
}
