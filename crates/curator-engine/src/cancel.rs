//! Cooperative cancellation for blocking connector work.
//!
//! Dropping a future does not stop a `spawn_blocking` closure, so a step
//! that timed out could still commit. A [`CancelToken`] closes that gap:
//! the connector claims the token right before its side effect becomes
//! visible, and the executor cancels it when it gives up on the step.
//! Exactly one of the two wins.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

const RUNNING: u8 = 0;
const CANCELLED: u8 = 1;
const COMMITTED: u8 = 2;

/// Shared cancellation state with a commit point.
///
/// Tokens form a tree: cancelling a token cancels every child created
/// from it that has not committed yet.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<AtomicU8>,
    children: Arc<Mutex<Vec<Weak<AtomicU8>>>>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A token cancelled together with `self`.
    #[must_use]
    pub fn child(&self) -> Self {
        let child = Self::new();
        let mut children = self.children.lock().unwrap_or_else(PoisonError::into_inner);
        children.retain(|weak| weak.strong_count() > 0);
        children.push(Arc::downgrade(&child.state));
        if self.is_cancelled() {
            child.state.store(CANCELLED, Ordering::SeqCst);
        }
        child
    }

    /// Cancel this token and its uncommitted children.
    ///
    /// Returns `false` if the work already passed its commit point; the
    /// caller must then wait for the work to finish.
    pub fn cancel(&self) -> bool {
        let stopped = match self
            .state
            .compare_exchange(RUNNING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => true,
            Err(current) => current == CANCELLED,
        };
        let children = self.children.lock().unwrap_or_else(PoisonError::into_inner);
        for state in children.iter().filter_map(Weak::upgrade) {
            let _ = state.compare_exchange(RUNNING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst);
        }
        stopped
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::SeqCst) == CANCELLED
    }

    /// Claim the commit point. `false` means the work was cancelled and
    /// must be rolled back.
    #[must_use]
    pub fn commit(&self) -> bool {
        match self
            .state
            .compare_exchange(RUNNING, COMMITTED, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => true,
            Err(current) => current == COMMITTED,
        }
    }
}

impl PartialEq for CancelToken {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl Eq for CancelToken {}
