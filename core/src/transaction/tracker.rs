//! Transaction-scoped iterator tracking.
//!
//! Every range-scan iterator registers on creation and deregisters on drop.
//! Before commit, the runtime polls (yielding between polls) until the active
//! count reaches zero or a bounded timeout elapses, so no scan is in flight
//! while the commit is outstanding.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
pub struct IteratorTracker {
    active: AtomicUsize,
}

impl IteratorTracker {
    pub fn new() -> Self { Self::default() }

    pub fn active(&self) -> usize { self.active.load(Ordering::Acquire) }

    pub fn register(self: &Arc<Self>) -> IteratorGuard {
        self.active.fetch_add(1, Ordering::AcqRel);
        IteratorGuard { tracker: self.clone() }
    }

    /// Wait (cooperatively) for all registered iterators to drop. Returns
    /// whether the count actually reached zero within the timeout.
    pub async fn quiesce(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.active() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::task::yield_now().await;
        }
        true
    }
}

pub struct IteratorGuard {
    tracker: Arc<IteratorTracker>,
}

impl Drop for IteratorGuard {
    fn drop(&mut self) { self.tracker.active.fetch_sub(1, Ordering::AcqRel); }
}
