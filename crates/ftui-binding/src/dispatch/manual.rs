#![forbid(unsafe_code)]

//! Host-pumped dispatch queue.
//!
//! Event loops that already own their update thread submit into a
//! [`ManualQueue`] and call [`ManualQueue::run_pending`] once per iteration.
//! Submission only appends to a FIFO, so it is safe from any thread.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use super::{Counters, DispatchStats, Dispatcher, Notification, deliver_isolated};
use crate::listener::Listener;

#[derive(Default)]
struct ManualInner {
    pending: Mutex<VecDeque<Notification>>,
    counters: Counters,
}

/// FIFO of notifications drained on whichever thread calls
/// [`run_pending`](Self::run_pending).
///
/// Clones share the same queue.
#[derive(Clone, Default)]
pub struct ManualQueue {
    inner: Arc<ManualInner>,
}

impl ManualQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued, not yet executed notifications.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Targets of the queued notifications, oldest first.
    #[must_use]
    pub fn pending_listeners(&self) -> Vec<Listener> {
        self.lock().iter().map(|n| n.listener().clone()).collect()
    }

    /// Run the oldest queued notification. Returns `false` if none was queued.
    pub fn run_one(&self) -> bool {
        // Pop under the lock, run outside it: listeners may submit again.
        let next = self.lock().pop_front();
        match next {
            Some(notification) => {
                deliver_isolated(notification, &self.inner.counters);
                true
            }
            None => false,
        }
    }

    /// Run queued notifications until the queue is empty, including any
    /// submitted by the listeners themselves. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        ran
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        self.inner.counters.snapshot()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Notification>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Dispatcher for ManualQueue {
    fn submit(&self, notification: Notification) {
        self.inner.counters.accepted();
        self.lock().push_back(notification);
    }
}

impl std::fmt::Debug for ManualQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualQueue")
            .field("pending", &self.pending())
            .field("stats", &self.stats())
            .finish()
    }
}
