#![forbid(unsafe_code)]

//! Per-item listener registry.
//!
//! [`Listeners`] is embedded by every concrete data item. It records who is
//! subscribed and turns "the value changed" into one queued
//! [`Notification`] per subscriber.
//!
//! # Locking
//!
//! A single `RwLock` guards the listener sequence:
//!
//! | Operation  | Lock      | Queues                       |
//! |------------|-----------|------------------------------|
//! | `add`      | exclusive | 1 notification for the added |
//! | `remove`   | exclusive | nothing                      |
//! | `trigger`  | shared    | 1 per registered listener    |
//!
//! Concurrent triggers share the lock; a mutation waits for them and holds
//! later triggers off until it completes, so a trigger never sees a
//! half-updated sequence. Submitting is non-blocking and listener code only
//! ever runs on the dispatch thread, so a listener may call back into the
//! registry (e.g. remove itself) without deadlocking.
//!
//! # Invariants
//!
//! 1. A listener appears at most once; order is registration order.
//! 2. `add` always queues exactly one notification, new or not.
//! 3. One `trigger` queues its notifications in registration order,
//!    contiguously with respect to `add`/`remove`.
//! 4. A trigger that starts after `remove(l)` returned never queues `l`.
//!    Notifications already queued for `l` still run.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::trace;

use crate::dispatch::{Dispatcher, Notification, global_dispatcher};
use crate::listener::Listener;

/// Thread-safe, ordered, duplicate-free set of listeners for one data item.
///
/// Not `Clone`: each item owns exactly one registry.
pub struct Listeners {
    entries: RwLock<Vec<Listener>>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl Listeners {
    /// Empty registry delivering through the process-wide dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::with_dispatcher(global_dispatcher())
    }

    /// Empty registry delivering through `dispatcher`.
    #[must_use]
    pub fn with_dispatcher(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            dispatcher,
        }
    }

    /// Register `listener` if absent, then queue one notification for it so
    /// it can read the current state.
    pub fn add(&self, listener: &Listener) {
        let mut entries = self.write();
        let inserted = !entries.contains(listener);
        if inserted {
            entries.push(listener.clone());
        }
        // Still under the lock: a trigger that follows this add queues
        // after the priming notification.
        self.dispatcher.submit(Notification::new(listener.clone()));
        trace!(inserted, count = entries.len(), "listener added");
    }

    /// Unregister `listener`. Absent listeners are ignored.
    ///
    /// Every entry with the same identity is removed in one pass; the rest
    /// keep their relative order.
    pub fn remove(&self, listener: &Listener) {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|entry| entry != listener);
        trace!(
            removed = before - entries.len(),
            count = entries.len(),
            "listener removed"
        );
    }

    /// Queue one notification per registered listener, in registration
    /// order. Called by the owning item after its value changed.
    pub fn trigger(&self) {
        let entries = self.read();
        for listener in entries.iter() {
            self.dispatcher.submit(Notification::new(listener.clone()));
        }
        trace!(count = entries.len(), "listeners triggered");
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Whether `listener` is registered.
    #[must_use]
    pub fn contains(&self, listener: &Listener) -> bool {
        self.read().contains(listener)
    }

    /// Registered listeners, in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Listener> {
        self.read().clone()
    }

    // No user code runs under this lock, so a poisoned guard still protects
    // a consistent Vec.
    fn read(&self) -> RwLockReadGuard<'_, Vec<Listener>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Listener>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn push_unchecked(&self, listener: &Listener) {
        self.write().push(listener.clone());
    }
}

impl Default for Listeners {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.len())
            .finish_non_exhaustive()
    }
}
