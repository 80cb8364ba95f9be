#![forbid(unsafe_code)]

//! Ordered delivery of change notifications onto one logical update thread.
//!
//! Registries never call listener code themselves. They wrap each pending
//! call in a [`Notification`] and hand it to a [`Dispatcher`], which runs it
//! later, serialized, on the thread the UI treats as its update thread.
//!
//! Two dispatchers ship with the crate:
//!
//! - [`DispatchThread`] / [`DispatchQueue`]: a dedicated worker thread fed by
//!   an unbounded channel. This is what the process-wide default uses.
//! - [`ManualQueue`]: a plain FIFO drained by the host via
//!   [`ManualQueue::run_pending`], for event loops that already own a thread.
//!
//! # Contract
//!
//! 1. `submit` never blocks the caller and never waits for listener code.
//! 2. Notifications run in submission order, one at a time.
//! 3. A panicking listener is caught, logged, and counted; delivery to the
//!    following notifications continues.
//! 4. A notification accepted by `submit` is executed unless the dispatcher
//!    was shut down before it was accepted (see [`DispatchError::Closed`]).
//!
//! ```text
//!  writer threads                 dispatch thread
//!  ──────────────                 ───────────────
//!  add_listener(A) ─┐
//!  trigger()  ──────┼──► [ A | A B | B ... ] ──► A.data_changed()
//!  trigger()  ──────┘         FIFO              B.data_changed() ...
//! ```

mod manual;
mod thread;

pub use manual::ManualQueue;
pub use thread::{DispatchConfig, DispatchQueue, DispatchThread};

use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::error;

use crate::listener::Listener;

/// Monotonic source for [`Notification::seq`], shared by every dispatcher.
static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Process-wide default dispatcher.
static GLOBAL: OnceLock<Arc<dyn Dispatcher>> = OnceLock::new();

/// One deferred `data_changed` call.
///
/// Carries no payload: the listener re-reads current state when it runs.
pub struct Notification {
    listener: Listener,
    seq: u64,
}

impl Notification {
    /// Create a notification for `listener`, stamped with the next sequence
    /// number.
    #[must_use]
    pub fn new(listener: Listener) -> Self {
        Self {
            listener,
            seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Target of this notification.
    #[must_use]
    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    /// Process-wide enqueue order. Larger means created later.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Run the listener.
    pub fn deliver(self) {
        self.listener.notify();
    }
}

impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification")
            .field("listener", &self.listener)
            .field("seq", &self.seq)
            .finish()
    }
}

/// Sink for notifications. Implementations must uphold the module contract.
pub trait Dispatcher: Send + Sync {
    /// Queue `notification` for execution on the dispatch thread.
    fn submit(&self, notification: Notification);
}

/// Errors from dispatch plumbing. Registries never surface these.
#[derive(Debug)]
pub enum DispatchError {
    /// The dispatcher has shut down and accepts no more work.
    Closed,
    /// The OS refused to start the dispatch thread.
    Spawn(io::Error),
    /// `flush` was called from the dispatch thread and would wait on itself.
    FlushOnDispatchThread,
    /// A process-wide dispatcher is already installed.
    GlobalAlreadySet,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "dispatcher is shut down"),
            Self::Spawn(err) => write!(f, "failed to spawn dispatch thread: {err}"),
            Self::FlushOnDispatchThread => {
                write!(f, "flush called from the dispatch thread")
            }
            Self::GlobalAlreadySet => write!(f, "global dispatcher already installed"),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn(err) => Some(err),
            _ => None,
        }
    }
}

/// Point-in-time dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Notifications accepted by `submit`.
    pub submitted: u64,
    /// Notifications whose listener returned normally.
    pub executed: u64,
    /// Notifications whose listener panicked.
    pub panicked: u64,
    /// Notifications refused because the dispatcher was closed.
    pub rejected: u64,
}

impl DispatchStats {
    /// Accepted but not yet finished.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.submitted
            .saturating_sub(self.executed)
            .saturating_sub(self.panicked)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    submitted: AtomicU64,
    executed: AtomicU64,
    panicked: AtomicU64,
    rejected: AtomicU64,
}

impl Counters {
    pub(crate) fn accepted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Undo an `accepted()` whose hand-off failed.
    pub(crate) fn unaccepted(&self) {
        self.submitted.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Run one notification, containing any panic it raises.
pub(crate) fn deliver_isolated(notification: Notification, counters: &Counters) {
    let seq = notification.seq();
    match panic::catch_unwind(AssertUnwindSafe(|| notification.deliver())) {
        Ok(()) => {
            counters.executed.fetch_add(1, Ordering::Relaxed);
        }
        Err(payload) => {
            counters.panicked.fetch_add(1, Ordering::Relaxed);
            error!(
                seq,
                reason = panic_message(payload.as_ref()),
                "listener panicked during change notification"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// The process-wide dispatcher used by registries built without an explicit
/// one.
///
/// Unless [`set_global_dispatcher`] ran first, the first call spawns a
/// detached [`DispatchThread`] with [`DispatchConfig::default`] that lives for
/// the rest of the process.
///
/// # Panics
///
/// Panics if the default dispatch thread cannot be spawned.
pub fn global_dispatcher() -> Arc<dyn Dispatcher> {
    Arc::clone(GLOBAL.get_or_init(|| {
        let thread = DispatchThread::spawn(DispatchConfig::default())
            .unwrap_or_else(|err| panic!("cannot start global dispatcher: {err}"));
        Arc::new(thread.detach())
    }))
}

/// Install the process-wide dispatcher. Must happen before anything calls
/// [`global_dispatcher`].
pub fn set_global_dispatcher(dispatcher: Arc<dyn Dispatcher>) -> Result<(), DispatchError> {
    GLOBAL
        .set(dispatcher)
        .map_err(|_| DispatchError::GlobalAlreadySet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::data_listener;

    #[test]
    fn sequence_numbers_increase() {
        let l = data_listener(|| {});
        let a = Notification::new(l.clone());
        let b = Notification::new(l);
        assert!(b.seq() > a.seq());
    }

    #[test]
    fn panics_are_counted_not_propagated() {
        let counters = Counters::default();
        counters.accepted();
        counters.accepted();

        deliver_isolated(
            Notification::new(data_listener(|| panic!("boom"))),
            &counters,
        );
        deliver_isolated(Notification::new(data_listener(|| {})), &counters);

        let stats = counters.snapshot();
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.executed, 1);
        assert_eq!(stats.in_flight(), 0);
    }

    #[test]
    fn panic_message_extracts_strings() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
        assert_eq!(panic_message(other.as_ref()), "<non-string panic payload>");
    }

    #[test]
    fn error_display() {
        assert_eq!(DispatchError::Closed.to_string(), "dispatcher is shut down");
        let spawn = DispatchError::Spawn(io::Error::other("no threads"));
        assert!(spawn.to_string().contains("no threads"));
        assert!(std::error::Error::source(&spawn).is_some());
    }

    #[test]
    fn global_dispatcher_is_shared() {
        let a = global_dispatcher();
        let b = global_dispatcher();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(matches!(
            set_global_dispatcher(Arc::new(ManualQueue::new())),
            Err(DispatchError::GlobalAlreadySet)
        ));
    }
}
