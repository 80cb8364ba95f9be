#![forbid(unsafe_code)]

//! Change listeners and their identity handles.
//!
//! A [`DataListener`] receives a single, payload-free "data changed" signal.
//! Notifications are level-triggered: the listener re-reads whatever state it
//! cares about, so rapid changes may coalesce into one observed value.
//!
//! Listeners are registered through a [`Listener`] handle. Equality of handles
//! is **identity** (the shared allocation), never structural: two adapters
//! built from the same closure are two independent subscriptions.
//!
//! # Invariants
//!
//! 1. `Listener::clone()` shares identity with the original.
//! 2. Every [`Listener::new`] / [`data_listener`] call produces a fresh identity.
//! 3. Listener code must not block for long: all notifications share one
//!    serialized dispatch thread.

use std::fmt;
use std::sync::Arc;

/// Something that can be told that a data item changed.
pub trait DataListener: Send + Sync {
    /// Called on the dispatch thread after the observed item changed
    /// (and once right after registration).
    fn data_changed(&self);
}

/// Adapter that turns a plain closure into a [`DataListener`].
struct FnListener<F> {
    callback: F,
}

impl<F: Fn() + Send + Sync> DataListener for FnListener<F> {
    fn data_changed(&self) {
        (self.callback)();
    }
}

/// Shared, identity-compared handle to a [`DataListener`].
///
/// Keep a clone around to unregister later; the registry holds its own clone.
#[derive(Clone)]
pub struct Listener {
    inner: Arc<dyn DataListener>,
}

impl Listener {
    /// Wrap a listener implementation in a new identity.
    pub fn new(listener: impl DataListener + 'static) -> Self {
        Self {
            inner: Arc::new(listener),
        }
    }

    /// Adopt an existing shared listener. Handles built from clones of the
    /// same `Arc` compare equal.
    #[must_use]
    pub fn from_arc(inner: Arc<dyn DataListener>) -> Self {
        Self { inner }
    }

    /// Deliver one change notification to the wrapped listener.
    pub fn notify(&self) {
        self.inner.data_changed();
    }

    /// Identity comparison.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }

    // Vtable pointers of the same type may differ between codegen units,
    // so only the data address counts.
    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.inner).cast::<()>()
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener").field(&self.addr()).finish()
    }
}

/// Build a listener from a closure.
///
/// Each call yields a distinct subscription, even for identical closures.
pub fn data_listener(callback: impl Fn() + Send + Sync + 'static) -> Listener {
    Listener::new(FnListener { callback })
}
