#![forbid(unsafe_code)]

//! The observable-slot contract.
//!
//! Bindable value types implement [`DataItem`] by embedding a
//! [`Listeners`](crate::Listeners) in a private field and forwarding to it.
//! Because the field is private, only the owning type can call `trigger`.
//!
//! ```ignore
//! struct Counter {
//!     value: AtomicU64,
//!     listeners: Listeners,
//! }
//!
//! impl Counter {
//!     fn increment(&self) {
//!         self.value.fetch_add(1, Ordering::SeqCst);
//!         self.listeners.trigger();
//!     }
//! }
//!
//! impl DataItem for Counter {
//!     fn add_listener(&self, l: &Listener) { self.listeners.add(l) }
//!     fn remove_listener(&self, l: &Listener) { self.listeners.remove(l) }
//! }
//! ```

use std::fmt;

use crate::listener::{Listener, data_listener};

/// An observable value slot.
pub trait DataItem {
    /// Attach `listener`. It is notified once right away and again after
    /// every change. Attaching an already attached listener only queues the
    /// extra notification.
    fn add_listener(&self, listener: &Listener);

    /// Detach `listener`. Detaching an unknown listener does nothing.
    fn remove_listener(&self, listener: &Listener);
}

/// Convenience methods for every [`DataItem`].
pub trait DataItemExt: DataItem {
    /// Attach a closure for as long as the returned guard lives.
    ///
    /// Items never drop listeners by themselves; the guard is an opt-in way
    /// to tie the subscription to a scope.
    fn watch(&self, callback: impl Fn() + Send + Sync + 'static) -> WatchGuard<'_, Self> {
        let listener = data_listener(callback);
        self.add_listener(&listener);
        WatchGuard {
            item: self,
            listener,
        }
    }
}

impl<T: DataItem + ?Sized> DataItemExt for T {}

/// Removes its listener from the item when dropped.
#[must_use = "dropping the guard detaches the listener immediately"]
pub struct WatchGuard<'a, I: DataItem + ?Sized> {
    item: &'a I,
    listener: Listener,
}

impl<I: DataItem + ?Sized> WatchGuard<'_, I> {
    /// The listener this guard registered.
    #[must_use]
    pub fn listener(&self) -> &Listener {
        &self.listener
    }
}

impl<I: DataItem + ?Sized> Drop for WatchGuard<'_, I> {
    fn drop(&mut self) {
        self.item.remove_listener(&self.listener);
    }
}

impl<I: DataItem + ?Sized> fmt::Debug for WatchGuard<'_, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchGuard")
            .field("listener", &self.listener)
            .finish_non_exhaustive()
    }
}
