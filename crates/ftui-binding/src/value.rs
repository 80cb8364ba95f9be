#![forbid(unsafe_code)]

//! Thread-safe bound value.
//!
//! # Design
//!
//! [`BoundValue<T>`] pairs a value behind an `RwLock` with an embedded
//! [`Listeners`] registry. Mutations compare against the current value
//! (`PartialEq`); when it actually changed, the version is bumped, the value
//! lock is released, and the registry is triggered. Listeners run later on
//! the dispatch thread and read the value back through [`BoundValue::get`].
//!
//! # Failure Modes
//!
//! - **Panicking `update` closure**: the value lock is poisoned. The value is
//!   left as the closure left it, no notification is sent, and later calls
//!   keep working on the recovered guard.
//! - **Slow listeners**: delay every other notification on the same
//!   dispatcher, but never the writer.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::dispatch::Dispatcher;
use crate::item::DataItem;
use crate::listener::Listener;
use crate::registry::Listeners;

struct Slot<T> {
    value: T,
    version: u64,
}

/// A shared, version-tracked value that notifies listeners on change.
///
/// # Invariants
///
/// 1. `version` increments by exactly 1 on each value-changing mutation.
/// 2. `set(v)` where `v == current` is a no-op.
/// 3. Each change queues one notification per listener, in registration
///    order, after the new value is visible to `get`.
pub struct BoundValue<T> {
    slot: RwLock<Slot<T>>,
    listeners: Listeners,
}

impl<T: Clone + PartialEq + Send + Sync> BoundValue<T> {
    /// Create a bound value delivering through the process-wide dispatcher.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::from_parts(value, Listeners::new())
    }

    /// Create a bound value delivering through `dispatcher`.
    #[must_use]
    pub fn with_dispatcher(value: T, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self::from_parts(value, Listeners::with_dispatcher(dispatcher))
    }

    fn from_parts(value: T, listeners: Listeners) -> Self {
        Self {
            slot: RwLock::new(Slot { value, version: 0 }),
            listeners,
        }
    }

    /// Get a clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.read(|slot| slot.value.clone())
    }

    /// Access the current value by reference without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.read(|slot| f(&slot.value))
    }

    /// Replace the value. Listeners are notified only if it changed.
    pub fn set(&self, value: T) {
        let changed = {
            let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
            if slot.value == value {
                false
            } else {
                slot.value = value;
                slot.version += 1;
                true
            }
        };
        if changed {
            self.listeners.trigger();
        }
    }

    /// Modify the value in place. Listeners are notified only if the result
    /// differs from the value before the call.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let changed = {
            let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
            let old = slot.value.clone();
            f(&mut slot.value);
            if slot.value == old {
                false
            } else {
                slot.version += 1;
                true
            }
        };
        if changed {
            self.listeners.trigger();
        }
    }

    /// Number of value-changing mutations so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.read(|slot| slot.version)
    }

    /// Number of attached listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn read<R>(&self, f: impl FnOnce(&Slot<T>) -> R) -> R {
        f(&self.slot.read().unwrap_or_else(PoisonError::into_inner))
    }
}

impl<T: Clone + PartialEq + Send + Sync> DataItem for BoundValue<T> {
    fn add_listener(&self, listener: &Listener) {
        self.listeners.add(listener);
    }

    fn remove_listener(&self, listener: &Listener) {
        self.listeners.remove(listener);
    }
}

impl<T: Clone + PartialEq + Send + Sync + Default> Default for BoundValue<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for BoundValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("BoundValue")
            .field("value", &slot.value)
            .field("version", &slot.version)
            .field("listener_count", &self.listeners.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
