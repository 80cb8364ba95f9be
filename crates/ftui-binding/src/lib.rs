#![forbid(unsafe_code)]

//! Thread-safe data binding core for FrankenTUI.
//!
//! # Role in FrankenTUI
//! `ftui-binding` lets application state be observed by any number of
//! independent listeners while writers mutate it from any thread. Change
//! notifications are queued, never run inline, and land in order on a single
//! logical update thread.
//!
//! # Primary responsibilities
//! - **[`DataItem`]**: the subscribe/unsubscribe contract of an observable slot.
//! - **[`DataListener`] / [`Listener`]**: change sinks and their identity handles.
//! - **[`Listeners`]**: the per-item registry that queues one notification
//!   per subscriber on every change, plus one on subscription.
//! - **[`dispatch`]**: the ordered, single-consumer queue that runs them.
//! - **[`BoundValue`]**: a ready-made generic bound value built on the above.
//!
//! # Example
//!
//! ```ignore
//! use ftui_binding::{BoundValue, DataItem, data_listener};
//!
//! let name = Arc::new(BoundValue::new(String::from("world")));
//! let reader = Arc::clone(&name);
//! let listener = data_listener(move || println!("hello, {}", reader.get()));
//!
//! name.add_listener(&listener); // prints "hello, world" on the dispatch thread
//! name.set("there".into());     // prints "hello, there"
//! name.remove_listener(&listener);
//! ```

pub mod dispatch;
pub mod item;
pub mod listener;
pub mod registry;
pub mod value;

pub use dispatch::{
    DispatchConfig, DispatchError, DispatchQueue, DispatchStats, DispatchThread, Dispatcher,
    ManualQueue, Notification, global_dispatcher, set_global_dispatcher,
};
pub use item::{DataItem, DataItemExt, WatchGuard};
pub use listener::{DataListener, Listener, data_listener};
pub use registry::Listeners;
pub use value::BoundValue;
