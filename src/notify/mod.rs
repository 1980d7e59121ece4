//! Change propagation from sources to typed subscribers.
//!
//! Overlay deliveries raise a coalescing signal on the [`ChangeBus`]; one
//! dispatcher task turns each signal into a reconciliation pass that calls
//! [`ConfigSubscriber::try_update`] on every registered subscriber.

mod bus;
mod subscriber;

pub use bus::{ChangeBus, spawn_dispatcher};
pub use subscriber::{ConfigSubscriber, RefreshError, TypedWatcher};
