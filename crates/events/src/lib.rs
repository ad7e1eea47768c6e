//! Session notifications: event schema, the [`Notifier`] seam and the
//! in-process [`EventBus`] that fans events out to per-user groups.

pub mod bus;
pub mod event;

pub use bus::{EventBus, GroupEvent, GroupReceiver, Notifier, NotifyError};
pub use event::SessionEvent;
