//! Event producers.
//!
//! Two ways to get events onto the bus besides calling
//! [`EventQueue::publish_event`](crate::bus::EventQueue::publish_event) directly:
//! - [`EventDispatcher`] runs in-process listeners per event type before publishing
//! - [`ChangeMonitor`] polls a [`ChangeSource`] on its own thread and emits
//!   whatever changed since the last successful poll
//!
//! Monitors are cancellable: stopping a [`MonitorHandle`] interrupts the
//! current wait and joins the thread.
//!
//! # Example
//!
//! ```ignore
//! let dispatcher = Arc::new(EventDispatcher::new(bus));
//! let source = PollFn::new("grades", |since| grades_changed_since(since));
//! let handle = ChangeMonitor::new(source, dispatcher, MonitorConfig::grades()).spawn()?;
//! // ...
//! handle.stop()?;
//! ```

mod dispatcher;
mod monitor;
mod types;

pub use dispatcher::{EventDispatcher, EventListener, ListenerId};
pub use monitor::{ChangeMonitor, MonitorHandle, MonitorSet};
pub use types::{ChangeSource, MonitorConfig, MonitorStats, PollFn};
