//! Live connection registry.
//!
//! Each open stream owns a [`ConnectionHandle`] wrapping a bounded inbox.
//! A user may hold several handles at once (one per device). Delivery is
//! best-effort:
//! - pushes never block the publisher
//! - a full or disconnected inbox gets its handle deregistered
//! - a failure on one handle never stops delivery to the others
//!
//! # Example
//!
//! ```ignore
//! let mut registry = SubscriberRegistry::new();
//! let (handle, _) = registry.register(SubscriberId::user("S1"), 100);
//!
//! registry.deliver_to(handle.subscriber(), &event);
//! let received = handle.recv_timeout(Duration::from_secs(1))?;
//! ```

mod manager;
mod types;

pub use manager::SubscriberRegistry;
pub use types::{ConnectionHandle, DeliveryReport, DropReason, HandleId, SubscriberId};
