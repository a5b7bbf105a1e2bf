//! # Campus Stream
//!
//! Real-time event push for a campus backend. Producers publish events to an
//! in-process bus; clients hold long-lived server-sent-event streams and
//! resync over plain requests after a reconnect.
//!
//! ## Core Concepts
//!
//! - **Events**: Immutable, typed notifications that are either public or
//!   addressed to a list of users
//! - **Queue**: Bounded per-user queues, a global public queue and a short
//!   per-user history, all behind one lock
//! - **Subscriptions**: One bounded inbox per open connection; several per user
//! - **Streams**: Connection state machine with heartbeats and guest filtering
//! - **Producers**: Typed listeners and cancellable periodic change monitors
//!
//! ## Example
//!
//! ```ignore
//! use campus_stream::{EventInput, EventQueue, StreamConfig, StreamSession};
//! use std::sync::Arc;
//!
//! let bus = Arc::new(EventQueue::default());
//!
//! // Publish a grade to one student
//! bus.publish_event(EventInput::grade_update("S1", "Physics", 91.0, "A").build());
//!
//! // Stream it (the HTTP layer supplies the sink)
//! let mut session = StreamSession::authenticated(Arc::clone(&bus), "S1", StreamConfig::from_env());
//! session.run(&mut sink)?;
//!
//! // Or catch up after a reconnect
//! let missed = bus.get_events_since("S1", "2024-01-01T00:00:00Z")?;
//! ```

pub mod buffer;
pub mod bus;
pub mod error;
pub mod event;
pub mod producer;
pub mod stream;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use buffer::BoundedBuffer;
pub use bus::{BusConfig, EventQueue, StreamStatus, SyncResponse};
pub use error::{BusError, Result};
pub use event::{Event, EventInput, Payload};
pub use producer::{
    ChangeMonitor, ChangeSource, EventDispatcher, EventListener, ListenerId, MonitorConfig,
    MonitorHandle, MonitorSet, MonitorStats, PollFn,
};
pub use stream::{
    EventSink, SseFrame, StreamConfig, StreamEnd, StreamKind, StreamSession, StreamState,
    StreamSummary, SubscriptionGuard, WriterSink,
};
pub use subscriptions::{
    ConnectionHandle, DeliveryReport, DropReason, HandleId, SubscriberId, SubscriberRegistry,
};
pub use types::*;
