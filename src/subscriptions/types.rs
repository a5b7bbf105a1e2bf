//! Subscriber identities and connection handles.

use crate::event::Event;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Who a connection belongs to.
///
/// Guests get a random per-connection id in their own variant, so a guest
/// key can never equal an authenticated user's key whatever that user's id
/// looks like.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubscriberId {
    User(String),
    Guest(Uuid),
}

impl SubscriberId {
    pub fn user(id: impl Into<String>) -> Self {
        SubscriberId::User(id.into())
    }

    /// Fresh guest identity, unique per connection.
    pub fn guest() -> Self {
        SubscriberId::Guest(Uuid::new_v4())
    }

    /// The authenticated user id, if any.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            SubscriberId::User(id) => Some(id),
            SubscriberId::Guest(_) => None,
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, SubscriberId::Guest(_))
    }
}

impl fmt::Debug for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriberId::User(id) => write!(f, "User({id})"),
            SubscriberId::Guest(id) => write!(f, "Guest({})", id.simple()),
        }
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriberId::User(id) => f.write_str(id),
            SubscriberId::Guest(id) => write!(f, "guest_{}", id.simple()),
        }
    }
}

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for one live connection, process-wide.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

impl HandleId {
    pub(crate) fn next() -> Self {
        HandleId(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a handle was removed from the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Inbox was full when an event was pushed (slow consumer).
    InboxFull,
    /// The receiving side of the inbox was dropped.
    Disconnected,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DropReason::InboxFull => "inbox_full",
            DropReason::Disconnected => "disconnected",
        })
    }
}

/// Outcome of pushing one event to a set of handles.
#[derive(Clone, Debug, Default)]
pub struct DeliveryReport {
    /// Number of inboxes the event landed in.
    pub delivered: usize,
    /// Handles that failed and were deregistered.
    pub dropped: Vec<(SubscriberId, HandleId, DropReason)>,
}

impl DeliveryReport {
    pub(crate) fn merge(&mut self, other: DeliveryReport) {
        self.delivered += other.delivered;
        self.dropped.extend(other.dropped);
    }
}

/// One live stream's inbox.
///
/// The bus keeps the sending half. Once the handle is deregistered (by
/// unsubscribe or after an overflow) the receiver drains what is left and
/// then reports disconnection.
pub struct ConnectionHandle {
    id: HandleId,
    subscriber: SubscriberId,
    receiver: crossbeam_channel::Receiver<Arc<Event>>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        id: HandleId,
        subscriber: SubscriberId,
        receiver: crossbeam_channel::Receiver<Arc<Event>>,
    ) -> Self {
        Self {
            id,
            subscriber,
            receiver,
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn subscriber(&self) -> &SubscriberId {
        &self.subscriber
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<Arc<Event>, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<Arc<Event>, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Arc<Event>, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently buffered without blocking.
    pub fn drain(&self) -> Vec<Arc<Event>> {
        self.receiver.try_iter().collect()
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("subscriber", &self.subscriber)
            .field("buffered", &self.receiver.len())
            .finish()
    }
}
