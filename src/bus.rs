//! The event bus: per-user queues, the public queue, history and live delivery.

use crate::buffer::BoundedBuffer;
use crate::error::Result;
use crate::event::Event;
use crate::subscriptions::{ConnectionHandle, DeliveryReport, HandleId, SubscriberId, SubscriberRegistry};
use crate::types::Timestamp;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bus capacities.
#[derive(Clone, Debug)]
pub struct BusConfig {
    /// Max events per user queue and in the public queue.
    /// Default: 1000
    pub queue_capacity: usize,

    /// Max events in each user's history.
    /// Default: 100
    pub history_capacity: usize,

    /// Max buffered events per connection before it is dropped.
    /// Default: 100
    pub inbox_capacity: usize,

    /// Public events replayed to a new connection.
    /// Default: 10
    pub backfill_public: usize,

    /// Private events replayed to a new connection.
    /// Default: 20
    pub backfill_private: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            history_capacity: 100,
            inbox_capacity: 100,
            backfill_public: 10,
            backfill_private: 20,
        }
    }
}

/// Everything guarded by the bus lock.
struct BusState {
    /// Private events per user, awaiting delivery or resync.
    queues: HashMap<String, BoundedBuffer<Arc<Event>>>,
    /// Public events, visible to everyone.
    global_queue: BoundedBuffer<Arc<Event>>,
    /// Recent private events per user.
    event_history: HashMap<String, BoundedBuffer<Arc<Event>>>,
    /// Live connections.
    subscribers: SubscriberRegistry,
}

/// Result of a resync request.
#[derive(Clone, Debug, Serialize)]
pub struct SyncResponse {
    pub events: Vec<Arc<Event>>,
    pub sync_timestamp: Timestamp,
    pub count: usize,
}

impl SyncResponse {
    fn new(events: Vec<Arc<Event>>) -> Self {
        Self {
            count: events.len(),
            events,
            sync_timestamp: Timestamp::now(),
        }
    }
}

/// Read-only view of the bus for one caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StreamStatus {
    /// The caller's user id, or `"guest"`.
    pub user_id: String,
    pub is_online: bool,
    pub unread_count: usize,
    pub system_status: &'static str,
    pub connected_users: usize,
    pub total_events: usize,
}

/// In-process publish/subscribe bus.
///
/// Construct one per process, wrap it in an `Arc` and hand it to every
/// stream session and producer. All mutation goes through one write lock;
/// nothing blocks while holding it, since inbox pushes are `try_send`.
/// Nothing is persisted: state lives as long as the instance.
pub struct EventQueue {
    config: BusConfig,
    state: RwLock<BusState>,
}

impl EventQueue {
    /// Create an empty bus.
    pub fn new(config: BusConfig) -> Self {
        let state = BusState {
            queues: HashMap::new(),
            global_queue: BoundedBuffer::new(config.queue_capacity),
            event_history: HashMap::new(),
            subscribers: SubscriberRegistry::new(),
        };
        Self {
            config,
            state: RwLock::new(state),
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    // --- Publishing ---

    /// Store an event and push it to live connections.
    ///
    /// Public events go to the public queue and to every connection of every
    /// subscriber. Private events go to each target's queue and history and
    /// to that target's connections. Never fails: connections whose inbox is
    /// full or closed are deregistered and skipped.
    ///
    /// The event is restamped while the write lock is held, so every queue
    /// is in timestamp order and a resync from any delivered event's
    /// timestamp returns everything published after it.
    pub fn publish_event(&self, mut event: Event) -> Arc<Event> {
        let mut report = DeliveryReport::default();

        let event = {
            let mut state = self.state.write();
            event.stamp(Timestamp::now());
            let event = Arc::new(event);

            if event.is_public() {
                state.global_queue.push(Arc::clone(&event));
                report = state.subscribers.broadcast(&event);
            } else {
                if event.target_users().is_empty() {
                    warn!(
                        event_id = %event.event_id(),
                        event_type = %event.event_type(),
                        "private event has no target users"
                    );
                }
                for user_id in event.target_users() {
                    self.enqueue_private(&mut state, user_id, &event);
                    let delivered = state
                        .subscribers
                        .deliver_to(&SubscriberId::user(user_id.as_str()), &event);
                    report.merge(delivered);
                }
            }
            event
        };

        debug!(
            event_id = %event.event_id(),
            event_type = %event.event_type(),
            public = event.is_public(),
            delivered = report.delivered,
            dropped = report.dropped.len(),
            "published event"
        );
        event
    }

    fn enqueue_private(&self, state: &mut BusState, user_id: &str, event: &Arc<Event>) {
        let capacity = self.config.queue_capacity;
        state
            .queues
            .entry(user_id.to_string())
            .or_insert_with(|| BoundedBuffer::new(capacity))
            .push(Arc::clone(event));

        let capacity = self.config.history_capacity;
        state
            .event_history
            .entry(user_id.to_string())
            .or_insert_with(|| BoundedBuffer::new(capacity))
            .push(Arc::clone(event));
    }

    // --- Subscriptions ---

    /// Open a connection for an authenticated user and backfill it.
    pub fn subscribe(&self, user_id: &str) -> ConnectionHandle {
        self.attach(SubscriberId::user(user_id))
    }

    /// Open a connection for an anonymous guest under a fresh guest id.
    ///
    /// Guests only ever hold public events: nothing is queued under a guest id.
    pub fn subscribe_guest(&self) -> ConnectionHandle {
        self.attach(SubscriberId::guest())
    }

    fn attach(&self, subscriber: SubscriberId) -> ConnectionHandle {
        let mut state = self.state.write();
        let (handle, sender) = state
            .subscribers
            .register(subscriber.clone(), self.config.inbox_capacity);

        let mut backfill: Vec<Arc<Event>> = state
            .global_queue
            .recent(self.config.backfill_public)
            .cloned()
            .collect();
        if let Some(queue) = subscriber.user_id().and_then(|id| state.queues.get(id)) {
            backfill.extend(queue.recent(self.config.backfill_private).cloned());
        }
        backfill.sort_by_key(|e| e.timestamp());

        let mut replayed = 0;
        for event in backfill {
            // Best effort: stop at the first push the inbox refuses.
            if sender.try_send(event).is_err() {
                break;
            }
            replayed += 1;
        }

        info!(
            subscriber = %subscriber,
            handle = %handle.id(),
            replayed,
            connections = state.subscribers.handle_count(&subscriber),
            "subscribed"
        );
        handle
    }

    /// Close one of a user's connections. Unknown handles are a no-op.
    pub fn unsubscribe(&self, user_id: &str, handle: &ConnectionHandle) {
        self.detach(&SubscriberId::user(user_id), handle.id());
    }

    /// Close a connection using the identity it was opened with.
    pub fn release(&self, handle: &ConnectionHandle) {
        self.detach(handle.subscriber(), handle.id());
    }

    pub(crate) fn detach(&self, subscriber: &SubscriberId, id: HandleId) -> bool {
        let removed = self.state.write().subscribers.remove(subscriber, id);
        if removed {
            info!(subscriber = %subscriber, handle = %id, "unsubscribed");
        }
        removed
    }

    // --- Resync ---

    /// Events newer than `since` (ISO-8601) from the public queue and the
    /// user's queue, oldest first.
    ///
    /// Fails only if `since` cannot be parsed.
    pub fn get_events_since(&self, user_id: &str, since: &str) -> Result<Vec<Arc<Event>>> {
        let since = Timestamp::parse(since)?;
        Ok(self.events_since(user_id, since))
    }

    /// Same as [`get_events_since`](Self::get_events_since) with a parsed cutoff.
    pub fn events_since(&self, user_id: &str, since: Timestamp) -> Vec<Arc<Event>> {
        let state = self.state.read();
        let mut events: Vec<Arc<Event>> = state
            .global_queue
            .iter()
            .chain(state.queues.get(user_id).into_iter().flat_map(|q| q.iter()))
            .filter(|e| e.timestamp() > since)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp());
        events
    }

    /// Public events newer than `since`, oldest first. Guest resync.
    pub fn public_events_since(&self, since: &str) -> Result<Vec<Arc<Event>>> {
        let since = Timestamp::parse(since)?;
        let state = self.state.read();
        let mut events: Vec<Arc<Event>> = state
            .global_queue
            .iter()
            .filter(|e| e.timestamp() > since)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.timestamp());
        Ok(events)
    }

    /// Resync for an authenticated user, wrapped with the sync time.
    pub fn sync(&self, user_id: &str, since: &str) -> Result<SyncResponse> {
        let events = self.get_events_since(user_id, since)?;
        info!(user_id, count = events.len(), "incremental sync");
        Ok(SyncResponse::new(events))
    }

    /// Resync for a guest: public events only.
    pub fn sync_guest(&self, since: &str) -> Result<SyncResponse> {
        let events = self.public_events_since(since)?;
        info!(count = events.len(), "guest incremental sync");
        Ok(SyncResponse::new(events))
    }

    // --- Introspection ---

    /// Whether the user has at least one open connection.
    pub fn is_online(&self, user_id: &str) -> bool {
        self.state
            .read()
            .subscribers
            .contains(&SubscriberId::user(user_id))
    }

    /// Number of open connections the user holds.
    pub fn connection_count(&self, user_id: &str) -> usize {
        self.state
            .read()
            .subscribers
            .handle_count(&SubscriberId::user(user_id))
    }

    /// Length of the user's private queue.
    pub fn unread_count(&self, user_id: &str) -> usize {
        self.state.read().queues.get(user_id).map_or(0, |q| q.len())
    }

    /// Subscribers (users and guests) with at least one open connection.
    pub fn connected_users(&self) -> usize {
        self.state.read().subscribers.subscriber_count()
    }

    /// Length of the public queue.
    pub fn total_events(&self) -> usize {
        self.state.read().global_queue.len()
    }

    /// Snapshot of the user's private queue, oldest first.
    pub fn queued_events(&self, user_id: &str) -> Vec<Arc<Event>> {
        self.state
            .read()
            .queues
            .get(user_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the public queue, oldest first.
    pub fn public_events(&self) -> Vec<Arc<Event>> {
        self.state.read().global_queue.iter().cloned().collect()
    }

    /// Snapshot of the user's history, oldest first.
    pub fn history(&self, user_id: &str) -> Vec<Arc<Event>> {
        self.state
            .read()
            .event_history
            .get(user_id)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Status for a caller; `None` means an anonymous guest.
    pub fn status(&self, user_id: Option<&str>) -> StreamStatus {
        let state = self.state.read();
        let (user_id, is_online, unread_count) = match user_id {
            Some(id) => (
                id.to_string(),
                state.subscribers.contains(&SubscriberId::user(id)),
                state.queues.get(id).map_or(0, |q| q.len()),
            ),
            None => ("guest".to_string(), false, 0),
        };
        StreamStatus {
            user_id,
            is_online,
            unread_count,
            system_status: "running",
            connected_users: state.subscribers.subscriber_count(),
            total_events: state.global_queue.len(),
        }
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}
