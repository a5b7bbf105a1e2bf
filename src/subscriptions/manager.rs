//! Registry of live connections and per-handle delivery.

use crate::event::Event;
use crossbeam_channel::{bounded, Sender, TrySendError};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{ConnectionHandle, DeliveryReport, DropReason, HandleId, SubscriberId};

/// Maps each subscriber to its open connection handles.
///
/// Not synchronized on its own: the bus owns it inside its single lock, so
/// registration, delivery and removal never interleave. Every push is a
/// non-blocking `try_send`.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: HashMap<SubscriberId, BTreeMap<HandleId, Sender<Arc<Event>>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new inbox for `subscriber` and register its sending half.
    ///
    /// Returns the handle together with a sender usable for backfill.
    pub fn register(
        &mut self,
        subscriber: SubscriberId,
        inbox_capacity: usize,
    ) -> (ConnectionHandle, Sender<Arc<Event>>) {
        let id = HandleId::next();
        let (sender, receiver) = bounded(inbox_capacity.max(1));

        self.subscribers
            .entry(subscriber.clone())
            .or_default()
            .insert(id, sender.clone());

        (ConnectionHandle::new(id, subscriber, receiver), sender)
    }

    /// Deregister one handle. Drops the subscriber entry with its last handle.
    ///
    /// Returns false if the handle was not registered (already removed).
    pub fn remove(&mut self, subscriber: &SubscriberId, id: HandleId) -> bool {
        let Some(handles) = self.subscribers.get_mut(subscriber) else {
            return false;
        };
        let removed = handles.remove(&id).is_some();
        if handles.is_empty() {
            self.subscribers.remove(subscriber);
        }
        removed
    }

    /// Push to every handle of one subscriber.
    pub fn deliver_to(&mut self, subscriber: &SubscriberId, event: &Arc<Event>) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if let Some(handles) = self.subscribers.get(subscriber) {
            push_all(subscriber, handles, event, &mut report);
        }
        self.drop_failed(&report);
        report
    }

    /// Push to every handle of every subscriber.
    pub fn broadcast(&mut self, event: &Arc<Event>) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for (subscriber, handles) in self.subscribers.iter() {
            push_all(subscriber, handles, event, &mut report);
        }
        self.drop_failed(&report);
        report
    }

    /// Deregister handles that failed during a delivery pass.
    fn drop_failed(&mut self, report: &DeliveryReport) {
        for (subscriber, id, reason) in &report.dropped {
            warn!(
                subscriber = %subscriber,
                handle = %id,
                reason = %reason,
                "dropping connection handle"
            );
            self.remove(subscriber, *id);
        }
    }

    /// Whether `subscriber` has at least one open handle.
    pub fn contains(&self, subscriber: &SubscriberId) -> bool {
        self.subscribers.contains_key(subscriber)
    }

    /// Number of open handles for `subscriber`.
    pub fn handle_count(&self, subscriber: &SubscriberId) -> usize {
        self.subscribers.get(subscriber).map_or(0, |h| h.len())
    }

    /// Number of subscribers with at least one handle.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Try every handle; a failure on one never stops the rest.
fn push_all(
    subscriber: &SubscriberId,
    handles: &BTreeMap<HandleId, Sender<Arc<Event>>>,
    event: &Arc<Event>,
    report: &mut DeliveryReport,
) {
    for (id, sender) in handles {
        match sender.try_send(Arc::clone(event)) {
            Ok(()) => {
                report.delivered += 1;
            }
            Err(TrySendError::Full(_)) => {
                report
                    .dropped
                    .push((subscriber.clone(), *id, DropReason::InboxFull));
            }
            Err(TrySendError::Disconnected(_)) => {
                report
                    .dropped
                    .push((subscriber.clone(), *id, DropReason::Disconnected));
            }
        }
    }
    debug!(
        subscriber = %subscriber,
        event_id = %event.event_id(),
        handles = handles.len(),
        "pushed event"
    );
}
