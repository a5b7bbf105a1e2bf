//! Typed listeners in front of the bus.

use crate::bus::EventQueue;
use crate::error::{BusError, Result};
use crate::event::{Event, EventInput};
use crate::types::EventType;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

/// In-process callback for one event type.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &Event) -> Result<()>;
}

impl<F> EventListener for F
where
    F: Fn(&Event) -> Result<()> + Send + Sync,
{
    fn on_event(&self, event: &Event) -> Result<()> {
        self(event)
    }
}

/// Identifier returned by [`EventDispatcher::on`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

type Listeners = HashMap<EventType, Vec<(ListenerId, Arc<dyn EventListener>)>>;

/// Runs listeners for each emitted event, then publishes it to the bus.
pub struct EventDispatcher {
    bus: Arc<EventQueue>,
    listeners: RwLock<Listeners>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new(bus: Arc<EventQueue>) -> Self {
        Self {
            bus,
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn bus(&self) -> &Arc<EventQueue> {
        &self.bus
    }

    /// Register a listener for one event type.
    pub fn on<L>(&self, event_type: EventType, listener: L) -> ListenerId
    where
        L: EventListener + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let listener: Arc<dyn EventListener> = Arc::new(listener);
        self.listeners
            .write()
            .entry(event_type)
            .or_default()
            .push((id, listener));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn off(&self, event_type: EventType, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let Some(list) = listeners.get_mut(&event_type) else {
            return false;
        };
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            listeners.remove(&event_type);
        }
        removed
    }

    pub fn listener_count(&self, event_type: EventType) -> usize {
        self.listeners.read().get(&event_type).map_or(0, |l| l.len())
    }

    /// Build an event from `input`, notify listeners, and publish it.
    pub fn emit(&self, input: EventInput) -> Arc<Event> {
        self.emit_event(input.build())
    }

    /// Notify listeners of a built event and publish it.
    ///
    /// Listener failures are logged and never stop other listeners or the publish.
    pub fn emit_event(&self, event: Event) -> Arc<Event> {
        let listeners: Vec<_> = self
            .listeners
            .read()
            .get(&event.event_type())
            .map(|l| l.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in listeners {
            if let Err(e) = listener.on_event(&event) {
                let e = BusError::Listener {
                    event_type: event.event_type().to_string(),
                    message: e.to_string(),
                };
                error!(event_id = %event.event_id(), error = %e, "event listener failed");
            }
        }

        self.bus.publish_event(event)
    }
}
