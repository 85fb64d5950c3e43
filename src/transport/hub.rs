//! Subscriber registry shared by the transports.
//!
//! Each subscriber gets its own unbounded channel keyed by a UUID, like the
//! per-client sender map a relay server keeps. Publishing walks the map and
//! forgets receivers that have gone away. A `Subscription` removes itself
//! from the map when dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::event::{ChatEvent, ConnectionState, TransportEvent};

#[cfg(test)]
#[path = "hub_test.rs"]
mod hub_test;

#[derive(Default)]
struct HubState {
    subscribers: HashMap<Uuid, mpsc::UnboundedSender<TransportEvent>>,
    connection: ConnectionState,
    closed: bool,
}

/// Fan-out point for one transport's events.
#[derive(Clone, Default)]
pub struct EventHub {
    state: Arc<Mutex<HubState>>,
}

impl EventHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. The current connection state is queued first.
    /// After [`EventHub::close`] the handle yields the state and then ends.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        let mut state = self.lock();
        if tx.send(TransportEvent::State(state.connection)).is_ok() && !state.closed {
            state.subscribers.insert(id, tx);
        }
        Subscription { id, rx, hub: Arc::downgrade(&self.state) }
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.lock().connection
    }

    /// Record a new connection state. Publishes only on change; returns
    /// whether it changed.
    pub fn set_state(&self, next: ConnectionState) -> bool {
        let mut state = self.lock();
        if state.connection == next {
            return false;
        }
        state.connection = next;
        broadcast(&mut state, &TransportEvent::State(next));
        true
    }

    pub fn publish(&self, event: ChatEvent) {
        broadcast(&mut self.lock(), &TransportEvent::Event(event));
    }

    /// Drop every subscriber channel; their `recv` returns `None`.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.subscribers.clear();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn broadcast(state: &mut HubState, event: &TransportEvent) {
    state.subscribers.retain(|_, tx| tx.send(event.clone()).is_ok());
}

/// Handle yielding one subscriber's events in delivery order.
pub struct Subscription {
    id: Uuid,
    rx: mpsc::UnboundedReceiver<TransportEvent>,
    hub: Weak<Mutex<HubState>>,
}

impl Subscription {
    /// Next event, or `None` once the transport shuts down.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }

    /// Next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<TransportEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(_) => None,
        }
    }

    /// Remove this handle from the hub now.
    pub fn unsubscribe(self) {
        drop(self);
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.lock().unwrap_or_else(PoisonError::into_inner).subscribers.remove(&self.id);
        }
    }
}
