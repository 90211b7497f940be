//! Lifecycle events and the typed handler table behind `on` / `on_message`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::protocol::InboundEnvelope;

/// Failure reported through the `error` event. Never returned across the manager's API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("websocket transport error: {0}")]
    Transport(String),
    #[error("could not decode inbound message: {0}")]
    Decode(String),
    #[error("max reconnect attempts ({attempts}) reached")]
    MaxAttemptsReached { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connecting,
    Open,
    Reconnecting { attempt: u32, delay: Duration },
    Error(ConnectionError),
    Close { code: Option<u16>, reason: String },
    Disconnected,
}

impl ConnectionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ConnectionEvent::Connecting => EventKind::Connecting,
            ConnectionEvent::Open => EventKind::Open,
            ConnectionEvent::Reconnecting { .. } => EventKind::Reconnecting,
            ConnectionEvent::Error(_) => EventKind::Error,
            ConnectionEvent::Close { .. } => EventKind::Close,
            ConnectionEvent::Disconnected => EventKind::Disconnected,
        }
    }
}

/// Well-known lifecycle event names; one handler list each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connecting,
    Open,
    Reconnecting,
    Error,
    Close,
    Disconnected,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Connecting,
        EventKind::Open,
        EventKind::Reconnecting,
        EventKind::Error,
        EventKind::Close,
        EventKind::Disconnected,
    ];
}

type EventHandler = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;
type MessageHandler = Arc<dyn Fn(&InboundEnvelope) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Event(EventKind),
    Message,
}

#[derive(Default)]
struct Table {
    events: HashMap<EventKind, Vec<(u64, EventHandler)>>,
    messages: Vec<(u64, MessageHandler)>,
}

/// Registration table shared between a manager and its subscriptions.
///
/// Handlers are cloned out of the table before being called, so a handler may
/// subscribe or unsubscribe without deadlocking.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    table: Mutex<Table>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on<F>(self: &Arc<Self>, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock()
            .events
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription::new(self, Slot::Event(kind), id)
    }

    pub fn on_message<F>(self: &Arc<Self>, handler: F) -> Subscription
    where
        F: Fn(&InboundEnvelope) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().messages.push((id, Arc::new(handler)));
        Subscription::new(self, Slot::Message, id)
    }

    pub fn emit(&self, event: &ConnectionEvent) {
        let handlers: Vec<EventHandler> = self
            .lock()
            .events
            .get(&event.kind())
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        for handler in handlers {
            handler(event);
        }
    }

    pub fn dispatch(&self, envelope: &InboundEnvelope) {
        let handlers: Vec<MessageHandler> = self
            .lock()
            .messages
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(envelope);
        }
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.lock().events.get(&kind).map_or(0, Vec::len)
    }

    pub fn message_handler_count(&self) -> usize {
        self.lock().messages.len()
    }

    /// Drop every registered handler.
    pub fn clear(&self) {
        let mut table = self.lock();
        table.events.clear();
        table.messages.clear();
    }

    fn remove(&self, slot: Slot, id: u64) {
        let mut table = self.lock();
        match slot {
            Slot::Event(kind) => {
                if let Some(list) = table.events.get_mut(&kind) {
                    list.retain(|(hid, _)| *hid != id);
                }
            }
            Slot::Message => table.messages.retain(|(hid, _)| *hid != id),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Table> {
        // A handler panicking mid-dispatch must not wedge the table.
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle for one registered handler. Dropping it unregisters the handler.
#[must_use = "dropping a Subscription unregisters its handler"]
pub struct Subscription {
    bus: Weak<EventBus>,
    slot: Slot,
    id: u64,
}

impl Subscription {
    fn new(bus: &Arc<EventBus>, slot: Slot, id: u64) -> Self {
        Self {
            bus: Arc::downgrade(bus),
            slot,
            id,
        }
    }

    /// Remove exactly this handler.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.slot, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("slot", &self.slot)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&ConnectionEvent) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move |_: &ConnectionEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn emit_only_reaches_matching_kind() {
        let bus = EventBus::new();
        let (opens, on_open) = counter();
        let (closes, on_close) = counter();
        let _a = bus.on(EventKind::Open, on_open);
        let _b = bus.on(EventKind::Close, on_close);

        bus.emit(&ConnectionEvent::Open);
        bus.emit(&ConnectionEvent::Open);
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unsubscribe_removes_exactly_one_handler() {
        let bus = EventBus::new();
        let (first, h1) = counter();
        let (second, h2) = counter();
        let s1 = bus.on(EventKind::Connecting, h1);
        let _s2 = bus.on(EventKind::Connecting, h2);
        assert_eq!(bus.handler_count(EventKind::Connecting), 2);

        s1.unsubscribe();
        bus.emit(&ConnectionEvent::Connecting);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count(EventKind::Connecting), 1);
    }

    #[test]
    fn message_handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s1 = Arc::clone(&seen);
        let s2 = Arc::clone(&seen);
        let _a = bus.on_message(move |env| {
            s1.lock().unwrap().push(format!("a:{}", env.query_id.as_deref().unwrap_or("")))
        });
        let _b = bus.on_message(move |env| {
            s2.lock().unwrap().push(format!("b:{}", env.query_id.as_deref().unwrap_or("")))
        });
        for id in ["1", "2"] {
            bus.dispatch(&InboundEnvelope {
                query_id: Some(id.into()),
                ..Default::default()
            });
        }
        assert_eq!(*seen.lock().unwrap(), vec!["a:1", "b:1", "a:2", "b:2"]);
    }

    #[test]
    fn handler_may_subscribe_during_dispatch() {
        let bus = EventBus::new();
        let nested = Arc::new(Mutex::new(Vec::new()));
        let bus2 = Arc::clone(&bus);
        let nested2 = Arc::clone(&nested);
        let _s = bus.on(EventKind::Open, move |_| {
            let sub = bus2.on(EventKind::Close, |_| {});
            nested2.lock().unwrap().push(sub);
        });
        bus.emit(&ConnectionEvent::Open);
        assert_eq!(bus.handler_count(EventKind::Close), 1);
        nested.lock().unwrap().clear();
        assert_eq!(bus.handler_count(EventKind::Close), 0);
    }

    #[test]
    fn subscription_outliving_bus_is_harmless() {
        let bus = EventBus::new();
        let sub = bus.on_message(|_| {});
        drop(bus);
        sub.unsubscribe();
    }
}
