//! Worker-wide observer bus.
//!
//! One bus is created per [`crate::Worker`] and shared by every entity below
//! it. Subscribers see entity creation, closure and pause transitions across
//! the whole hierarchy without holding any entity handle.

use std::fmt;

use tokio::sync::broadcast;

/// Kind of entity an [`ObserverEvent`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Worker,
    Router,
    WebRtcTransport,
    PlainTransport,
    PipeTransport,
    DirectTransport,
    Producer,
    Consumer,
    DataProducer,
    DataConsumer,
    AudioLevelObserver,
    ActiveSpeakerObserver,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverEvent {
    Created {
        kind: EntityKind,
        id: String,
        /// Owning entity; `None` for routers and the worker.
        parent_id: Option<String>,
    },
    Closed {
        kind: EntityKind,
        id: String,
    },
    Paused {
        kind: EntityKind,
        id: String,
    },
    Resumed {
        kind: EntityKind,
        id: String,
    },
}

const BUS_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct ObserverBus {
    tx: broadcast::Sender<ObserverEvent>,
}

impl ObserverBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Receive every event emitted from now on. Slow receivers lag and lose
    /// the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<ObserverEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: ObserverEvent) {
        // No receivers is fine.
        let _ = self.tx.send(event);
    }

    pub(crate) fn created(&self, kind: EntityKind, id: &str, parent_id: Option<&str>) {
        self.emit(ObserverEvent::Created {
            kind,
            id: id.to_string(),
            parent_id: parent_id.map(str::to_string),
        });
    }

    pub(crate) fn closed(&self, kind: EntityKind, id: &str) {
        self.emit(ObserverEvent::Closed {
            kind,
            id: id.to_string(),
        });
    }

    pub(crate) fn paused(&self, kind: EntityKind, id: &str, paused: bool) {
        let id = id.to_string();
        self.emit(if paused {
            ObserverEvent::Paused { kind, id }
        } else {
            ObserverEvent::Resumed { kind, id }
        });
    }
}

impl Default for ObserverBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObserverBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverBus")
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_events_in_order() {
        let bus = ObserverBus::new();
        let mut rx = bus.subscribe();
        bus.created(EntityKind::Router, "r1", None);
        bus.paused(EntityKind::Producer, "p1", true);
        bus.closed(EntityKind::Router, "r1");

        assert_eq!(
            rx.try_recv().unwrap(),
            ObserverEvent::Created {
                kind: EntityKind::Router,
                id: "r1".to_string(),
                parent_id: None
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ObserverEvent::Paused {
                kind: EntityKind::Producer,
                id: "p1".to_string()
            }
        );
        assert!(matches!(rx.try_recv().unwrap(), ObserverEvent::Closed { .. }));
    }

    #[test]
    fn emitting_without_receivers_is_harmless() {
        let bus = ObserverBus::new();
        bus.closed(EntityKind::Worker, "1234");
    }
}
