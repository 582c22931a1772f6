//! Per-entity event handler lists and close bookkeeping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Identifies a handler registered with `on()`, for removal with `off()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct HandlerList<E> {
    next: u64,
    handlers: Vec<(u64, Handler<E>)>,
}

/// Handlers for one entity's typed events.
pub(crate) struct EventHandlers<E> {
    list: Mutex<HandlerList<E>>,
}

impl<E> EventHandlers<E> {
    pub(crate) fn new() -> Self {
        Self {
            list: Mutex::new(HandlerList {
                next: 0,
                handlers: Vec::new(),
            }),
        }
    }

    pub(crate) fn add<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let mut list = self.list.lock();
        list.next += 1;
        let id = list.next;
        list.handlers.push((id, Arc::new(handler)));
        HandlerId(id)
    }

    pub(crate) fn remove(&self, id: HandlerId) {
        self.list.lock().handlers.retain(|(key, _)| *key != id.0);
    }

    /// Call every handler. The list lock is not held while handlers run.
    pub(crate) fn emit(&self, event: &E) {
        let handlers: Vec<Handler<E>> = self
            .list
            .lock()
            .handlers
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    /// Drop every handler, releasing whatever they captured.
    pub(crate) fn clear(&self) {
        self.list.lock().handlers.clear();
    }
}

type CloseCallback = Box<dyn FnOnce() + Send>;

/// Callbacks fired exactly once when an entity closes, whichever way.
pub(crate) struct CloseHandlers {
    callbacks: Mutex<Option<Vec<CloseCallback>>>,
}

impl CloseHandlers {
    pub(crate) fn new() -> Self {
        Self {
            callbacks: Mutex::new(Some(Vec::new())),
        }
    }

    /// Register a callback. Runs it right away if the entity already closed.
    pub(crate) fn add<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut callbacks = self.callbacks.lock();
        match callbacks.as_mut() {
            Some(list) => list.push(Box::new(callback)),
            None => {
                drop(callbacks);
                callback();
            }
        }
    }

    pub(crate) fn run(&self) {
        let callbacks = self.callbacks.lock().take();
        for callback in callbacks.into_iter().flatten() {
            callback();
        }
    }
}

/// Open → Closed state machine.
///
/// `begin_close` wins exactly once. `closed()` only reports true once
/// `finish_close` ran, which callers do after closing their children, so a
/// parent never looks closed while a child still looks open.
pub(crate) struct Lifecycle {
    closing: AtomicBool,
    closed: AtomicBool,
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            closing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns true for the first caller only.
    pub(crate) fn begin_close(&self) -> bool {
        !self.closing.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn finish_close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
