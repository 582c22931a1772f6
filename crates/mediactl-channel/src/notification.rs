use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::message::Notification;

/// Callback invoked for every notification addressed to a target.
pub type NotificationHandler = Arc<dyn Fn(&Notification) + Send + Sync>;

#[derive(Default)]
struct RouterState {
    next_key: u64,
    handlers: HashMap<String, Vec<(u64, NotificationHandler)>>,
}

/// Dispatches engine notifications to the listeners of their `targetId`.
#[derive(Clone, Default)]
pub struct NotificationRouter {
    state: Arc<Mutex<RouterState>>,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen to notifications for `target_id` until the returned
    /// [`Subscription`] is dropped.
    pub fn subscribe<F>(&self, target_id: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let target_id = target_id.into();
        let mut state = self.state.lock();
        state.next_key += 1;
        let key = state.next_key;
        state
            .handlers
            .entry(target_id.clone())
            .or_default()
            .push((key, Arc::new(handler)));

        Subscription {
            state: Arc::downgrade(&self.state),
            target_id,
            key,
        }
    }

    /// Deliver a notification. Returns false when nobody listens to its target.
    ///
    /// Handlers run without the router lock held, so they may subscribe or
    /// unsubscribe.
    pub fn dispatch(&self, notification: &Notification) -> bool {
        let handlers: Vec<NotificationHandler> = {
            let state = self.state.lock();
            match state.handlers.get(&notification.target_id) {
                Some(handlers) => handlers.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => Vec::new(),
            }
        };

        if handlers.is_empty() {
            tracing::debug!(
                target_id = %notification.target_id,
                event = %notification.event,
                "notification for unknown target dropped"
            );
            return false;
        }

        for handler in handlers {
            handler(notification);
        }
        true
    }

    /// Whether anything listens to `target_id`.
    pub fn has_subscribers(&self, target_id: &str) -> bool {
        self.state.lock().handlers.contains_key(target_id)
    }
}

/// Handle returned by [`NotificationRouter::subscribe`]; unsubscribes on drop.
pub struct Subscription {
    state: Weak<Mutex<RouterState>>,
    target_id: String,
    key: u64,
}

impl Subscription {
    pub fn target_id(&self) -> &str {
        &self.target_id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut state = state.lock();
        if let Some(handlers) = state.handlers.get_mut(&self.target_id) {
            handlers.retain(|(key, _)| *key != self.key);
            if handlers.is_empty() {
                state.handlers.remove(&self.target_id);
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("target_id", &self.target_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::Value;

    use super::*;

    fn notification(target_id: &str, event: &str) -> Notification {
        Notification {
            target_id: target_id.to_string(),
            event: event.to_string(),
            data: Value::Null,
            payload: None,
        }
    }

    #[test]
    fn dispatch_reaches_only_the_target() {
        let router = NotificationRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&hits);
        let _sub = router.subscribe("p1", move |n| {
            assert_eq!(n.event, "score");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(router.dispatch(&notification("p1", "score")));
        assert!(!router.dispatch(&notification("p2", "score")));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let router = NotificationRouter::new();
        let sub = router.subscribe("t1", |_| {});
        assert!(router.has_subscribers("t1"));

        drop(sub);
        assert!(!router.has_subscribers("t1"));
        assert!(!router.dispatch(&notification("t1", "trace")));
    }

    #[test]
    fn handler_may_unsubscribe_itself() {
        let router = NotificationRouter::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let inner = Arc::clone(&slot);
        let sub = router.subscribe("c1", move |_| {
            inner.lock().take();
        });
        *slot.lock() = Some(sub);

        assert!(router.dispatch(&notification("c1", "producerclose")));
        assert!(!router.has_subscribers("c1"));
    }

    #[test]
    fn subscription_outliving_router_is_harmless() {
        let router = NotificationRouter::new();
        let sub = router.subscribe("x", |_| {});
        drop(router);
        drop(sub);
    }
}
