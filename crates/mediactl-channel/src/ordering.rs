//! Ordering between responses and the notifications that follow them.
//!
//! Every frame read from the engine gets a sequence number. A response keeps
//! its number "held" until the caller drops the [`DispatchGuard`] that came
//! with it. A notification is only dispatched once no response with a lower
//! sequence number is still held, so a caller always observes the response to
//! its request before any notification received after that response.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Default)]
struct GateInner {
    held: Mutex<BTreeSet<u64>>,
    released: Notify,
}

/// Tracks held responses and lets the dispatcher wait for its turn.
#[derive(Clone, Default)]
pub struct DispatchGate {
    inner: Arc<GateInner>,
}

impl DispatchGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold back notifications received after the frame `seq`.
    pub fn hold(&self, seq: u64) -> DispatchGuard {
        self.inner.held.lock().insert(seq);
        DispatchGuard {
            gate: Some(self.clone()),
            seq,
        }
    }

    /// Whether a notification with sequence `seq` must still wait.
    pub fn is_blocked(&self, seq: u64) -> bool {
        self.inner
            .held
            .lock()
            .first()
            .is_some_and(|first| *first < seq)
    }

    /// Wait until a notification with sequence `seq` may be dispatched.
    pub async fn wait_turn(&self, seq: u64) {
        loop {
            let released = self.inner.released.notified();
            if !self.is_blocked(seq) {
                return;
            }
            released.await;
        }
    }

    /// Number of responses currently held.
    pub fn held(&self) -> usize {
        self.inner.held.lock().len()
    }

    fn release(&self, seq: u64) {
        self.inner.held.lock().remove(&seq);
        self.inner.released.notify_waiters();
    }
}

/// Keeps notifications that arrived after a response from being dispatched
/// until dropped.
///
/// Entity-creating calls hold it until the new entity has subscribed to its
/// notifications.
#[must_use = "dropping the guard releases queued notifications"]
pub struct DispatchGuard {
    gate: Option<DispatchGate>,
    seq: u64,
}

impl DispatchGuard {
    /// A guard that holds nothing.
    pub fn detached() -> Self {
        Self { gate: None, seq: 0 }
    }

    /// Release held notifications now.
    pub fn release(self) {}
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        if let Some(gate) = self.gate.take() {
            gate.release(self.seq);
        }
    }
}

impl std::fmt::Debug for DispatchGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchGuard")
            .field("seq", &self.seq)
            .field("attached", &self.gate.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn only_earlier_responses_block() {
        let gate = DispatchGate::new();
        let guard = gate.hold(5);

        assert!(!gate.is_blocked(3));
        assert!(!gate.is_blocked(5));
        assert!(gate.is_blocked(6));

        drop(guard);
        assert!(!gate.is_blocked(6));
        assert_eq!(gate.held(), 0);
    }

    #[test]
    fn detached_guard_holds_nothing() {
        let gate = DispatchGate::new();
        drop(DispatchGuard::detached());
        assert_eq!(gate.held(), 0);
    }

    #[tokio::test]
    async fn wait_turn_resumes_after_release() {
        let gate = DispatchGate::new();
        let guard = gate.hold(1);

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait_turn(2).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        guard.release();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("dispatcher resumes")
            .unwrap();
    }
}
