use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{ChannelError, Result};
use crate::ordering::DispatchGuard;

/// What a pending caller receives: the request outcome plus the guard that
/// holds back notifications received after the response.
pub type Reply = (Result<Value>, DispatchGuard);

/// Generates request ids: 1, 2, ..., `u32::MAX`, then 1 again. Never 0.
#[derive(Debug, Default)]
pub struct RequestIdGenerator {
    last: u32,
}

impl RequestIdGenerator {
    /// Create a generator whose first id is 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a generator that continues after `last`.
    pub fn starting_after(last: u32) -> Self {
        Self { last }
    }

    /// Next request id.
    pub fn next_id(&mut self) -> u32 {
        self.last = if self.last < u32::MAX { self.last + 1 } else { 1 };
        self.last
    }
}

struct PendingRequest {
    method: String,
    tx: oneshot::Sender<Reply>,
}

/// Requests sent to the engine that still await a response.
///
/// Once closed, every entry has been completed with [`ChannelError::Closed`]
/// and no new entry can be added.
#[derive(Default)]
pub struct PendingRequests {
    entries: HashMap<u32, PendingRequest>,
    closed: bool,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request and return the receiving end of its reply.
    pub fn insert(&mut self, id: u32, method: &str) -> Result<oneshot::Receiver<Reply>> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        let (tx, rx) = oneshot::channel();
        let previous = self.entries.insert(
            id,
            PendingRequest {
                method: method.to_string(),
                tx,
            },
        );
        if let Some(previous) = previous {
            tracing::warn!(id, method = %previous.method, "request id reused while still pending");
        }
        Ok(rx)
    }

    /// Complete the request with the given id.
    ///
    /// Returns the method name, or `None` when no request matches. A reply
    /// whose caller went away is dropped silently.
    pub fn resolve(&mut self, id: u32, reply: Reply) -> Option<String> {
        let pending = self.entries.remove(&id)?;
        let _ = pending.tx.send(reply);
        Some(pending.method)
    }

    /// Forget a request without completing it.
    pub fn remove(&mut self, id: u32) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Mark closed and reject every pending request.
    ///
    /// Returns false if already closed.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        for (_, pending) in self.entries.drain() {
            let _ = pending
                .tx
                .send((Err(ChannelError::Closed), DispatchGuard::detached()));
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
