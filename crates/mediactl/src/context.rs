use std::future::Future;

use mediactl_channel::{Channel, PayloadChannel};

use crate::bus::ObserverBus;

/// Handles every entity under one worker shares.
#[derive(Debug, Clone)]
pub(crate) struct Context {
    pub(crate) channel: Channel,
    pub(crate) payload_channel: PayloadChannel,
    pub(crate) bus: ObserverBus,
}

/// Run `future` on the current runtime, if there is one.
///
/// Event handlers are synchronous; this is how they start requests.
pub(crate) fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
        }
        Err(_) => tracing::warn!("no runtime available, dropping follow-up request"),
    }
}
