use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::channel::{ChannelConfig, Mode, Shared};
use crate::error::Result;
use crate::message::Notification;
use crate::notification::{NotificationRouter, Subscription};

/// Channel carrying binary payloads alongside JSON messages.
///
/// Every JSON notification or request written is immediately followed by one
/// raw payload frame. On the receive side, a notification is held until the
/// next frame arrives and is then delivered with it as
/// [`Notification::payload`].
#[derive(Clone)]
pub struct PayloadChannel {
    shared: Arc<Shared>,
}

impl PayloadChannel {
    /// Start a payload channel with default configuration.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<R, W>(reader: R, writer: W, notifications: NotificationRouter) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_config(reader, writer, notifications, ChannelConfig::default())
    }

    /// Start a payload channel with explicit configuration.
    pub fn with_config<R, W>(
        reader: R,
        writer: W,
        notifications: NotificationRouter,
        config: ChannelConfig,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            shared: Shared::spawn(Mode::Payload, reader, writer, notifications, config),
        }
    }

    /// Write a notification and its payload. Nothing is awaited.
    pub fn notify(
        &self,
        event: &str,
        internal: impl Serialize,
        data: impl Serialize,
        payload: impl Into<Bytes>,
    ) -> Result<()> {
        self.shared.send_notification(
            event,
            serde_json::to_value(internal)?,
            serde_json::to_value(data)?,
            payload.into(),
        )
    }

    /// Send a request followed by its payload and wait for the response.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        internal: impl Serialize,
        data: impl Serialize,
        payload: impl Into<Bytes>,
    ) -> Result<T> {
        let (id, rx) = self.shared.send_request(
            method,
            serde_json::to_value(internal)?,
            serde_json::to_value(data)?,
            Some(payload.into()),
        )?;
        let (data, _guard) = self.shared.await_reply(id, rx).await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Listen to payload notifications for `target_id`.
    pub fn subscribe<F>(&self, target_id: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.shared.notifications().subscribe(target_id, handler)
    }

    /// Close the channel. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn closed(&self) -> bool {
        self.shared.closed()
    }
}

impl std::fmt::Debug for PayloadChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadChannel")
            .field("closed", &self.closed())
            .finish()
    }
}
