//! Data channel sink forwarding one data producer's messages.

use std::fmt;
use std::sync::{Arc, Weak};

use mediactl_channel::{Notification, Subscription};
use mediactl_ortc::SctpStreamParameters;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::EntityKind;
use crate::context::Context;
use crate::data_producer::{DataEndpointData, DataProducerType, WebRtcMessage};
use crate::data_structures::AppData;
use crate::error::{Error, Result};
use crate::events::{CloseHandlers, EventHandlers, HandlerId, Lifecycle};
use crate::messages::DataConsumerInternal;

pub type DataConsumerType = DataProducerType;

/// Options for [`crate::Transport::consume_data`]. Unset reliability fields
/// are inherited from the data producer.
#[derive(Debug, Clone, Default)]
pub struct DataConsumerOptions {
    pub data_producer_id: String,
    pub ordered: Option<bool>,
    pub max_packet_life_time: Option<u16>,
    pub max_retransmits: Option<u16>,
    pub app_data: AppData,
}

impl DataConsumerOptions {
    pub fn new(data_producer_id: impl Into<String>) -> Self {
        Self {
            data_producer_id: data_producer_id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub enum DataConsumerEvent {
    /// The source data producer closed; the data consumer is now closed too.
    DataProducerClose,
    SctpSendBufferFull,
    BufferedAmountLow(u32),
    /// Message relayed to a direct transport.
    Message(WebRtcMessage),
    /// The owning transport closed.
    TransportClose,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BufferedAmount {
    buffered_amount: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
enum DataConsumerNotification {
    DataProducerClose,
    SctpSendBufferFull,
    BufferedAmountLow(BufferedAmount),
}

#[derive(Debug, Deserialize)]
struct MessageData {
    ppid: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Explicit,
    TransportClosed,
    DataProducerClosed,
}

struct Inner {
    id: String,
    data_producer_id: String,
    internal: DataConsumerInternal,
    data: DataEndpointData,
    app_data: AppData,
    context: Context,
    handlers: EventHandlers<DataConsumerEvent>,
    close_handlers: CloseHandlers,
    lifecycle: Lifecycle,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Inner {
    fn close(&self, reason: CloseReason) {
        if !self.lifecycle.begin_close() {
            return;
        }
        tracing::debug!(data_consumer_id = %self.id, ?reason, "close()");

        self.subscriptions.lock().clear();
        if reason == CloseReason::Explicit {
            self.context
                .channel
                .request_detached("dataConsumer.close", &self.internal, ());
        }
        self.lifecycle.finish_close();

        match reason {
            CloseReason::Explicit => {}
            CloseReason::TransportClosed => {
                self.handlers.emit(&DataConsumerEvent::TransportClose);
            }
            CloseReason::DataProducerClosed => {
                self.handlers.emit(&DataConsumerEvent::DataProducerClose);
            }
        }
        self.context.bus.closed(EntityKind::DataConsumer, &self.id);
        self.close_handlers.run();
        self.handlers.clear();
    }

    fn handle_notification(&self, notification: &Notification) {
        match notification.parse_event::<DataConsumerNotification>() {
            Ok(DataConsumerNotification::DataProducerClose) => {
                self.close(CloseReason::DataProducerClosed);
            }
            Ok(DataConsumerNotification::SctpSendBufferFull) => {
                self.handlers.emit(&DataConsumerEvent::SctpSendBufferFull);
            }
            Ok(DataConsumerNotification::BufferedAmountLow(BufferedAmount {
                buffered_amount,
            })) => {
                self.handlers
                    .emit(&DataConsumerEvent::BufferedAmountLow(buffered_amount));
            }
            Err(err) => {
                tracing::error!(
                    data_consumer_id = %self.id,
                    event = %notification.event,
                    error = %err,
                    "ignoring unknown event"
                );
            }
        }
    }

    fn handle_payload_notification(&self, notification: &Notification) {
        if self.lifecycle.closing() {
            return;
        }
        if notification.event != "message" {
            tracing::error!(
                data_consumer_id = %self.id,
                event = %notification.event,
                "ignoring unknown payload event"
            );
            return;
        }
        let ppid = match serde_json::from_value::<MessageData>(notification.data.clone()) {
            Ok(MessageData { ppid }) => ppid,
            Err(err) => {
                tracing::warn!(data_consumer_id = %self.id, error = %err, "message without ppid");
                return;
            }
        };
        let payload = notification.payload.clone().unwrap_or_default();
        match WebRtcMessage::from_payload(ppid, payload) {
            Some(message) => self.handlers.emit(&DataConsumerEvent::Message(message)),
            None => tracing::warn!(data_consumer_id = %self.id, ppid, "unsupported ppid"),
        }
    }
}

/// Sends one data producer's messages to the remote endpoint of a transport.
#[derive(Clone)]
pub struct DataConsumer {
    inner: Arc<Inner>,
}

impl DataConsumer {
    pub(crate) fn new(
        internal: DataConsumerInternal,
        data: DataEndpointData,
        app_data: AppData,
        context: Context,
    ) -> Self {
        let id = internal.data_consumer_id.clone();
        let inner = Arc::new(Inner {
            id: id.clone(),
            data_producer_id: internal.data_producer_id.clone(),
            internal,
            data,
            app_data,
            context,
            handlers: EventHandlers::new(),
            close_handlers: CloseHandlers::new(),
            lifecycle: Lifecycle::new(),
            subscriptions: Mutex::new(Vec::with_capacity(2)),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let control = inner
            .context
            .channel
            .subscribe(id.clone(), move |notification| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_notification(notification);
                }
            });
        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let payload = inner
            .context
            .payload_channel
            .subscribe(id, move |notification| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_payload_notification(notification);
                }
            });
        inner.subscriptions.lock().extend([control, payload]);

        Self { inner }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn data_producer_id(&self) -> &str {
        &self.inner.data_producer_id
    }

    pub fn r#type(&self) -> DataConsumerType {
        self.inner.data.r#type
    }

    pub fn sctp_stream_parameters(&self) -> Option<SctpStreamParameters> {
        self.inner.data.sctp_stream_parameters
    }

    pub fn label(&self) -> &str {
        &self.inner.data.label
    }

    pub fn protocol(&self) -> &str {
        &self.inner.data.protocol
    }

    pub fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    pub fn closed(&self) -> bool {
        self.inner.lifecycle.closed()
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.lifecycle.closing() {
            return Err(Error::closed("DataConsumer"));
        }
        Ok(())
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        data: impl Serialize,
    ) -> Result<T> {
        self.check_open()?;
        Ok(self
            .inner
            .context
            .channel
            .request(method, &self.inner.internal, data)
            .await?)
    }

    pub async fn dump(&self) -> Result<Value> {
        self.request("dataConsumer.dump", ()).await
    }

    pub async fn get_stats(&self) -> Result<Value> {
        self.request("dataConsumer.getStats", ()).await
    }

    /// Bytes queued in the SCTP send buffer.
    pub async fn get_buffered_amount(&self) -> Result<u32> {
        let BufferedAmount { buffered_amount } =
            self.request("dataConsumer.getBufferedAmount", ()).await?;
        Ok(buffered_amount)
    }

    /// Emit [`DataConsumerEvent::BufferedAmountLow`] once the buffer drains
    /// below `threshold` bytes.
    pub async fn set_buffered_amount_low_threshold(&self, threshold: u32) -> Result<()> {
        #[derive(Serialize)]
        struct Data {
            threshold: u32,
        }
        self.request::<()>(
            "dataConsumer.setBufferedAmountLowThreshold",
            Data { threshold },
        )
        .await
    }

    /// Send a message to the remote endpoint.
    pub async fn send(&self, message: WebRtcMessage) -> Result<()> {
        self.check_open()?;

        #[derive(Serialize)]
        struct Data {
            ppid: u32,
        }
        let ppid = message.ppid();
        self.inner
            .context
            .payload_channel
            .request::<()>(
                "dataConsumer.send",
                &self.inner.internal,
                Data { ppid },
                message.into_payload(),
            )
            .await?;
        Ok(())
    }

    pub fn close(&self) {
        self.inner.close(CloseReason::Explicit);
    }

    pub(crate) fn transport_closed(&self) {
        self.inner.close(CloseReason::TransportClosed);
    }

    pub fn on<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&DataConsumerEvent) + Send + Sync + 'static,
    {
        self.inner.handlers.add(handler)
    }

    pub fn off(&self, id: HandlerId) {
        self.inner.handlers.remove(id);
    }

    pub fn on_close<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.close_handlers.add(callback);
    }

    pub fn downgrade(&self) -> WeakDataConsumer {
        WeakDataConsumer {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for DataConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataConsumer")
            .field("id", &self.inner.id)
            .field("data_producer_id", &self.inner.data_producer_id)
            .field("type", &self.inner.data.r#type)
            .field("closed", &self.closed())
            .finish()
    }
}

#[derive(Clone)]
pub struct WeakDataConsumer {
    inner: Weak<Inner>,
}

impl WeakDataConsumer {
    pub fn upgrade(&self) -> Option<DataConsumer> {
        self.inner.upgrade().map(|inner| DataConsumer { inner })
    }
}

impl fmt::Debug for WeakDataConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakDataConsumer").finish()
    }
}
