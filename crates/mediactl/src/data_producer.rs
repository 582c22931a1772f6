//! Data channel source inside a transport.

use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use mediactl_ortc::SctpStreamParameters;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::EntityKind;
use crate::context::Context;
use crate::data_structures::AppData;
use crate::error::{Error, Result};
use crate::events::{CloseHandlers, EventHandlers, HandlerId, Lifecycle};
use crate::messages::DataProducerInternal;

/// Whether messages travel over SCTP or are injected directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataProducerType {
    Sctp,
    Direct,
}

/// A data channel message, tagged with how it maps to an SCTP PPID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebRtcMessage {
    String(String),
    Binary(Bytes),
    EmptyString,
    EmptyBinary,
}

impl WebRtcMessage {
    /// Classify a text message; empty strings get their own PPID.
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.is_empty() {
            WebRtcMessage::EmptyString
        } else {
            WebRtcMessage::String(text)
        }
    }

    pub fn binary(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        if data.is_empty() {
            WebRtcMessage::EmptyBinary
        } else {
            WebRtcMessage::Binary(data)
        }
    }

    /// SCTP payload protocol identifier.
    pub fn ppid(&self) -> u32 {
        match self {
            WebRtcMessage::String(_) => 51,
            WebRtcMessage::Binary(_) => 53,
            WebRtcMessage::EmptyString => 56,
            WebRtcMessage::EmptyBinary => 57,
        }
    }

    /// Bytes written on the wire. SCTP cannot carry empty messages, so the
    /// empty variants send a single placeholder byte.
    pub(crate) fn into_payload(self) -> Bytes {
        match self {
            WebRtcMessage::String(text) => Bytes::from(text),
            WebRtcMessage::Binary(data) => data,
            WebRtcMessage::EmptyString => Bytes::from_static(b" "),
            WebRtcMessage::EmptyBinary => Bytes::from_static(&[0]),
        }
    }

    /// Rebuild a message received with `ppid`.
    pub fn from_payload(ppid: u32, payload: Bytes) -> Option<Self> {
        match ppid {
            51 => Some(WebRtcMessage::String(
                String::from_utf8_lossy(&payload).into_owned(),
            )),
            53 => Some(WebRtcMessage::Binary(payload)),
            56 => Some(WebRtcMessage::EmptyString),
            57 => Some(WebRtcMessage::EmptyBinary),
            _ => None,
        }
    }
}

/// Options for [`crate::Transport::produce_data`].
#[derive(Debug, Clone, Default)]
pub struct DataProducerOptions {
    /// Reuse an existing id; only pipe transports do this.
    pub id: Option<String>,
    /// Required on every transport but direct ones.
    pub sctp_stream_parameters: Option<SctpStreamParameters>,
    pub label: String,
    pub protocol: String,
    pub app_data: AppData,
}

impl DataProducerOptions {
    pub fn new_sctp(sctp_stream_parameters: SctpStreamParameters) -> Self {
        Self {
            sctp_stream_parameters: Some(sctp_stream_parameters),
            ..Self::default()
        }
    }

    pub fn new_direct() -> Self {
        Self::default()
    }

    pub fn new_pipe_transport(
        id: impl Into<String>,
        sctp_stream_parameters: SctpStreamParameters,
    ) -> Self {
        Self {
            id: Some(id.into()),
            sctp_stream_parameters: Some(sctp_stream_parameters),
            ..Self::default()
        }
    }
}

/// Engine view of a data producer or data consumer, returned on creation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DataEndpointData {
    pub(crate) r#type: DataProducerType,
    #[serde(default)]
    pub(crate) sctp_stream_parameters: Option<SctpStreamParameters>,
    #[serde(default)]
    pub(crate) label: String,
    #[serde(default)]
    pub(crate) protocol: String,
}

/// Request body shared by `transport.produceData` and `transport.consumeData`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DataEndpointRequest<'a> {
    pub(crate) r#type: DataProducerType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) sctp_stream_parameters: Option<&'a SctpStreamParameters>,
    pub(crate) label: &'a str,
    pub(crate) protocol: &'a str,
}

#[derive(Debug, Clone)]
pub enum DataProducerEvent {
    /// The owning transport closed.
    TransportClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Explicit,
    TransportClosed,
}

struct Inner {
    id: String,
    internal: DataProducerInternal,
    data: DataEndpointData,
    app_data: AppData,
    context: Context,
    handlers: EventHandlers<DataProducerEvent>,
    close_handlers: CloseHandlers,
    lifecycle: Lifecycle,
}

impl Inner {
    fn close(&self, reason: CloseReason) {
        if !self.lifecycle.begin_close() {
            return;
        }
        tracing::debug!(data_producer_id = %self.id, ?reason, "close()");

        if reason == CloseReason::Explicit {
            self.context
                .channel
                .request_detached("dataProducer.close", &self.internal, ());
        }
        self.lifecycle.finish_close();

        if reason == CloseReason::TransportClosed {
            self.handlers.emit(&DataProducerEvent::TransportClose);
        }
        self.context.bus.closed(EntityKind::DataProducer, &self.id);
        self.close_handlers.run();
        self.handlers.clear();
    }
}

/// Data channel source. The engine sends it no notifications.
#[derive(Clone)]
pub struct DataProducer {
    inner: Arc<Inner>,
}

impl DataProducer {
    pub(crate) fn new(
        internal: DataProducerInternal,
        data: DataEndpointData,
        app_data: AppData,
        context: Context,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: internal.data_producer_id.clone(),
                internal,
                data,
                app_data,
                context,
                handlers: EventHandlers::new(),
                close_handlers: CloseHandlers::new(),
                lifecycle: Lifecycle::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn r#type(&self) -> DataProducerType {
        self.inner.data.r#type
    }

    /// `None` on direct transports.
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
            return Err(Error::closed("DataProducer"));
        }
        Ok(())
    }

    pub async fn dump(&self) -> Result<Value> {
        self.check_open()?;
        Ok(self
            .inner
            .context
            .channel
            .request("dataProducer.dump", &self.inner.internal, ())
            .await?)
    }

    pub async fn get_stats(&self) -> Result<Value> {
        self.check_open()?;
        Ok(self
            .inner
            .context
            .channel
            .request("dataProducer.getStats", &self.inner.internal, ())
            .await?)
    }

    /// Inject a message. Only data producers on a direct transport accept it.
    pub fn send(&self, message: WebRtcMessage) -> Result<()> {
        self.check_open()?;
        if self.inner.data.r#type != DataProducerType::Direct {
            return Err(Error::InvalidState(
                "send() is only valid on a DirectTransport".to_string(),
            ));
        }

        #[derive(Serialize)]
        struct Data {
            ppid: u32,
        }
        let ppid = message.ppid();
        self.inner.context.payload_channel.notify(
            "dataProducer.send",
            &self.inner.internal,
            Data { ppid },
            message.into_payload(),
        )?;
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
        F: Fn(&DataProducerEvent) + Send + Sync + 'static,
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

    pub fn downgrade(&self) -> WeakDataProducer {
        WeakDataProducer {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for DataProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataProducer")
            .field("id", &self.inner.id)
            .field("type", &self.inner.data.r#type)
            .field("label", &self.inner.data.label)
            .field("closed", &self.closed())
            .finish()
    }
}

#[derive(Clone)]
pub struct WeakDataProducer {
    inner: Weak<Inner>,
}

impl WeakDataProducer {
    pub fn upgrade(&self) -> Option<DataProducer> {
        self.inner.upgrade().map(|inner| DataProducer { inner })
    }
}

impl fmt::Debug for WeakDataProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakDataProducer").finish()
    }
}
