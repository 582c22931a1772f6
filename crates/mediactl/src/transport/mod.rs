//! Transports: the owners of producers and consumers.
//!
//! Every variant shares one [`Transport`] core that implements produce,
//! consume and the close cascade. The variant types ([`WebRtcTransport`],
//! [`PlainTransport`], [`PipeTransport`], [`DirectTransport`]) deref to it
//! and add their own connection methods and state.

pub mod direct;
pub mod pipe;
pub mod plain;
mod stream_ids;
pub mod webrtc;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use mediactl_channel::{Notification, Subscription};
use mediactl_ortc::{
    get_consumable_rtp_parameters, get_consumer_rtp_parameters, get_pipe_consumer_rtp_parameters,
    get_producer_rtp_parameters_mapping, validate_rtp_capabilities, validate_rtp_parameters,
    validate_sctp_stream_parameters, MediaKind, RtpCapabilities, RtpEncodingParameters,
    RtpMapping, RtpParameters, SctpParameters,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::EntityKind;
use crate::consumer::{ConsumeResponse, Consumer, ConsumerInit, ConsumerLayers, ConsumerOptions, ConsumerType};
use crate::context::Context;
use crate::data_consumer::{DataConsumer, DataConsumerOptions};
use crate::data_producer::{
    DataEndpointData, DataEndpointRequest, DataProducer, DataProducerOptions, DataProducerType,
};
use crate::data_structures::{
    AppData, DtlsState, IceState, SctpState, TraceEventData, TransportTuple,
};
use crate::error::{Error, Result};
use crate::events::{CloseHandlers, EventHandlers, HandlerId, Lifecycle};
use crate::messages::{
    new_id, ConsumerInternal, DataConsumerInternal, DataProducerInternal, ProducerInternal,
    TransportInternal,
};
use crate::producer::{Producer, ProducerInit, ProducerOptions, ProducerType};
use crate::registry::Registry;

pub use direct::{DirectTransport, DirectTransportOptions};
pub use pipe::{PipeTransport, PipeTransportOptions, PipeTransportRemoteParameters};
pub use plain::{PlainTransport, PlainTransportOptions, PlainTransportRemoteParameters};
use stream_ids::SctpStreamIds;
pub use webrtc::{WebRtcTransport, WebRtcTransportOptions};

/// Consumer MIDs are at most 8 characters long.
const MAX_MID: u32 = 100_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    WebRtc,
    Plain,
    Pipe,
    Direct,
}

impl TransportKind {
    pub(crate) fn entity_kind(self) -> EntityKind {
        match self {
            TransportKind::WebRtc => EntityKind::WebRtcTransport,
            TransportKind::Plain => EntityKind::PlainTransport,
            TransportKind::Pipe => EntityKind::PipeTransport,
            TransportKind::Direct => EntityKind::DirectTransport,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportTraceEventType {
    Probation,
    Bwe,
}

/// Events a [`Transport`] emits. Each variant only emits the ones that
/// apply to it.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    IceStateChange(IceState),
    IceSelectedTupleChange(TransportTuple),
    DtlsStateChange(DtlsState),
    SctpStateChange(SctpState),
    Tuple(TransportTuple),
    RtcpTuple(TransportTuple),
    Trace(TraceEventData),
    /// RTCP packet relayed to a direct transport.
    Rtcp(Bytes),
    /// The owning router closed.
    RouterClose,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IceStateChangeData {
    ice_state: IceState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IceSelectedTupleChangeData {
    ice_selected_tuple: TransportTuple,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DtlsStateChangeData {
    dtls_state: DtlsState,
    #[serde(default)]
    dtls_remote_cert: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SctpStateChangeData {
    sctp_state: SctpState,
}

#[derive(Debug, Deserialize)]
struct TupleData {
    tuple: TransportTuple,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RtcpTupleData {
    rtcp_tuple: TransportTuple,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
enum TransportNotification {
    IceStateChange(IceStateChangeData),
    IceSelectedTupleChange(IceSelectedTupleChangeData),
    DtlsStateChange(DtlsStateChangeData),
    SctpStateChange(SctpStateChangeData),
    Tuple(TupleData),
    RtcpTuple(RtcpTupleData),
    Trace(TraceEventData),
}

/// Variant-specific state reported by the engine.
#[derive(Debug, Clone)]
pub(crate) enum TransportData {
    WebRtc(webrtc::WebRtcTransportData),
    Plain(plain::PlainTransportData),
    Pipe(pipe::PipeTransportData),
    Direct,
}

impl TransportData {
    fn kind(&self) -> TransportKind {
        match self {
            TransportData::WebRtc(_) => TransportKind::WebRtc,
            TransportData::Plain(_) => TransportKind::Plain,
            TransportData::Pipe(_) => TransportKind::Pipe,
            TransportData::Direct => TransportKind::Direct,
        }
    }

    fn sctp_parameters(&self) -> Option<SctpParameters> {
        match self {
            TransportData::WebRtc(data) => data.sctp_parameters,
            TransportData::Plain(data) => data.sctp_parameters,
            TransportData::Pipe(data) => data.sctp_parameters,
            TransportData::Direct => None,
        }
    }

    fn sctp_state_mut(&mut self) -> Option<&mut Option<SctpState>> {
        match self {
            TransportData::WebRtc(data) => Some(&mut data.sctp_state),
            TransportData::Plain(data) => Some(&mut data.sctp_state),
            TransportData::Pipe(data) => Some(&mut data.sctp_state),
            TransportData::Direct => None,
        }
    }

    fn sctp_state(&self) -> Option<SctpState> {
        match self {
            TransportData::WebRtc(data) => data.sctp_state,
            TransportData::Plain(data) => data.sctp_state,
            TransportData::Pipe(data) => data.sctp_state,
            TransportData::Direct => None,
        }
    }

    /// Whether pipe consumers get RTX.
    fn rtx(&self) -> bool {
        matches!(self, TransportData::Pipe(data) if data.rtx)
    }

    /// Mark every connection state closed.
    fn close_states(&mut self) {
        if let TransportData::WebRtc(data) = self {
            data.ice_state = IceState::Closed;
            data.ice_selected_tuple = None;
            data.dtls_state = DtlsState::Closed;
        }
        if let Some(state) = self.sctp_state_mut().and_then(Option::as_mut) {
            *state = SctpState::Closed;
        }
    }
}

#[derive(Debug, Default)]
struct Children {
    producers: HashMap<String, Producer>,
    consumers: HashMap<String, Consumer>,
    data_producers: HashMap<String, DataProducer>,
    data_consumers: HashMap<String, DataConsumer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Explicit,
    RouterClosed,
}

pub(crate) struct TransportInit {
    pub(crate) internal: TransportInternal,
    pub(crate) data: TransportData,
    pub(crate) rtp_capabilities: Arc<RtpCapabilities>,
    pub(crate) registry: Registry,
    pub(crate) context: Context,
    pub(crate) app_data: AppData,
}

struct Inner {
    id: String,
    internal: TransportInternal,
    kind: TransportKind,
    data: Mutex<TransportData>,
    rtp_capabilities: Arc<RtpCapabilities>,
    registry: Registry,
    context: Context,
    app_data: AppData,
    children: Mutex<Children>,
    cname_for_producers: Mutex<Option<String>>,
    next_mid_for_consumers: Mutex<u32>,
    sctp_stream_ids: Mutex<Option<SctpStreamIds>>,
    handlers: EventHandlers<TransportEvent>,
    close_handlers: CloseHandlers,
    lifecycle: Lifecycle,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Inner {
    fn close(&self, reason: CloseReason) {
        if !self.lifecycle.begin_close() {
            return;
        }
        tracing::debug!(transport_id = %self.id, ?reason, "close()");

        self.subscriptions.lock().clear();
        self.data.lock().close_states();
        if reason == CloseReason::Explicit {
            self.context
                .channel
                .request_detached("transport.close", &self.internal, ());
        }

        // The engine closes the children on its side; mirror it locally
        // without further requests.
        let children = std::mem::take(&mut *self.children.lock());
        for producer in children.producers.into_values() {
            producer.transport_closed();
        }
        for consumer in children.consumers.into_values() {
            consumer.transport_closed();
        }
        for data_producer in children.data_producers.into_values() {
            data_producer.transport_closed();
        }
        for data_consumer in children.data_consumers.into_values() {
            data_consumer.transport_closed();
        }
        self.lifecycle.finish_close();

        if reason == CloseReason::RouterClosed {
            self.handlers.emit(&TransportEvent::RouterClose);
        }
        self.context.bus.closed(self.kind.entity_kind(), &self.id);
        self.close_handlers.run();
        self.handlers.clear();
    }

    fn handle_notification(&self, notification: &Notification) {
        let event = match notification.parse_event::<TransportNotification>() {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(
                    transport_id = %self.id,
                    event = %notification.event,
                    error = %err,
                    "ignoring unknown event"
                );
                return;
            }
        };

        let event = {
            let mut data = self.data.lock();
            match (event, &mut *data) {
                (
                    TransportNotification::IceStateChange(IceStateChangeData { ice_state }),
                    TransportData::WebRtc(data),
                ) => {
                    data.ice_state = ice_state;
                    TransportEvent::IceStateChange(ice_state)
                }
                (
                    TransportNotification::IceSelectedTupleChange(IceSelectedTupleChangeData {
                        ice_selected_tuple,
                    }),
                    TransportData::WebRtc(data),
                ) => {
                    data.ice_selected_tuple = Some(ice_selected_tuple.clone());
                    TransportEvent::IceSelectedTupleChange(ice_selected_tuple)
                }
                (
                    TransportNotification::DtlsStateChange(DtlsStateChangeData {
                        dtls_state,
                        dtls_remote_cert,
                    }),
                    TransportData::WebRtc(data),
                ) => {
                    data.dtls_state = dtls_state;
                    if dtls_state == DtlsState::Connected {
                        data.dtls_remote_cert = dtls_remote_cert;
                    }
                    TransportEvent::DtlsStateChange(dtls_state)
                }
                (TransportNotification::Tuple(TupleData { tuple }), TransportData::Plain(data)) => {
                    data.tuple = tuple.clone();
                    TransportEvent::Tuple(tuple)
                }
                (TransportNotification::Tuple(TupleData { tuple }), TransportData::Pipe(data)) => {
                    data.tuple = tuple.clone();
                    TransportEvent::Tuple(tuple)
                }
                (
                    TransportNotification::RtcpTuple(RtcpTupleData { rtcp_tuple }),
                    TransportData::Plain(data),
                ) => {
                    data.rtcp_tuple = Some(rtcp_tuple.clone());
                    TransportEvent::RtcpTuple(rtcp_tuple)
                }
                (
                    TransportNotification::SctpStateChange(SctpStateChangeData { sctp_state }),
                    data,
                ) => {
                    if let Some(state) = data.sctp_state_mut() {
                        *state = Some(sctp_state);
                    }
                    TransportEvent::SctpStateChange(sctp_state)
                }
                (TransportNotification::Trace(trace), _) => TransportEvent::Trace(trace),
                (other, data) => {
                    tracing::warn!(
                        transport_id = %self.id,
                        kind = ?data.kind(),
                        event = ?other,
                        "event does not apply to this transport"
                    );
                    return;
                }
            }
        };
        self.handlers.emit(&event);
    }

    fn handle_payload_notification(&self, notification: &Notification) {
        if self.lifecycle.closing() {
            return;
        }
        match notification.event.as_str() {
            "rtcp" => {
                let packet = notification.payload.clone().unwrap_or_default();
                self.handlers.emit(&TransportEvent::Rtcp(packet));
            }
            other => {
                tracing::error!(transport_id = %self.id, event = other, "ignoring unknown payload event");
            }
        }
    }
}

/// Transport core shared by every variant.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    pub(crate) fn new(init: TransportInit) -> Self {
        let TransportInit {
            internal,
            data,
            rtp_capabilities,
            registry,
            context,
            app_data,
        } = init;
        let id = internal.transport_id.clone();
        let kind = data.kind();

        let inner = Arc::new(Inner {
            id: id.clone(),
            internal,
            kind,
            data: Mutex::new(data),
            rtp_capabilities,
            registry,
            context,
            app_data,
            children: Mutex::new(Children::default()),
            cname_for_producers: Mutex::new(None),
            next_mid_for_consumers: Mutex::new(0),
            sctp_stream_ids: Mutex::new(None),
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
        inner.subscriptions.lock().push(control);

        if kind == TransportKind::Direct {
            let weak: Weak<Inner> = Arc::downgrade(&inner);
            let payload = inner
                .context
                .payload_channel
                .subscribe(id, move |notification| {
                    if let Some(inner) = weak.upgrade() {
                        inner.handle_payload_notification(notification);
                    }
                });
            inner.subscriptions.lock().push(payload);
        }

        Self { inner }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn router_id(&self) -> &str {
        &self.inner.internal.router_id
    }

    pub fn kind(&self) -> TransportKind {
        self.inner.kind
    }

    pub fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    pub fn closed(&self) -> bool {
        self.inner.lifecycle.closed()
    }

    /// `None` unless SCTP is enabled.
    pub fn sctp_parameters(&self) -> Option<SctpParameters> {
        self.inner.data.lock().sctp_parameters()
    }

    pub fn sctp_state(&self) -> Option<SctpState> {
        self.inner.data.lock().sctp_state()
    }

    pub fn producers(&self) -> Vec<Producer> {
        self.inner.children.lock().producers.values().cloned().collect()
    }

    pub fn consumers(&self) -> Vec<Consumer> {
        self.inner.children.lock().consumers.values().cloned().collect()
    }

    pub fn data_producers(&self) -> Vec<DataProducer> {
        self.inner
            .children
            .lock()
            .data_producers
            .values()
            .cloned()
            .collect()
    }

    pub fn data_consumers(&self) -> Vec<DataConsumer> {
        self.inner
            .children
            .lock()
            .data_consumers
            .values()
            .cloned()
            .collect()
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.inner.lifecycle.closing() {
            return Err(Error::closed("Transport"));
        }
        Ok(())
    }

    pub(crate) fn with_data<R>(&self, f: impl FnOnce(&mut TransportData) -> R) -> R {
        f(&mut self.inner.data.lock())
    }

    /// Transport-level request addressed with this transport's `internal`.
    pub(crate) async fn request<T: DeserializeOwned>(
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

    pub(crate) fn payload_notify(&self, event: &str, payload: Bytes) -> Result<()> {
        self.check_open()?;
        self.inner
            .context
            .payload_channel
            .notify(event, &self.inner.internal, (), payload)?;
        Ok(())
    }

    pub async fn dump(&self) -> Result<Value> {
        self.request("transport.dump", ()).await
    }

    pub async fn get_stats(&self) -> Result<Value> {
        self.request("transport.getStats", ()).await
    }

    pub async fn set_max_incoming_bitrate(&self, bitrate: u32) -> Result<()> {
        self.set_bitrate("transport.setMaxIncomingBitrate", bitrate)
            .await
    }

    pub async fn set_max_outgoing_bitrate(&self, bitrate: u32) -> Result<()> {
        self.set_bitrate("transport.setMaxOutgoingBitrate", bitrate)
            .await
    }

    async fn set_bitrate(&self, method: &str, bitrate: u32) -> Result<()> {
        tracing::debug!(transport_id = %self.id(), method, bitrate, "set bitrate");
        if self.inner.kind == TransportKind::Direct {
            return Err(Error::Unsupported(format!(
                "{method} not implemented in DirectTransport"
            )));
        }
        #[derive(Serialize)]
        struct Data {
            bitrate: u32,
        }
        self.request::<()>(method, Data { bitrate }).await
    }

    pub async fn enable_trace_event(&self, types: Vec<TransportTraceEventType>) -> Result<()> {
        #[derive(Serialize)]
        struct Data {
            types: Vec<TransportTraceEventType>,
        }
        self.request::<()>("transport.enableTraceEvent", Data { types })
            .await
    }

    /// Create a producer from the sender's RTP parameters.
    pub async fn produce(&self, options: ProducerOptions) -> Result<Producer> {
        tracing::debug!(transport_id = %self.id(), "produce()");
        self.check_open()?;

        let ProducerOptions {
            id,
            kind,
            mut rtp_parameters,
            paused,
            key_frame_request_delay,
            app_data,
        } = options;

        if let Some(id) = &id {
            if self.inner.children.lock().producers.contains_key(id) {
                return Err(Error::Validation(format!(
                    "a Producer with same id \"{id}\" already exists"
                )));
            }
        }

        validate_rtp_parameters(&mut rtp_parameters)?;
        if rtp_parameters.encodings.is_empty() {
            rtp_parameters.encodings.push(RtpEncodingParameters::default());
        }

        // Pipe transports keep each producer's own CNAME.
        if self.inner.kind != TransportKind::Pipe {
            let cname = self
                .inner
                .cname_for_producers
                .lock()
                .get_or_insert_with(|| {
                    rtp_parameters
                        .rtcp
                        .cname
                        .clone()
                        .unwrap_or_else(|| new_id()[..8].to_string())
                })
                .clone();
            rtp_parameters.rtcp.cname = Some(cname);
        }

        let rtp_capabilities = &self.inner.rtp_capabilities;
        let rtp_mapping = get_producer_rtp_parameters_mapping(&mut rtp_parameters, rtp_capabilities)?;
        let consumable_rtp_parameters =
            get_consumable_rtp_parameters(kind, &rtp_parameters, rtp_capabilities, &rtp_mapping)?;

        let internal = ProducerInternal {
            router_id: self.inner.internal.router_id.clone(),
            transport_id: self.inner.id.clone(),
            producer_id: id.unwrap_or_else(new_id),
        };

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Data<'a> {
            kind: MediaKind,
            rtp_parameters: &'a RtpParameters,
            rtp_mapping: &'a RtpMapping,
            key_frame_request_delay: u32,
            paused: bool,
        }
        #[derive(Deserialize)]
        struct Response {
            r#type: ProducerType,
        }

        let (response, guard) = self
            .inner
            .context
            .channel
            .request_guarded::<Response>(
                "transport.produce",
                &internal,
                Data {
                    kind,
                    rtp_parameters: &rtp_parameters,
                    rtp_mapping: &rtp_mapping,
                    key_frame_request_delay,
                    paused,
                },
            )
            .await?;

        let producer = Producer::new(ProducerInit {
            internal,
            kind,
            r#type: response.r#type,
            rtp_parameters,
            consumable_rtp_parameters,
            paused,
            direct: self.inner.kind == TransportKind::Direct,
            app_data,
            context: self.inner.context.clone(),
        });
        self.adopt_producer(&producer)?;
        drop(guard);

        Ok(producer)
    }

    fn adopt_producer(&self, producer: &Producer) -> Result<()> {
        let adopted = {
            let mut children = self.inner.children.lock();
            let open = !self.inner.lifecycle.closing();
            if open {
                children
                    .producers
                    .insert(producer.id().to_string(), producer.clone());
            }
            open
        };
        if !adopted {
            producer.transport_closed();
            return Err(Error::closed("Transport"));
        }

        self.inner.registry.insert_producer(producer);
        let weak = Arc::downgrade(&self.inner);
        let id = producer.id().to_string();
        producer.on_close(move || {
            if let Some(inner) = weak.upgrade() {
                inner.children.lock().producers.remove(&id);
                inner.registry.remove_producer(&id);
            }
        });
        self.inner.context.bus.created(
            EntityKind::Producer,
            producer.id(),
            Some(self.id()),
        );
        Ok(())
    }

    /// Create a consumer of a producer of the same router.
    pub async fn consume(&self, options: ConsumerOptions) -> Result<Consumer> {
        tracing::debug!(transport_id = %self.id(), "consume()");
        self.check_open()?;

        let ConsumerOptions {
            producer_id,
            rtp_capabilities,
            paused,
            preferred_layers,
            pipe,
            app_data,
        } = options;

        let producer = self.inner.registry.producer(&producer_id).ok_or_else(|| {
            Error::Validation(format!("Producer with id \"{producer_id}\" not found"))
        })?;

        let (rtp_parameters, r#type) = if self.inner.kind == TransportKind::Pipe {
            let rtx = self.inner.data.lock().rtx();
            (
                get_pipe_consumer_rtp_parameters(producer.consumable_rtp_parameters(), rtx),
                ConsumerType::Pipe,
            )
        } else {
            let mut rtp_capabilities = rtp_capabilities
                .ok_or_else(|| Error::Validation("missing rtpCapabilities".to_string()))?;
            validate_rtp_capabilities(&mut rtp_capabilities)?;
            let mut rtp_parameters = get_consumer_rtp_parameters(
                producer.consumable_rtp_parameters(),
                &rtp_capabilities,
                pipe,
            )?;
            if pipe {
                (rtp_parameters, ConsumerType::Pipe)
            } else {
                rtp_parameters.mid = Some(self.next_mid());
                (rtp_parameters, ConsumerType::from(producer.r#type()))
            }
        };

        let internal = ConsumerInternal {
            router_id: self.inner.internal.router_id.clone(),
            transport_id: self.inner.id.clone(),
            consumer_id: new_id(),
            producer_id: producer.id().to_string(),
        };

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Data<'a> {
            kind: MediaKind,
            rtp_parameters: &'a RtpParameters,
            r#type: ConsumerType,
            consumable_rtp_encodings: &'a [RtpEncodingParameters],
            paused: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            preferred_layers: Option<ConsumerLayers>,
        }

        let (response, guard) = self
            .inner
            .context
            .channel
            .request_guarded::<ConsumeResponse>(
                "transport.consume",
                &internal,
                Data {
                    kind: producer.kind(),
                    rtp_parameters: &rtp_parameters,
                    r#type,
                    consumable_rtp_encodings: &producer.consumable_rtp_parameters().encodings,
                    paused,
                    preferred_layers,
                },
            )
            .await?;

        let consumer = Consumer::new(ConsumerInit {
            internal,
            kind: producer.kind(),
            r#type,
            rtp_parameters,
            response,
            app_data,
            context: self.inner.context.clone(),
        });
        self.adopt_consumer(&consumer)?;
        drop(guard);

        Ok(consumer)
    }

    fn next_mid(&self) -> String {
        let mut next = self.inner.next_mid_for_consumers.lock();
        let mid = *next;
        *next += 1;
        if *next == MAX_MID {
            tracing::error!(transport_id = %self.id(), "reached max MID value, wrapping to 0");
            *next = 0;
        }
        mid.to_string()
    }

    fn adopt_consumer(&self, consumer: &Consumer) -> Result<()> {
        let adopted = {
            let mut children = self.inner.children.lock();
            let open = !self.inner.lifecycle.closing();
            if open {
                children
                    .consumers
                    .insert(consumer.id().to_string(), consumer.clone());
            }
            open
        };
        if !adopted {
            consumer.transport_closed();
            return Err(Error::closed("Transport"));
        }

        let weak = Arc::downgrade(&self.inner);
        let id = consumer.id().to_string();
        consumer.on_close(move || {
            if let Some(inner) = weak.upgrade() {
                inner.children.lock().consumers.remove(&id);
            }
        });
        self.inner.context.bus.created(
            EntityKind::Consumer,
            consumer.id(),
            Some(self.id()),
        );
        Ok(())
    }

    /// Create a data producer. SCTP stream parameters are required except
    /// on direct transports, where they are ignored.
    pub async fn produce_data(&self, options: DataProducerOptions) -> Result<DataProducer> {
        tracing::debug!(transport_id = %self.id(), "produce_data()");
        self.check_open()?;

        let DataProducerOptions {
            id,
            sctp_stream_parameters,
            label,
            protocol,
            app_data,
        } = options;

        if let Some(id) = &id {
            if self.inner.children.lock().data_producers.contains_key(id) {
                return Err(Error::Validation(format!(
                    "a DataProducer with same id \"{id}\" already exists"
                )));
            }
        }

        let (r#type, sctp_stream_parameters) = if self.inner.kind == TransportKind::Direct {
            if sctp_stream_parameters.is_some() {
                tracing::warn!(
                    "produce_data() | sctpStreamParameters are ignored when producing data on a DirectTransport"
                );
            }
            (DataProducerType::Direct, None)
        } else {
            let mut params = sctp_stream_parameters
                .ok_or_else(|| Error::Validation("missing sctpStreamParameters".to_string()))?;
            validate_sctp_stream_parameters(&mut params)?;
            (DataProducerType::Sctp, Some(params))
        };

        let internal = DataProducerInternal {
            router_id: self.inner.internal.router_id.clone(),
            transport_id: self.inner.id.clone(),
            data_producer_id: id.unwrap_or_else(new_id),
        };

        let (data, guard) = self
            .inner
            .context
            .channel
            .request_guarded::<DataEndpointData>(
                "transport.produceData",
                &internal,
                DataEndpointRequest {
                    r#type,
                    sctp_stream_parameters: sctp_stream_parameters.as_ref(),
                    label: &label,
                    protocol: &protocol,
                },
            )
            .await?;

        let data_producer =
            DataProducer::new(internal, data, app_data, self.inner.context.clone());
        self.adopt_data_producer(&data_producer)?;
        drop(guard);

        Ok(data_producer)
    }

    fn adopt_data_producer(&self, data_producer: &DataProducer) -> Result<()> {
        let adopted = {
            let mut children = self.inner.children.lock();
            let open = !self.inner.lifecycle.closing();
            if open {
                children
                    .data_producers
                    .insert(data_producer.id().to_string(), data_producer.clone());
            }
            open
        };
        if !adopted {
            data_producer.transport_closed();
            return Err(Error::closed("Transport"));
        }

        self.inner.registry.insert_data_producer(data_producer);
        let weak = Arc::downgrade(&self.inner);
        let id = data_producer.id().to_string();
        data_producer.on_close(move || {
            if let Some(inner) = weak.upgrade() {
                inner.children.lock().data_producers.remove(&id);
                inner.registry.remove_data_producer(&id);
            }
        });
        self.inner.context.bus.created(
            EntityKind::DataProducer,
            data_producer.id(),
            Some(self.id()),
        );
        Ok(())
    }

    /// Create a data consumer of a data producer of the same router.
    pub async fn consume_data(&self, options: DataConsumerOptions) -> Result<DataConsumer> {
        tracing::debug!(transport_id = %self.id(), "consume_data()");
        self.check_open()?;

        let DataConsumerOptions {
            data_producer_id,
            ordered,
            max_packet_life_time,
            max_retransmits,
            app_data,
        } = options;

        let data_producer = self
            .inner
            .registry
            .data_producer(&data_producer_id)
            .ok_or_else(|| {
                Error::Validation(format!(
                    "DataProducer with id \"{data_producer_id}\" not found"
                ))
            })?;

        let (r#type, sctp_stream_parameters) = if self.inner.kind == TransportKind::Direct {
            if ordered.is_some() || max_packet_life_time.is_some() || max_retransmits.is_some() {
                tracing::warn!(
                    "consume_data() | ordered, maxPacketLifeTime and maxRetransmits are ignored when consuming data on a DirectTransport"
                );
            }
            (DataProducerType::Direct, None)
        } else {
            let mut params = data_producer.sctp_stream_parameters().unwrap_or_default();
            if ordered.is_some() {
                params.ordered = ordered;
            }
            if max_packet_life_time.is_some() {
                params.max_packet_life_time = max_packet_life_time;
            }
            if max_retransmits.is_some() {
                params.max_retransmits = max_retransmits;
            }
            params.stream_id = self.allocate_sctp_stream_id()?;
            (DataProducerType::Sctp, Some(params))
        };
        let stream_id = sctp_stream_parameters.map(|params| params.stream_id);

        let internal = DataConsumerInternal {
            router_id: self.inner.internal.router_id.clone(),
            transport_id: self.inner.id.clone(),
            data_consumer_id: new_id(),
            data_producer_id: data_producer.id().to_string(),
        };

        let requested = self
            .inner
            .context
            .channel
            .request_guarded::<DataEndpointData>(
                "transport.consumeData",
                &internal,
                DataEndpointRequest {
                    r#type,
                    sctp_stream_parameters: sctp_stream_parameters.as_ref(),
                    label: data_producer.label(),
                    protocol: data_producer.protocol(),
                },
            )
            .await;
        let (data, guard) = match requested {
            Ok(response) => response,
            Err(err) => {
                if let Some(stream_id) = stream_id {
                    self.release_sctp_stream_id(stream_id);
                }
                return Err(err.into());
            }
        };

        let data_consumer =
            DataConsumer::new(internal, data, app_data, self.inner.context.clone());
        self.adopt_data_consumer(&data_consumer, stream_id)?;
        drop(guard);

        Ok(data_consumer)
    }

    fn allocate_sctp_stream_id(&self) -> Result<u16> {
        let num_streams = self
            .sctp_parameters()
            .map(|params| params.mis)
            .ok_or_else(|| Error::Validation("missing data.sctpParameters.MIS".to_string()))?;
        self.inner
            .sctp_stream_ids
            .lock()
            .get_or_insert_with(|| SctpStreamIds::new(num_streams))
            .allocate()
            .ok_or_else(|| Error::InvalidState("no sctpStreamId available".to_string()))
    }

    fn release_sctp_stream_id(&self, stream_id: u16) {
        if let Some(ids) = self.inner.sctp_stream_ids.lock().as_mut() {
            ids.release(stream_id);
        }
    }

    fn adopt_data_consumer(
        &self,
        data_consumer: &DataConsumer,
        stream_id: Option<u16>,
    ) -> Result<()> {
        let adopted = {
            let mut children = self.inner.children.lock();
            let open = !self.inner.lifecycle.closing();
            if open {
                children
                    .data_consumers
                    .insert(data_consumer.id().to_string(), data_consumer.clone());
            }
            open
        };
        if !adopted {
            data_consumer.transport_closed();
            return Err(Error::closed("Transport"));
        }

        let weak = Arc::downgrade(&self.inner);
        let id = data_consumer.id().to_string();
        data_consumer.on_close(move || {
            if let Some(inner) = weak.upgrade() {
                inner.children.lock().data_consumers.remove(&id);
                if let (Some(stream_id), Some(ids)) =
                    (stream_id, inner.sctp_stream_ids.lock().as_mut())
                {
                    ids.release(stream_id);
                }
            }
        });
        self.inner.context.bus.created(
            EntityKind::DataConsumer,
            data_consumer.id(),
            Some(self.id()),
        );
        Ok(())
    }

    /// Close the transport and everything it owns.
    pub fn close(&self) {
        self.inner.close(CloseReason::Explicit);
    }

    pub(crate) fn router_closed(&self) {
        self.inner.close(CloseReason::RouterClosed);
    }

    pub fn on<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
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

    pub fn downgrade(&self) -> WeakTransport {
        WeakTransport {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("closed", &self.closed())
            .finish()
    }
}

#[derive(Clone)]
pub struct WeakTransport {
    inner: Weak<Inner>,
}

impl WeakTransport {
    pub fn upgrade(&self) -> Option<Transport> {
        self.inner.upgrade().map(|inner| Transport { inner })
    }
}

impl fmt::Debug for WeakTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakTransport").finish()
    }
}
