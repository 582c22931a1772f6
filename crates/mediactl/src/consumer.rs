//! RTP sink forwarding one producer's stream to a transport.

use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use mediactl_channel::{Notification, Subscription};
use mediactl_ortc::{MediaKind, RtpCapabilities, RtpParameters};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::EntityKind;
use crate::context::Context;
use crate::data_structures::{AppData, TraceEventData};
use crate::error::{Error, Result};
use crate::events::{CloseHandlers, EventHandlers, HandlerId, Lifecycle};
use crate::messages::ConsumerInternal;
use crate::producer::{ProducerTraceEventType, ProducerType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerType {
    Simple,
    Simulcast,
    Svc,
    Pipe,
}

impl From<ProducerType> for ConsumerType {
    fn from(producer_type: ProducerType) -> Self {
        match producer_type {
            ProducerType::Simple => ConsumerType::Simple,
            ProducerType::Simulcast => ConsumerType::Simulcast,
            ProducerType::Svc => ConsumerType::Svc,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerScore {
    /// Score of the stream sent to the remote endpoint.
    pub score: u8,
    /// Score of the currently selected producer encoding.
    pub producer_score: u8,
    /// Scores of every producer encoding.
    #[serde(default)]
    pub producer_scores: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerLayers {
    pub spatial_layer: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal_layer: Option<u8>,
}

pub type ConsumerTraceEventType = ProducerTraceEventType;

/// Options for [`crate::Transport::consume`].
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub producer_id: String,
    /// Receiver capabilities. Required except on pipe transports.
    pub rtp_capabilities: Option<RtpCapabilities>,
    pub paused: bool,
    pub preferred_layers: Option<ConsumerLayers>,
    /// Keep every producer encoding instead of collapsing to one.
    pub pipe: bool,
    pub app_data: AppData,
}

impl ConsumerOptions {
    pub fn new(producer_id: impl Into<String>, rtp_capabilities: RtpCapabilities) -> Self {
        Self {
            producer_id: producer_id.into(),
            rtp_capabilities: Some(rtp_capabilities),
            paused: false,
            preferred_layers: None,
            pipe: false,
            app_data: AppData::new(),
        }
    }

    /// Consumer on a pipe transport; capabilities come from the transport.
    pub fn new_pipe_transport(producer_id: impl Into<String>) -> Self {
        Self {
            producer_id: producer_id.into(),
            rtp_capabilities: None,
            paused: false,
            preferred_layers: None,
            pipe: false,
            app_data: AppData::new(),
        }
    }
}

/// Events a [`Consumer`] emits.
#[derive(Debug, Clone)]
pub enum ConsumerEvent {
    /// The source producer closed; the consumer is now closed too.
    ProducerClose,
    ProducerPause,
    ProducerResume,
    Score(ConsumerScore),
    LayersChange(Option<ConsumerLayers>),
    Trace(TraceEventData),
    /// RTP packet relayed to a direct transport.
    Rtp(Bytes),
    /// Effective pause state (`paused || producer_paused`) became true.
    Pause,
    /// Effective pause state became false.
    Resume,
    /// The owning transport closed.
    TransportClose,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
enum ConsumerNotification {
    ProducerClose,
    ProducerPause,
    ProducerResume,
    Score(ConsumerScore),
    LayersChange(Option<ConsumerLayers>),
    Trace(TraceEventData),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Explicit,
    TransportClosed,
    ProducerClosed,
}

/// Response to `transport.consume`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConsumeResponse {
    pub(crate) paused: bool,
    pub(crate) producer_paused: bool,
    #[serde(default)]
    pub(crate) score: ConsumerScore,
    #[serde(default)]
    pub(crate) preferred_layers: Option<ConsumerLayers>,
}

pub(crate) struct ConsumerInit {
    pub(crate) internal: ConsumerInternal,
    pub(crate) kind: MediaKind,
    pub(crate) r#type: ConsumerType,
    pub(crate) rtp_parameters: RtpParameters,
    pub(crate) response: ConsumeResponse,
    pub(crate) app_data: AppData,
    pub(crate) context: Context,
}

#[derive(Debug)]
struct State {
    paused: bool,
    producer_paused: bool,
    score: ConsumerScore,
    preferred_layers: Option<ConsumerLayers>,
    current_layers: Option<ConsumerLayers>,
    priority: u8,
}

impl State {
    fn effectively_paused(&self) -> bool {
        self.paused || self.producer_paused
    }
}

struct Inner {
    id: String,
    producer_id: String,
    internal: ConsumerInternal,
    kind: MediaKind,
    r#type: ConsumerType,
    rtp_parameters: RtpParameters,
    state: Mutex<State>,
    app_data: AppData,
    context: Context,
    handlers: EventHandlers<ConsumerEvent>,
    close_handlers: CloseHandlers,
    lifecycle: Lifecycle,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Inner {
    fn close(&self, reason: CloseReason) {
        if !self.lifecycle.begin_close() {
            return;
        }
        tracing::debug!(consumer_id = %self.id, ?reason, "close()");

        self.subscriptions.lock().clear();
        if reason == CloseReason::Explicit {
            self.context
                .channel
                .request_detached("consumer.close", &self.internal, ());
        }
        self.lifecycle.finish_close();

        match reason {
            CloseReason::Explicit => {}
            CloseReason::TransportClosed => self.handlers.emit(&ConsumerEvent::TransportClose),
            CloseReason::ProducerClosed => self.handlers.emit(&ConsumerEvent::ProducerClose),
        }
        self.context.bus.closed(EntityKind::Consumer, &self.id);
        self.close_handlers.run();
        self.handlers.clear();
    }

    /// Apply a pause state change and report effective transitions.
    fn update_paused<F>(&self, change: F)
    where
        F: FnOnce(&mut State),
    {
        let (was_paused, is_paused) = {
            let mut state = self.state.lock();
            let was_paused = state.effectively_paused();
            change(&mut state);
            (was_paused, state.effectively_paused())
        };
        if was_paused == is_paused {
            return;
        }
        let event = if is_paused {
            ConsumerEvent::Pause
        } else {
            ConsumerEvent::Resume
        };
        self.handlers.emit(&event);
        self.context
            .bus
            .paused(EntityKind::Consumer, &self.id, is_paused);
    }

    fn handle_notification(&self, notification: &Notification) {
        match notification.parse_event::<ConsumerNotification>() {
            Ok(ConsumerNotification::ProducerClose) => self.close(CloseReason::ProducerClosed),
            Ok(ConsumerNotification::ProducerPause) => {
                if self.state.lock().producer_paused {
                    return;
                }
                self.update_paused(|state| state.producer_paused = true);
                self.handlers.emit(&ConsumerEvent::ProducerPause);
            }
            Ok(ConsumerNotification::ProducerResume) => {
                if !self.state.lock().producer_paused {
                    return;
                }
                self.update_paused(|state| state.producer_paused = false);
                self.handlers.emit(&ConsumerEvent::ProducerResume);
            }
            Ok(ConsumerNotification::Score(score)) => {
                self.state.lock().score = score.clone();
                self.handlers.emit(&ConsumerEvent::Score(score));
            }
            Ok(ConsumerNotification::LayersChange(layers)) => {
                self.state.lock().current_layers = layers;
                self.handlers.emit(&ConsumerEvent::LayersChange(layers));
            }
            Ok(ConsumerNotification::Trace(trace)) => {
                self.handlers.emit(&ConsumerEvent::Trace(trace));
            }
            Err(err) => {
                tracing::error!(
                    consumer_id = %self.id,
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
        match notification.event.as_str() {
            "rtp" => {
                let packet = notification.payload.clone().unwrap_or_default();
                self.handlers.emit(&ConsumerEvent::Rtp(packet));
            }
            other => {
                tracing::error!(consumer_id = %self.id, event = other, "ignoring unknown payload event");
            }
        }
    }
}

/// Sends one producer's media to the remote endpoint of a transport.
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<Inner>,
}

impl Consumer {
    pub(crate) fn new(init: ConsumerInit) -> Self {
        let ConsumerInit {
            internal,
            kind,
            r#type,
            rtp_parameters,
            response,
            app_data,
            context,
        } = init;
        let id = internal.consumer_id.clone();

        let inner = Arc::new(Inner {
            id: id.clone(),
            producer_id: internal.producer_id.clone(),
            internal,
            kind,
            r#type,
            rtp_parameters,
            state: Mutex::new(State {
                paused: response.paused,
                producer_paused: response.producer_paused,
                score: response.score,
                preferred_layers: response.preferred_layers,
                current_layers: None,
                priority: 1,
            }),
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

    pub fn producer_id(&self) -> &str {
        &self.inner.producer_id
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    pub fn r#type(&self) -> ConsumerType {
        self.inner.r#type
    }

    pub fn rtp_parameters(&self) -> &RtpParameters {
        &self.inner.rtp_parameters
    }

    /// Paused locally.
    pub fn paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    /// The source producer is paused.
    pub fn producer_paused(&self) -> bool {
        self.inner.state.lock().producer_paused
    }

    pub fn score(&self) -> ConsumerScore {
        self.inner.state.lock().score.clone()
    }

    pub fn preferred_layers(&self) -> Option<ConsumerLayers> {
        self.inner.state.lock().preferred_layers
    }

    pub fn current_layers(&self) -> Option<ConsumerLayers> {
        self.inner.state.lock().current_layers
    }

    pub fn priority(&self) -> u8 {
        self.inner.state.lock().priority
    }

    pub fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    pub fn closed(&self) -> bool {
        self.inner.lifecycle.closed()
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.lifecycle.closing() {
            return Err(Error::closed("Consumer"));
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
        self.request("consumer.dump", ()).await
    }

    pub async fn get_stats(&self) -> Result<Value> {
        self.request("consumer.getStats", ()).await
    }

    pub async fn pause(&self) -> Result<()> {
        tracing::debug!(consumer_id = %self.id(), "pause()");
        self.request::<()>("consumer.pause", ()).await?;
        self.inner.update_paused(|state| state.paused = true);
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        tracing::debug!(consumer_id = %self.id(), "resume()");
        self.request::<()>("consumer.resume", ()).await?;
        self.inner.update_paused(|state| state.paused = false);
        Ok(())
    }

    pub async fn set_preferred_layers(&self, layers: ConsumerLayers) -> Result<()> {
        let preferred: Option<ConsumerLayers> =
            self.request("consumer.setPreferredLayers", layers).await?;
        self.inner.state.lock().preferred_layers = preferred;
        Ok(())
    }

    pub async fn set_priority(&self, priority: u8) -> Result<()> {
        self.request_priority(priority).await
    }

    /// Restore the default priority (1).
    pub async fn unset_priority(&self) -> Result<()> {
        self.request_priority(1).await
    }

    async fn request_priority(&self, priority: u8) -> Result<()> {
        #[derive(Serialize, Deserialize)]
        struct Priority {
            priority: u8,
        }
        let response: Priority = self
            .request("consumer.setPriority", Priority { priority })
            .await?;
        self.inner.state.lock().priority = response.priority;
        Ok(())
    }

    pub async fn request_key_frame(&self) -> Result<()> {
        self.request::<()>("consumer.requestKeyFrame", ()).await
    }

    pub async fn enable_trace_event(&self, types: Vec<ConsumerTraceEventType>) -> Result<()> {
        #[derive(Serialize)]
        struct Data {
            types: Vec<ConsumerTraceEventType>,
        }
        self.request::<()>("consumer.enableTraceEvent", Data { types })
            .await
    }

    pub fn close(&self) {
        self.inner.close(CloseReason::Explicit);
    }

    pub(crate) fn transport_closed(&self) {
        self.inner.close(CloseReason::TransportClosed);
    }

    pub fn on<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ConsumerEvent) + Send + Sync + 'static,
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

    pub fn downgrade(&self) -> WeakConsumer {
        WeakConsumer {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.inner.id)
            .field("producer_id", &self.inner.producer_id)
            .field("type", &self.inner.r#type)
            .field("state", &*self.inner.state.lock())
            .field("closed", &self.closed())
            .finish()
    }
}

#[derive(Clone)]
pub struct WeakConsumer {
    inner: Weak<Inner>,
}

impl WeakConsumer {
    pub fn upgrade(&self) -> Option<Consumer> {
        self.inner.upgrade().map(|inner| Consumer { inner })
    }
}

impl fmt::Debug for WeakConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakConsumer").finish()
    }
}
