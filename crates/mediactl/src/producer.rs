//! RTP source inside a transport.

use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use mediactl_channel::{Notification, Subscription};
use mediactl_ortc::{MediaKind, RtpParameters};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::EntityKind;
use crate::context::Context;
use crate::data_structures::{AppData, TraceEventData};
use crate::error::{Error, Result};
use crate::events::{CloseHandlers, EventHandlers, HandlerId, Lifecycle};
use crate::messages::ProducerInternal;

/// How the engine treats the producer's encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerType {
    Simple,
    Simulcast,
    Svc,
}

/// Score of one encoding as received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerScore {
    pub encoding_idx: u32,
    pub ssrc: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    pub score: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoOrientation {
    pub camera: bool,
    pub flip: bool,
    pub rotation: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerTraceEventType {
    Rtp,
    Keyframe,
    Nack,
    Pli,
    Fir,
}

/// Options for [`crate::Transport::produce`].
#[derive(Debug, Clone)]
pub struct ProducerOptions {
    /// Reuse an existing id; only pipe transports do this.
    pub id: Option<String>,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    pub paused: bool,
    /// Milliseconds to delay key frame requests to the sender.
    pub key_frame_request_delay: u32,
    pub app_data: AppData,
}

impl ProducerOptions {
    pub fn new(kind: MediaKind, rtp_parameters: RtpParameters) -> Self {
        Self {
            id: None,
            kind,
            rtp_parameters,
            paused: false,
            key_frame_request_delay: 0,
            app_data: AppData::new(),
        }
    }

    /// Producer on a pipe transport mirroring producer `id` of another router.
    pub fn new_pipe_transport(
        id: impl Into<String>,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::new(kind, rtp_parameters)
        }
    }
}

/// Events a [`Producer`] emits.
#[derive(Debug, Clone)]
pub enum ProducerEvent {
    Score(Vec<ProducerScore>),
    VideoOrientationChange(VideoOrientation),
    Trace(TraceEventData),
    Pause,
    Resume,
    /// The owning transport closed.
    TransportClose,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
enum ProducerNotification {
    Score(Vec<ProducerScore>),
    VideoOrientationChange(VideoOrientation),
    Trace(TraceEventData),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseReason {
    Explicit,
    TransportClosed,
}

pub(crate) struct ProducerInit {
    pub(crate) internal: ProducerInternal,
    pub(crate) kind: MediaKind,
    pub(crate) r#type: ProducerType,
    pub(crate) rtp_parameters: RtpParameters,
    pub(crate) consumable_rtp_parameters: RtpParameters,
    pub(crate) paused: bool,
    pub(crate) direct: bool,
    pub(crate) app_data: AppData,
    pub(crate) context: Context,
}

struct Inner {
    id: String,
    internal: ProducerInternal,
    kind: MediaKind,
    r#type: ProducerType,
    rtp_parameters: RtpParameters,
    consumable_rtp_parameters: RtpParameters,
    direct: bool,
    paused: Mutex<bool>,
    score: Mutex<Vec<ProducerScore>>,
    app_data: AppData,
    context: Context,
    handlers: EventHandlers<ProducerEvent>,
    close_handlers: CloseHandlers,
    lifecycle: Lifecycle,
    subscription: Mutex<Option<Subscription>>,
}

impl Inner {
    fn close(&self, reason: CloseReason) {
        if !self.lifecycle.begin_close() {
            return;
        }
        tracing::debug!(producer_id = %self.id, ?reason, "close()");

        self.subscription.lock().take();
        if reason == CloseReason::Explicit {
            self.context
                .channel
                .request_detached("producer.close", &self.internal, ());
        }
        self.lifecycle.finish_close();

        if reason == CloseReason::TransportClosed {
            self.handlers.emit(&ProducerEvent::TransportClose);
        }
        self.context.bus.closed(EntityKind::Producer, &self.id);
        self.close_handlers.run();
        self.handlers.clear();
    }

    fn handle_notification(&self, notification: &Notification) {
        match notification.parse_event::<ProducerNotification>() {
            Ok(ProducerNotification::Score(score)) => {
                *self.score.lock() = score.clone();
                self.handlers.emit(&ProducerEvent::Score(score));
            }
            Ok(ProducerNotification::VideoOrientationChange(orientation)) => {
                self.handlers
                    .emit(&ProducerEvent::VideoOrientationChange(orientation));
            }
            Ok(ProducerNotification::Trace(trace)) => {
                self.handlers.emit(&ProducerEvent::Trace(trace));
            }
            Err(err) => {
                tracing::error!(
                    producer_id = %self.id,
                    event = %notification.event,
                    error = %err,
                    "ignoring unknown event"
                );
            }
        }
    }
}

/// RTP source. Cheap to clone; every clone refers to the same producer.
#[derive(Clone)]
pub struct Producer {
    inner: Arc<Inner>,
}

impl Producer {
    pub(crate) fn new(init: ProducerInit) -> Self {
        let ProducerInit {
            internal,
            kind,
            r#type,
            rtp_parameters,
            consumable_rtp_parameters,
            paused,
            direct,
            app_data,
            context,
        } = init;
        let id = internal.producer_id.clone();

        let inner = Arc::new(Inner {
            id: id.clone(),
            internal,
            kind,
            r#type,
            rtp_parameters,
            consumable_rtp_parameters,
            direct,
            paused: Mutex::new(paused),
            score: Mutex::new(Vec::new()),
            app_data,
            context,
            handlers: EventHandlers::new(),
            close_handlers: CloseHandlers::new(),
            lifecycle: Lifecycle::new(),
            subscription: Mutex::new(None),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let subscription = inner.context.channel.subscribe(id, move |notification| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_notification(notification);
            }
        });
        *inner.subscription.lock() = Some(subscription);

        Self { inner }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    pub fn r#type(&self) -> ProducerType {
        self.inner.r#type
    }

    /// Parameters as given by the sender, after validation.
    pub fn rtp_parameters(&self) -> &RtpParameters {
        &self.inner.rtp_parameters
    }

    /// Router-side form every consumer of this producer is derived from.
    pub fn consumable_rtp_parameters(&self) -> &RtpParameters {
        &self.inner.consumable_rtp_parameters
    }

    pub fn paused(&self) -> bool {
        *self.inner.paused.lock()
    }

    pub fn score(&self) -> Vec<ProducerScore> {
        self.inner.score.lock().clone()
    }

    pub fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    pub fn closed(&self) -> bool {
        self.inner.lifecycle.closed()
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.lifecycle.closing() {
            return Err(Error::closed("Producer"));
        }
        Ok(())
    }

    pub async fn dump(&self) -> Result<Value> {
        self.check_open()?;
        Ok(self
            .inner
            .context
            .channel
            .request("producer.dump", &self.inner.internal, ())
            .await?)
    }

    pub async fn get_stats(&self) -> Result<Value> {
        self.check_open()?;
        Ok(self
            .inner
            .context
            .channel
            .request("producer.getStats", &self.inner.internal, ())
            .await?)
    }

    pub async fn pause(&self) -> Result<()> {
        tracing::debug!(producer_id = %self.id(), "pause()");
        self.check_open()?;
        self.inner
            .context
            .channel
            .request::<()>("producer.pause", &self.inner.internal, ())
            .await?;

        let was_paused = std::mem::replace(&mut *self.inner.paused.lock(), true);
        if !was_paused {
            self.inner.handlers.emit(&ProducerEvent::Pause);
            self.inner
                .context
                .bus
                .paused(EntityKind::Producer, self.id(), true);
        }
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        tracing::debug!(producer_id = %self.id(), "resume()");
        self.check_open()?;
        self.inner
            .context
            .channel
            .request::<()>("producer.resume", &self.inner.internal, ())
            .await?;

        let was_paused = std::mem::replace(&mut *self.inner.paused.lock(), false);
        if was_paused {
            self.inner.handlers.emit(&ProducerEvent::Resume);
            self.inner
                .context
                .bus
                .paused(EntityKind::Producer, self.id(), false);
        }
        Ok(())
    }

    /// Enable `trace` events of the given types. An empty list disables them.
    pub async fn enable_trace_event(&self, types: Vec<ProducerTraceEventType>) -> Result<()> {
        self.check_open()?;
        #[derive(Serialize)]
        struct Data {
            types: Vec<ProducerTraceEventType>,
        }
        self.inner
            .context
            .channel
            .request::<()>(
                "producer.enableTraceEvent",
                &self.inner.internal,
                Data { types },
            )
            .await?;
        Ok(())
    }

    /// Inject an RTP packet. Only producers on a direct transport accept it.
    pub fn send(&self, rtp_packet: impl Into<Bytes>) -> Result<()> {
        self.check_open()?;
        if !self.inner.direct {
            return Err(Error::InvalidState(
                "send() is only valid on a DirectTransport".to_string(),
            ));
        }
        self.inner.context.payload_channel.notify(
            "producer.send",
            &self.inner.internal,
            (),
            rtp_packet,
        )?;
        Ok(())
    }

    /// Close the producer and tell the engine.
    pub fn close(&self) {
        self.inner.close(CloseReason::Explicit);
    }

    pub(crate) fn transport_closed(&self) {
        self.inner.close(CloseReason::TransportClosed);
    }

    pub fn on<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&ProducerEvent) + Send + Sync + 'static,
    {
        self.inner.handlers.add(handler)
    }

    pub fn off(&self, id: HandlerId) {
        self.inner.handlers.remove(id);
    }

    /// Run `callback` once the producer is closed, whichever way.
    pub fn on_close<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.close_handlers.add(callback);
    }

    pub fn downgrade(&self) -> WeakProducer {
        WeakProducer {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("type", &self.inner.r#type)
            .field("paused", &self.paused())
            .field("closed", &self.closed())
            .finish()
    }
}

/// Non-owning handle to a [`Producer`].
#[derive(Clone)]
pub struct WeakProducer {
    inner: Weak<Inner>,
}

impl WeakProducer {
    pub fn upgrade(&self) -> Option<Producer> {
        self.inner.upgrade().map(|inner| Producer { inner })
    }
}

impl fmt::Debug for WeakProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakProducer").finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn notifications_decode() {
        let notification = Notification {
            target_id: "p1".to_string(),
            event: "score".to_string(),
            data: json!([{ "encodingIdx": 0, "ssrc": 1111, "score": 10 }]),
            payload: None,
        };
        match notification.parse_event::<ProducerNotification>().unwrap() {
            ProducerNotification::Score(score) => {
                assert_eq!(score.len(), 1);
                assert_eq!(score[0].ssrc, 1111);
                assert_eq!(score[0].rid, None);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let notification = Notification {
            event: "videoorientationchange".to_string(),
            data: json!({ "camera": true, "flip": false, "rotation": 90 }),
            ..notification
        };
        assert!(matches!(
            notification.parse_event::<ProducerNotification>().unwrap(),
            ProducerNotification::VideoOrientationChange(VideoOrientation { rotation: 90, .. })
        ));
    }

    #[test]
    fn type_wire_names() {
        assert_eq!(
            serde_json::from_value::<ProducerType>(json!("simulcast")).unwrap(),
            ProducerType::Simulcast
        );
        assert_eq!(
            serde_json::to_value(ProducerTraceEventType::Keyframe).unwrap(),
            json!("keyframe")
        );
    }
}
