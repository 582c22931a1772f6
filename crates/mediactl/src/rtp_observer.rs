//! RTP observers: audio level and active speaker detection over a set of
//! producers of one router.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use mediactl_channel::{Notification, Subscription};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::bus::EntityKind;
use crate::context::Context;
use crate::data_structures::AppData;
use crate::error::{Error, Result};
use crate::events::{CloseHandlers, EventHandlers, HandlerId, Lifecycle};
use crate::messages::RtpObserverInternal;
use crate::producer::Producer;
use crate::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RtpObserverKind {
    AudioLevel,
    ActiveSpeaker,
}

impl RtpObserverKind {
    pub(crate) fn entity_kind(self) -> EntityKind {
        match self {
            RtpObserverKind::AudioLevel => EntityKind::AudioLevelObserver,
            RtpObserverKind::ActiveSpeaker => EntityKind::ActiveSpeakerObserver,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioLevelObserverOptions {
    /// Loudest producers reported per interval.
    pub max_entries: u16,
    /// Volume in dBvo, from -127 to 0, below which a producer is silent.
    pub threshold: i8,
    /// Reporting interval in milliseconds.
    pub interval: u16,
    pub app_data: AppData,
}

impl Default for AudioLevelObserverOptions {
    fn default() -> Self {
        Self {
            max_entries: 1,
            threshold: -80,
            interval: 1000,
            app_data: AppData::new(),
        }
    }
}

impl AudioLevelObserverOptions {
    pub(crate) fn request(&self) -> Result<AudioLevelObserverRequest> {
        if self.max_entries == 0 {
            return Err(Error::Validation(
                "if given, maxEntries must be a positive number".to_string(),
            ));
        }
        if !(-127..=0).contains(&self.threshold) {
            return Err(Error::Validation(
                "if given, threshold must be a negative number greater than -127".to_string(),
            ));
        }
        Ok(AudioLevelObserverRequest {
            max_entries: self.max_entries,
            threshold: self.threshold,
            interval: self.interval,
        })
    }
}

/// Body of `router.createAudioLevelObserver`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AudioLevelObserverRequest {
    max_entries: u16,
    threshold: i8,
    interval: u16,
}

#[derive(Debug, Clone)]
pub struct ActiveSpeakerObserverOptions {
    /// Evaluation interval in milliseconds.
    pub interval: u16,
    pub app_data: AppData,
}

impl Default for ActiveSpeakerObserverOptions {
    fn default() -> Self {
        Self {
            interval: 300,
            app_data: AppData::new(),
        }
    }
}

impl ActiveSpeakerObserverOptions {
    pub(crate) fn request(&self) -> ActiveSpeakerObserverRequest {
        ActiveSpeakerObserverRequest {
            interval: self.interval,
        }
    }
}

/// Body of `router.createActiveSpeakerObserver`.
#[derive(Debug, Serialize)]
pub(crate) struct ActiveSpeakerObserverRequest {
    interval: u16,
}

/// Volume of one producer, in dBvo.
#[derive(Debug, Clone)]
pub struct AudioLevelObserverVolume {
    pub producer: Producer,
    pub volume: i8,
}

#[derive(Debug, Clone)]
pub enum RtpObserverEvent {
    /// Loudest producers, loudest first.
    Volumes(Vec<AudioLevelObserverVolume>),
    /// Every producer is below the threshold.
    Silence,
    DominantSpeaker(Producer),
    Pause,
    Resume,
    AddProducer(Producer),
    RemoveProducer(Producer),
    /// The owning router closed.
    RouterClose,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeData {
    producer_id: String,
    volume: i8,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DominantSpeakerData {
    producer_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
enum RtpObserverNotification {
    Volumes(Vec<VolumeData>),
    Silence,
    DominantSpeaker(DominantSpeakerData),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Explicit,
    RouterClosed,
}

pub(crate) struct RtpObserverInit {
    pub(crate) internal: RtpObserverInternal,
    pub(crate) kind: RtpObserverKind,
    pub(crate) registry: Registry,
    pub(crate) app_data: AppData,
    pub(crate) context: Context,
}

struct Inner {
    id: String,
    kind: RtpObserverKind,
    internal: RtpObserverInternal,
    paused: Mutex<bool>,
    registry: Registry,
    app_data: AppData,
    context: Context,
    handlers: EventHandlers<RtpObserverEvent>,
    close_handlers: CloseHandlers,
    lifecycle: Lifecycle,
    subscription: Mutex<Option<Subscription>>,
}

impl Inner {
    fn close(&self, reason: CloseReason) {
        if !self.lifecycle.begin_close() {
            return;
        }
        tracing::debug!(rtp_observer_id = %self.id, ?reason, "close()");

        self.subscription.lock().take();
        if reason == CloseReason::Explicit {
            self.context
                .channel
                .request_detached("rtpObserver.close", &self.internal, ());
        }
        self.lifecycle.finish_close();

        if reason == CloseReason::RouterClosed {
            self.handlers.emit(&RtpObserverEvent::RouterClose);
        }
        self.context.bus.closed(self.kind.entity_kind(), &self.id);
        self.close_handlers.run();
        self.handlers.clear();
    }

    fn handle_notification(&self, notification: &Notification) {
        match notification.parse_event::<RtpObserverNotification>() {
            Ok(RtpObserverNotification::Volumes(volumes)) => {
                // Producers closed since the engine measured are skipped.
                let volumes: Vec<AudioLevelObserverVolume> = volumes
                    .into_iter()
                    .filter_map(|VolumeData { producer_id, volume }| {
                        self.registry
                            .producer(&producer_id)
                            .map(|producer| AudioLevelObserverVolume { producer, volume })
                    })
                    .collect();
                if !volumes.is_empty() {
                    self.handlers.emit(&RtpObserverEvent::Volumes(volumes));
                }
            }
            Ok(RtpObserverNotification::Silence) => {
                self.handlers.emit(&RtpObserverEvent::Silence);
            }
            Ok(RtpObserverNotification::DominantSpeaker(DominantSpeakerData { producer_id })) => {
                match self.registry.producer(&producer_id) {
                    Some(producer) => self
                        .handlers
                        .emit(&RtpObserverEvent::DominantSpeaker(producer)),
                    None => tracing::debug!(
                        rtp_observer_id = %self.id,
                        producer_id = %producer_id,
                        "dominant speaker no longer exists"
                    ),
                }
            }
            Err(err) => {
                tracing::error!(
                    rtp_observer_id = %self.id,
                    event = %notification.event,
                    error = %err,
                    "ignoring unknown event"
                );
            }
        }
    }
}

/// Observer core shared by [`AudioLevelObserver`] and
/// [`ActiveSpeakerObserver`].
#[derive(Clone)]
pub struct RtpObserver {
    inner: Arc<Inner>,
}

impl RtpObserver {
    pub(crate) fn new(init: RtpObserverInit) -> Self {
        let RtpObserverInit {
            internal,
            kind,
            registry,
            app_data,
            context,
        } = init;
        let id = internal.rtp_observer_id.clone();

        let inner = Arc::new(Inner {
            id: id.clone(),
            kind,
            internal,
            paused: Mutex::new(false),
            registry,
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

    pub fn kind(&self) -> RtpObserverKind {
        self.inner.kind
    }

    pub fn paused(&self) -> bool {
        *self.inner.paused.lock()
    }

    pub fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    pub fn closed(&self) -> bool {
        self.inner.lifecycle.closed()
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.lifecycle.closing() {
            return Err(Error::closed("RtpObserver"));
        }
        Ok(())
    }

    async fn request(&self, method: &str, data: impl Serialize) -> Result<()> {
        self.check_open()?;
        self.inner
            .context
            .channel
            .request::<()>(method, &self.inner.internal, data)
            .await?;
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        tracing::debug!(rtp_observer_id = %self.id(), "pause()");
        self.request("rtpObserver.pause", ()).await?;

        let was_paused = std::mem::replace(&mut *self.inner.paused.lock(), true);
        if !was_paused {
            self.inner.handlers.emit(&RtpObserverEvent::Pause);
            self.inner
                .context
                .bus
                .paused(self.inner.kind.entity_kind(), self.id(), true);
        }
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        tracing::debug!(rtp_observer_id = %self.id(), "resume()");
        self.request("rtpObserver.resume", ()).await?;

        let was_paused = std::mem::replace(&mut *self.inner.paused.lock(), false);
        if was_paused {
            self.inner.handlers.emit(&RtpObserverEvent::Resume);
            self.inner
                .context
                .bus
                .paused(self.inner.kind.entity_kind(), self.id(), false);
        }
        Ok(())
    }

    fn lookup(&self, producer_id: &str) -> Result<Producer> {
        self.inner.registry.producer(producer_id).ok_or_else(|| {
            Error::Validation(format!("Producer with id \"{producer_id}\" not found"))
        })
    }

    /// Start observing a producer of the same router.
    pub async fn add_producer(&self, producer_id: &str) -> Result<()> {
        tracing::debug!(rtp_observer_id = %self.id(), producer_id, "add_producer()");
        let producer = self.lookup(producer_id)?;
        self.request("rtpObserver.addProducer", ProducerIdData { producer_id })
            .await?;
        self.inner
            .handlers
            .emit(&RtpObserverEvent::AddProducer(producer));
        Ok(())
    }

    pub async fn remove_producer(&self, producer_id: &str) -> Result<()> {
        tracing::debug!(rtp_observer_id = %self.id(), producer_id, "remove_producer()");
        let producer = self.lookup(producer_id)?;
        self.request("rtpObserver.removeProducer", ProducerIdData { producer_id })
            .await?;
        self.inner
            .handlers
            .emit(&RtpObserverEvent::RemoveProducer(producer));
        Ok(())
    }

    pub fn close(&self) {
        self.inner.close(CloseReason::Explicit);
    }

    pub(crate) fn router_closed(&self) {
        self.inner.close(CloseReason::RouterClosed);
    }

    pub fn on<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&RtpObserverEvent) + Send + Sync + 'static,
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
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProducerIdData<'a> {
    producer_id: &'a str,
}

impl fmt::Debug for RtpObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RtpObserver")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("paused", &self.paused())
            .field("closed", &self.closed())
            .finish()
    }
}

/// Reports the loudest producers every interval. Derefs to [`RtpObserver`].
#[derive(Debug, Clone)]
pub struct AudioLevelObserver {
    observer: RtpObserver,
}

impl AudioLevelObserver {
    pub(crate) fn new(observer: RtpObserver) -> Self {
        Self { observer }
    }
}

impl Deref for AudioLevelObserver {
    type Target = RtpObserver;

    fn deref(&self) -> &RtpObserver {
        &self.observer
    }
}

/// Reports the dominant speaker. Derefs to [`RtpObserver`].
#[derive(Debug, Clone)]
pub struct ActiveSpeakerObserver {
    observer: RtpObserver,
}

impl ActiveSpeakerObserver {
    pub(crate) fn new(observer: RtpObserver) -> Self {
        Self { observer }
    }
}

impl Deref for ActiveSpeakerObserver {
    type Target = RtpObserver;

    fn deref(&self) -> &RtpObserver {
        &self.observer
    }
}
