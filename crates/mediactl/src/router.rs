//! Routers: one media routing domain inside a worker.
//!
//! A router owns transports and RTP observers, and keeps the producer
//! registry its transports consume from. `pipe_to_router` relays a producer
//! into another router over a pair of connected pipe transports.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use mediactl_ortc::{NumSctpStreams, RtpCapabilities, RtpCodecCapability};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::bus::EntityKind;
use crate::consumer::{Consumer, ConsumerEvent, ConsumerOptions};
use crate::context::{spawn_detached, Context};
use crate::data_consumer::{DataConsumer, DataConsumerOptions};
use crate::data_producer::{DataProducer, DataProducerOptions};
use crate::data_structures::{AppData, ListenIp};
use crate::error::{Error, Result};
use crate::events::{CloseHandlers, EventHandlers, HandlerId, Lifecycle};
use crate::messages::{new_id, RouterInternal, RtpObserverInternal, TransportInternal};
use crate::producer::{Producer, ProducerOptions};
use crate::registry::Registry;
use crate::rtp_observer::{
    ActiveSpeakerObserver, ActiveSpeakerObserverOptions, AudioLevelObserver,
    AudioLevelObserverOptions, RtpObserver, RtpObserverInit, RtpObserverKind,
};
use crate::transport::{
    DirectTransport, DirectTransportOptions, PipeTransport, PipeTransportOptions,
    PipeTransportRemoteParameters, PlainTransport, PlainTransportOptions, Transport,
    TransportData, TransportInit, WebRtcTransport, WebRtcTransportOptions,
};

#[derive(Debug, Clone, Default)]
pub struct RouterOptions {
    /// Codecs the router will route. Payload types are optional.
    pub media_codecs: Vec<RtpCodecCapability>,
    pub app_data: AppData,
}

impl RouterOptions {
    pub fn new(media_codecs: Vec<RtpCodecCapability>) -> Self {
        Self {
            media_codecs,
            app_data: AppData::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RouterEvent {
    /// The owning worker closed.
    WorkerClose,
}

/// What to pipe and how to set up the pipe transports if none exist yet.
#[derive(Debug, Clone)]
pub struct PipeToRouterOptions {
    pub producer_id: Option<String>,
    pub data_producer_id: Option<String>,
    /// Destination router. Must differ from the source.
    pub router: Router,
    pub listen_ip: ListenIp,
    pub enable_sctp: bool,
    pub num_sctp_streams: NumSctpStreams,
    pub enable_rtx: bool,
    pub enable_srtp: bool,
}

impl PipeToRouterOptions {
    fn new(router: Router) -> Self {
        Self {
            producer_id: None,
            data_producer_id: None,
            router,
            listen_ip: ListenIp::new(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            enable_sctp: true,
            num_sctp_streams: NumSctpStreams::default(),
            enable_rtx: false,
            enable_srtp: false,
        }
    }

    pub fn producer(producer_id: impl Into<String>, router: Router) -> Self {
        Self {
            producer_id: Some(producer_id.into()),
            ..Self::new(router)
        }
    }

    pub fn data_producer(data_producer_id: impl Into<String>, router: Router) -> Self {
        Self {
            data_producer_id: Some(data_producer_id.into()),
            ..Self::new(router)
        }
    }

    fn pipe_transport_options(&self) -> PipeTransportOptions {
        PipeTransportOptions {
            enable_sctp: self.enable_sctp,
            num_sctp_streams: self.num_sctp_streams,
            enable_rtx: self.enable_rtx,
            enable_srtp: self.enable_srtp,
            ..PipeTransportOptions::new(self.listen_ip)
        }
    }
}

#[derive(Debug, Clone)]
pub enum PipeToRouterResult {
    Producer {
        /// Consumer on the source router's pipe transport.
        pipe_consumer: Consumer,
        /// Producer with the original id on the destination router.
        pipe_producer: Producer,
    },
    DataProducer {
        pipe_data_consumer: DataConsumer,
        pipe_data_producer: DataProducer,
    },
}

enum PipeSource {
    Producer(Producer),
    DataProducer(DataProducer),
}

/// Connected pipe transports, as seen from one of the two routers.
#[derive(Debug, Clone)]
struct PipeTransportPair {
    local: PipeTransport,
    remote: PipeTransport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Explicit,
    WorkerClosed,
}

struct Inner {
    id: String,
    internal: RouterInternal,
    rtp_capabilities: Arc<RtpCapabilities>,
    app_data: AppData,
    context: Context,
    registry: Registry,
    transports: Mutex<HashMap<String, Transport>>,
    rtp_observers: Mutex<HashMap<String, RtpObserver>>,
    /// Serializes pair lookup and creation; tokio's mutex is FIFO.
    pipe_queue: tokio::sync::Mutex<()>,
    /// Keyed by the peer router id.
    pipe_pairs: Mutex<HashMap<String, PipeTransportPair>>,
    handlers: EventHandlers<RouterEvent>,
    close_handlers: CloseHandlers,
    lifecycle: Lifecycle,
}

impl Inner {
    fn close(&self, reason: CloseReason) {
        if !self.lifecycle.begin_close() {
            return;
        }
        tracing::debug!(router_id = %self.id, ?reason, "close()");

        if reason == CloseReason::Explicit {
            self.context
                .channel
                .request_detached("router.close", &self.internal, ());
        }

        let transports = std::mem::take(&mut *self.transports.lock());
        for transport in transports.into_values() {
            transport.router_closed();
        }
        let rtp_observers = std::mem::take(&mut *self.rtp_observers.lock());
        for rtp_observer in rtp_observers.into_values() {
            rtp_observer.router_closed();
        }
        // Closing the local halves above already closed their peers.
        self.pipe_pairs.lock().clear();
        self.lifecycle.finish_close();

        if reason == CloseReason::WorkerClosed {
            self.handlers.emit(&RouterEvent::WorkerClose);
        }
        self.context.bus.closed(EntityKind::Router, &self.id);
        self.close_handlers.run();
        self.handlers.clear();
    }

    /// Forget the pair towards `peer_id` if it is still the one whose local
    /// half is `local_id`.
    fn evict_pipe_pair(&self, peer_id: &str, local_id: &str) {
        let mut pairs = self.pipe_pairs.lock();
        if pairs
            .get(peer_id)
            .is_some_and(|pair| pair.local.id() == local_id)
        {
            pairs.remove(peer_id);
        }
    }
}

#[derive(Clone)]
pub struct Router {
    inner: Arc<Inner>,
}

impl Router {
    pub(crate) fn new(
        internal: RouterInternal,
        rtp_capabilities: RtpCapabilities,
        app_data: AppData,
        context: Context,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: internal.router_id.clone(),
                internal,
                rtp_capabilities: Arc::new(rtp_capabilities),
                app_data,
                context,
                registry: Registry::default(),
                transports: Mutex::new(HashMap::new()),
                rtp_observers: Mutex::new(HashMap::new()),
                pipe_queue: tokio::sync::Mutex::new(()),
                pipe_pairs: Mutex::new(HashMap::new()),
                handlers: EventHandlers::new(),
                close_handlers: CloseHandlers::new(),
                lifecycle: Lifecycle::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Capabilities generated from the router's media codecs. Remote
    /// endpoints use them to build their producer parameters.
    pub fn rtp_capabilities(&self) -> &RtpCapabilities {
        &self.inner.rtp_capabilities
    }

    pub fn app_data(&self) -> &AppData {
        &self.inner.app_data
    }

    pub fn closed(&self) -> bool {
        self.inner.lifecycle.closed()
    }

    pub fn transports(&self) -> Vec<Transport> {
        self.inner.transports.lock().values().cloned().collect()
    }

    pub fn rtp_observers(&self) -> Vec<RtpObserver> {
        self.inner.rtp_observers.lock().values().cloned().collect()
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.lifecycle.closing() {
            return Err(Error::closed("Router"));
        }
        Ok(())
    }

    pub async fn dump(&self) -> Result<Value> {
        self.check_open()?;
        Ok(self
            .inner
            .context
            .channel
            .request("router.dump", &self.inner.internal, ())
            .await?)
    }

    pub async fn create_webrtc_transport(
        &self,
        options: WebRtcTransportOptions,
    ) -> Result<WebRtcTransport> {
        tracing::debug!(router_id = %self.id(), "create_webrtc_transport()");
        let request = options.request()?;
        let transport = self
            .create_transport(
                "router.createWebRtcTransport",
                request,
                TransportData::WebRtc,
                options.app_data.clone(),
            )
            .await?;
        Ok(WebRtcTransport::new(transport))
    }

    pub async fn create_plain_transport(
        &self,
        options: PlainTransportOptions,
    ) -> Result<PlainTransport> {
        tracing::debug!(router_id = %self.id(), "create_plain_transport()");
        let transport = self
            .create_transport(
                "router.createPlainTransport",
                options.request(),
                TransportData::Plain,
                options.app_data,
            )
            .await?;
        Ok(PlainTransport::new(transport))
    }

    pub async fn create_pipe_transport(
        &self,
        options: PipeTransportOptions,
    ) -> Result<PipeTransport> {
        tracing::debug!(router_id = %self.id(), "create_pipe_transport()");
        let transport = self
            .create_transport(
                "router.createPipeTransport",
                options.request(),
                TransportData::Pipe,
                options.app_data,
            )
            .await?;
        Ok(PipeTransport::new(transport))
    }

    pub async fn create_direct_transport(
        &self,
        options: DirectTransportOptions,
    ) -> Result<DirectTransport> {
        tracing::debug!(router_id = %self.id(), "create_direct_transport()");
        let transport = self
            .create_transport(
                "router.createDirectTransport",
                options.request(),
                |_: Value| TransportData::Direct,
                options.app_data,
            )
            .await?;
        Ok(DirectTransport::new(transport))
    }

    async fn create_transport<D: DeserializeOwned>(
        &self,
        method: &str,
        request: impl Serialize,
        into_data: impl FnOnce(D) -> TransportData,
        app_data: AppData,
    ) -> Result<Transport> {
        self.check_open()?;

        let internal = TransportInternal {
            router_id: self.inner.id.clone(),
            transport_id: new_id(),
        };
        let (data, guard) = self
            .inner
            .context
            .channel
            .request_guarded::<D>(method, &internal, request)
            .await?;

        let transport = Transport::new(TransportInit {
            internal,
            data: into_data(data),
            rtp_capabilities: Arc::clone(&self.inner.rtp_capabilities),
            registry: self.inner.registry.clone(),
            context: self.inner.context.clone(),
            app_data,
        });
        self.adopt_transport(&transport)?;
        drop(guard);

        Ok(transport)
    }

    fn adopt_transport(&self, transport: &Transport) -> Result<()> {
        let adopted = {
            let mut transports = self.inner.transports.lock();
            let open = !self.inner.lifecycle.closing();
            if open {
                transports.insert(transport.id().to_string(), transport.clone());
            }
            open
        };
        if !adopted {
            transport.router_closed();
            return Err(Error::closed("Router"));
        }

        let weak = Arc::downgrade(&self.inner);
        let id = transport.id().to_string();
        transport.on_close(move || {
            if let Some(inner) = weak.upgrade() {
                inner.transports.lock().remove(&id);
            }
        });
        self.inner.context.bus.created(
            transport.kind().entity_kind(),
            transport.id(),
            Some(self.id()),
        );
        Ok(())
    }

    pub async fn create_audio_level_observer(
        &self,
        options: AudioLevelObserverOptions,
    ) -> Result<AudioLevelObserver> {
        tracing::debug!(router_id = %self.id(), "create_audio_level_observer()");
        let request = options.request()?;
        let observer = self
            .create_rtp_observer(
                "router.createAudioLevelObserver",
                request,
                RtpObserverKind::AudioLevel,
                options.app_data,
            )
            .await?;
        Ok(AudioLevelObserver::new(observer))
    }

    pub async fn create_active_speaker_observer(
        &self,
        options: ActiveSpeakerObserverOptions,
    ) -> Result<ActiveSpeakerObserver> {
        tracing::debug!(router_id = %self.id(), "create_active_speaker_observer()");
        let observer = self
            .create_rtp_observer(
                "router.createActiveSpeakerObserver",
                options.request(),
                RtpObserverKind::ActiveSpeaker,
                options.app_data,
            )
            .await?;
        Ok(ActiveSpeakerObserver::new(observer))
    }

    async fn create_rtp_observer(
        &self,
        method: &str,
        request: impl Serialize,
        kind: RtpObserverKind,
        app_data: AppData,
    ) -> Result<RtpObserver> {
        self.check_open()?;

        let internal = RtpObserverInternal {
            router_id: self.inner.id.clone(),
            rtp_observer_id: new_id(),
        };
        let (_, guard) = self
            .inner
            .context
            .channel
            .request_guarded::<Value>(method, &internal, request)
            .await?;

        let observer = RtpObserver::new(RtpObserverInit {
            internal,
            kind,
            registry: self.inner.registry.clone(),
            app_data,
            context: self.inner.context.clone(),
        });

        let adopted = {
            let mut observers = self.inner.rtp_observers.lock();
            let open = !self.inner.lifecycle.closing();
            if open {
                observers.insert(observer.id().to_string(), observer.clone());
            }
            open
        };
        if !adopted {
            observer.router_closed();
            return Err(Error::closed("Router"));
        }
        drop(guard);

        let weak = Arc::downgrade(&self.inner);
        let id = observer.id().to_string();
        observer.on_close(move || {
            if let Some(inner) = weak.upgrade() {
                inner.rtp_observers.lock().remove(&id);
            }
        });
        self.inner
            .context
            .bus
            .created(kind.entity_kind(), observer.id(), Some(self.id()));

        Ok(observer)
    }

    /// Whether an endpoint with `rtp_capabilities` can consume the producer.
    /// An unknown producer yields `false`.
    pub fn can_consume(&self, producer_id: &str, rtp_capabilities: &RtpCapabilities) -> bool {
        let Some(producer) = self.inner.registry.producer(producer_id) else {
            tracing::error!(producer_id, "can_consume() | Producer not found");
            return false;
        };
        match mediactl_ortc::can_consume(producer.consumable_rtp_parameters(), rtp_capabilities) {
            Ok(can) => can,
            Err(err) => {
                tracing::error!(producer_id, error = %err, "can_consume() | unexpected error");
                false
            }
        }
    }

    /// Relay a producer or data producer of this router into another one.
    ///
    /// The pipe transport pair between both routers is created on first use
    /// and shared afterwards.
    pub async fn pipe_to_router(&self, options: PipeToRouterOptions) -> Result<PipeToRouterResult> {
        tracing::debug!(router_id = %self.id(), "pipe_to_router()");
        self.check_open()?;

        let source = match (&options.producer_id, &options.data_producer_id) {
            (None, None) => {
                return Err(Error::Validation(
                    "missing producerId or dataProducerId".to_string(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(Error::Validation(
                    "just producerId or dataProducerId can be given".to_string(),
                ))
            }
            (Some(producer_id), None) => {
                if options.router.id() == self.id() {
                    return Err(Error::Validation(
                        "cannot use this Router as destination".to_string(),
                    ));
                }
                let producer = self
                    .inner
                    .registry
                    .producer(producer_id)
                    .ok_or_else(|| Error::Validation("Producer not found".to_string()))?;
                PipeSource::Producer(producer)
            }
            (None, Some(data_producer_id)) => {
                if options.router.id() == self.id() {
                    return Err(Error::Validation(
                        "cannot use this Router as destination".to_string(),
                    ));
                }
                let data_producer = self
                    .inner
                    .registry
                    .data_producer(data_producer_id)
                    .ok_or_else(|| Error::Validation("DataProducer not found".to_string()))?;
                PipeSource::DataProducer(data_producer)
            }
        };

        let pair = self
            .pipe_transport_pair(&options.router, options.pipe_transport_options())
            .await?;

        match source {
            PipeSource::Producer(producer) => pipe_producer(producer, &pair).await,
            PipeSource::DataProducer(data_producer) => {
                pipe_data_producer(data_producer, &pair).await
            }
        }
    }

    async fn pipe_transport_pair(
        &self,
        peer: &Router,
        options: PipeTransportOptions,
    ) -> Result<PipeTransportPair> {
        let _queued = self.inner.pipe_queue.lock().await;

        if let Some(pair) = self.inner.pipe_pairs.lock().get(peer.id()).cloned() {
            return Ok(pair);
        }

        let (local, remote) = tokio::join!(
            self.create_pipe_transport(options.clone()),
            peer.create_pipe_transport(options),
        );
        let (local, remote) = match (local, remote) {
            (Ok(local), Ok(remote)) => (local, remote),
            (Err(err), other) | (other, Err(err)) => {
                if let Ok(transport) = other {
                    transport.close();
                }
                return Err(err);
            }
        };

        if let Err(err) = connect_pipe_transports(&local, &remote).await {
            local.close();
            remote.close();
            return Err(err);
        }

        self.inner.pipe_pairs.lock().insert(
            peer.id().to_string(),
            PipeTransportPair {
                local: local.clone(),
                remote: remote.clone(),
            },
        );
        peer.inner.pipe_pairs.lock().insert(
            self.id().to_string(),
            PipeTransportPair {
                local: remote.clone(),
                remote: local.clone(),
            },
        );

        // Registered after the pair so a half that already closed evicts it
        // right away.
        link_pipe_half(&local, &remote, self, peer);
        link_pipe_half(&remote, &local, peer, self);

        if local.closed() || remote.closed() {
            return Err(Error::closed("PipeTransport"));
        }
        Ok(PipeTransportPair { local, remote })
    }

    pub fn close(&self) {
        self.inner.close(CloseReason::Explicit);
    }

    pub(crate) fn worker_closed(&self) {
        self.inner.close(CloseReason::WorkerClosed);
    }

    pub fn on<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&RouterEvent) + Send + Sync + 'static,
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

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("id", &self.inner.id)
            .field("closed", &self.closed())
            .finish()
    }
}

async fn connect_pipe_transports(local: &PipeTransport, remote: &PipeTransport) -> Result<()> {
    let local_tuple = local
        .tuple()
        .ok_or_else(|| Error::InvalidState("pipe transport without tuple".to_string()))?;
    let remote_tuple = remote
        .tuple()
        .ok_or_else(|| Error::InvalidState("pipe transport without tuple".to_string()))?;

    tokio::try_join!(
        local.connect(PipeTransportRemoteParameters {
            ip: remote_tuple.local_ip,
            port: remote_tuple.local_port,
            srtp_parameters: remote.srtp_parameters(),
        }),
        remote.connect(PipeTransportRemoteParameters {
            ip: local_tuple.local_ip,
            port: local_tuple.local_port,
            srtp_parameters: local.srtp_parameters(),
        }),
    )?;
    Ok(())
}

/// When `half` closes, close `other` and drop the pair from `owner`.
fn link_pipe_half(half: &PipeTransport, other: &PipeTransport, owner: &Router, peer: &Router) {
    let other = other.downgrade();
    let owner = Arc::downgrade(&owner.inner);
    let peer_id = peer.id().to_string();
    let half_id = half.id().to_string();
    half.on_close(move || {
        if let Some(other) = other.upgrade() {
            other.close();
        }
        if let Some(owner) = owner.upgrade() {
            owner.evict_pipe_pair(&peer_id, &half_id);
        }
    });
}

async fn pipe_producer(producer: Producer, pair: &PipeTransportPair) -> Result<PipeToRouterResult> {
    let pipe_consumer = pair
        .local
        .consume(ConsumerOptions::new_pipe_transport(producer.id()))
        .await?;

    let produced = pair
        .remote
        .produce(ProducerOptions {
            id: Some(producer.id().to_string()),
            kind: pipe_consumer.kind(),
            rtp_parameters: pipe_consumer.rtp_parameters().clone(),
            paused: pipe_consumer.producer_paused(),
            key_frame_request_delay: 0,
            app_data: producer.app_data().clone(),
        })
        .await;
    let pipe_producer = match produced {
        Ok(pipe_producer) => pipe_producer,
        Err(err) => {
            pipe_consumer.close();
            return Err(err);
        }
    };

    if let Err(err) = sync_pipe_producer(&producer, &pipe_producer).await {
        pipe_consumer.close();
        pipe_producer.close();
        return Err(err);
    }

    let weak_producer = pipe_producer.downgrade();
    pipe_consumer.on_close(move || {
        if let Some(pipe_producer) = weak_producer.upgrade() {
            pipe_producer.close();
        }
    });
    let weak_producer = pipe_producer.downgrade();
    pipe_consumer.on(move |event| {
        let pause = match event {
            ConsumerEvent::Pause => true,
            ConsumerEvent::Resume => false,
            _ => return,
        };
        let Some(pipe_producer) = weak_producer.upgrade() else {
            return;
        };
        spawn_detached(async move {
            let synced = if pause {
                pipe_producer.pause().await
            } else {
                pipe_producer.resume().await
            };
            if let Err(err) = synced {
                tracing::warn!(producer_id = %pipe_producer.id(), error = %err, "pipe producer pause sync failed");
            }
        });
    });
    let weak_consumer = pipe_consumer.downgrade();
    pipe_producer.on_close(move || {
        if let Some(pipe_consumer) = weak_consumer.upgrade() {
            pipe_consumer.close();
        }
    });

    Ok(PipeToRouterResult::Producer {
        pipe_consumer,
        pipe_producer,
    })
}

/// Fail if the source closed while piping, and catch the pipe producer up
/// with a pause state that changed meanwhile.
async fn sync_pipe_producer(producer: &Producer, pipe_producer: &Producer) -> Result<()> {
    if producer.closed() {
        return Err(Error::InvalidState("original Producer closed".to_string()));
    }
    if pipe_producer.paused() != producer.paused() {
        if producer.paused() {
            pipe_producer.pause().await?;
        } else {
            pipe_producer.resume().await?;
        }
    }
    Ok(())
}

async fn pipe_data_producer(
    data_producer: DataProducer,
    pair: &PipeTransportPair,
) -> Result<PipeToRouterResult> {
    let pipe_data_consumer = pair
        .local
        .consume_data(DataConsumerOptions::new(data_producer.id()))
        .await?;

    let produced = pair
        .remote
        .produce_data(DataProducerOptions {
            id: Some(data_producer.id().to_string()),
            sctp_stream_parameters: pipe_data_consumer.sctp_stream_parameters(),
            label: pipe_data_consumer.label().to_string(),
            protocol: pipe_data_consumer.protocol().to_string(),
            app_data: data_producer.app_data().clone(),
        })
        .await;
    let pipe_data_producer = match produced {
        Ok(pipe_data_producer) => pipe_data_producer,
        Err(err) => {
            pipe_data_consumer.close();
            return Err(err);
        }
    };

    if data_producer.closed() {
        pipe_data_consumer.close();
        pipe_data_producer.close();
        return Err(Error::InvalidState(
            "original DataProducer closed".to_string(),
        ));
    }

    let weak_producer = pipe_data_producer.downgrade();
    pipe_data_consumer.on_close(move || {
        if let Some(pipe_data_producer) = weak_producer.upgrade() {
            pipe_data_producer.close();
        }
    });
    let weak_consumer = pipe_data_consumer.downgrade();
    pipe_data_producer.on_close(move || {
        if let Some(pipe_data_consumer) = weak_consumer.upgrade() {
            pipe_data_consumer.close();
        }
    });

    Ok(PipeToRouterResult::DataProducer {
        pipe_data_consumer,
        pipe_data_producer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pipe_options_defaults() {
        let options = PipeTransportOptions::new(ListenIp::new(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert!(!options.enable_sctp);

        // The pipe_to_router defaults differ from a bare pipe transport.
        let defaults = PipeToRouterOptions {
            producer_id: None,
            data_producer_id: None,
            listen_ip: ListenIp::new(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            enable_sctp: true,
            num_sctp_streams: NumSctpStreams::default(),
            enable_rtx: false,
            enable_srtp: false,
            router: test_router(),
        };
        let transport_options = defaults.pipe_transport_options();
        assert!(transport_options.enable_sctp);
        assert_eq!(transport_options.num_sctp_streams.mis, 1024);
        assert_eq!(transport_options.max_sctp_message_size, 268_435_456);
        assert!(!transport_options.enable_rtx);
    }

    fn test_router() -> Router {
        let (control_local, _control_remote) = tokio::io::duplex(64);
        let (payload_local, _payload_remote) = tokio::io::duplex(64);
        let (control_reader, control_writer) = tokio::io::split(control_local);
        let (payload_reader, payload_writer) = tokio::io::split(payload_local);
        let notifications = mediactl_channel::NotificationRouter::new();
        let context = Context {
            channel: mediactl_channel::Channel::spawn(
                control_reader,
                control_writer,
                notifications.clone(),
            ),
            payload_channel: mediactl_channel::PayloadChannel::spawn(
                payload_reader,
                payload_writer,
                mediactl_channel::NotificationRouter::new(),
            ),
            bus: crate::bus::ObserverBus::new(),
        };
        Router::new(
            RouterInternal {
                router_id: "r1".to_string(),
            },
            RtpCapabilities::default(),
            AppData::new(),
            context,
        )
    }

    #[tokio::test]
    async fn pipe_to_router_validates_arguments() {
        let router = test_router();

        let mut options = PipeToRouterOptions::producer("p1", router.clone());
        options.producer_id = None;
        let err = router.pipe_to_router(options).await.unwrap_err();
        assert_eq!(err.to_string(), "missing producerId or dataProducerId");

        let mut options = PipeToRouterOptions::producer("p1", router.clone());
        options.data_producer_id = Some("d1".to_string());
        let err = router.pipe_to_router(options).await.unwrap_err();
        assert_eq!(err.to_string(), "just producerId or dataProducerId can be given");

        let err = router
            .pipe_to_router(PipeToRouterOptions::producer("p1", router.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot use this Router as destination");
    }

    #[tokio::test]
    async fn can_consume_unknown_producer_is_false() {
        let router = test_router();
        assert!(!router.can_consume("missing", &RtpCapabilities::default()));
    }

    #[tokio::test]
    async fn closed_router_rejects_creation() {
        let router = test_router();
        router.close();
        assert!(router.closed());
        let err = router
            .create_direct_transport(DirectTransportOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }
}
