//! Control-plane SDK for an out-of-process SFU media engine.
//!
//! mediactl drives a media engine over two framed pipes: a control channel
//! carrying JSON requests and notifications, and a payload channel that
//! pairs JSON headers with binary bodies. On top of that it keeps a typed
//! graph of the engine's resources and negotiates RTP capabilities.
//!
//! # Crate Structure
//!
//! - [`frame`]: length-prefixed framing of both pipes
//! - [`channel`]: request correlation and notification routing
//! - [`ortc`]: RTP/SCTP parameter types and capability negotiation
//! - [`worker`], [`router`], [`transport`], [`producer`], [`consumer`],
//!   [`data_producer`], [`data_consumer`], [`rtp_observer`]: the resource
//!   graph, rooted at a [`Worker`]
//! - [`logging`]: subscriber setup (requires `logging` feature)

/// Re-export frame types.
pub mod frame {
    pub use mediactl_frame::*;
}

/// Re-export channel types.
pub mod channel {
    pub use mediactl_channel::*;
}

/// Re-export RTP parameter types and negotiation.
pub mod ortc {
    pub use mediactl_ortc::*;
}

pub mod bus;
pub mod consumer;
mod context;
pub mod data_consumer;
pub mod data_producer;
pub mod data_structures;
pub mod error;
pub mod events;
pub mod exit;
#[cfg(feature = "logging")]
pub mod logging;
mod messages;
pub mod producer;
mod registry;
pub mod router;
pub mod rtp_observer;
pub mod settings;
pub mod transport;
pub mod worker;

pub use bus::{EntityKind, ObserverBus, ObserverEvent};
pub use consumer::{Consumer, ConsumerEvent, ConsumerOptions, WeakConsumer};
pub use data_consumer::{DataConsumer, DataConsumerEvent, DataConsumerOptions, WeakDataConsumer};
pub use data_producer::{
    DataProducer, DataProducerEvent, DataProducerOptions, DataProducerType, WeakDataProducer,
    WebRtcMessage,
};
pub use data_structures::{AppData, ListenIp};
pub use error::{Error, Result};
pub use events::HandlerId;
pub use exit::WorkerExit;
pub use producer::{Producer, ProducerEvent, ProducerOptions, WeakProducer};
pub use router::{PipeToRouterOptions, PipeToRouterResult, Router, RouterEvent, RouterOptions};
pub use rtp_observer::{
    ActiveSpeakerObserver, ActiveSpeakerObserverOptions, AudioLevelObserver,
    AudioLevelObserverOptions, RtpObserver, RtpObserverEvent,
};
pub use settings::{WorkerSettings, WorkerUpdateSettings};
pub use transport::{
    DirectTransport, DirectTransportOptions, PipeTransport, PipeTransportOptions, PlainTransport,
    PlainTransportOptions, Transport, TransportEvent, WebRtcTransport, WebRtcTransportOptions,
};
pub use worker::{Worker, WorkerEvent, WorkerResourceUsage};
