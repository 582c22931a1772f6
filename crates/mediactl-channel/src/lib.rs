//! Request/response correlation and notification routing for media engine
//! channels.
//!
//! A [`Channel`] carries JSON requests to the engine and its responses and
//! notifications back; a [`PayloadChannel`] does the same with a raw binary
//! frame attached to each message. Responses are matched to their requests by
//! id; notifications are delivered to whoever subscribed to their `targetId`.

pub mod channel;
pub mod correlator;
pub mod error;
pub mod message;
pub mod notification;
pub mod ordering;
pub mod payload_channel;

pub use channel::{Channel, ChannelConfig, CLOSE_GRACE};
pub use correlator::{PendingRequests, RequestIdGenerator};
pub use error::{ChannelError, RejectionKind, Result};
pub use message::{Incoming, Notification, Outcome};
pub use notification::{NotificationHandler, NotificationRouter, Subscription};
pub use ordering::{DispatchGate, DispatchGuard};
pub use payload_channel::PayloadChannel;
