//! In-process transport: media and data are injected and received through
//! the payload channel instead of the network.

use std::fmt;
use std::ops::Deref;

use bytes::Bytes;
use serde::Serialize;

use super::Transport;
use crate::data_structures::AppData;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct DirectTransportOptions {
    /// Largest message a data producer or consumer may carry.
    pub max_message_size: u32,
    pub app_data: AppData,
}

impl Default for DirectTransportOptions {
    fn default() -> Self {
        Self {
            max_message_size: 262_144,
            app_data: AppData::new(),
        }
    }
}

impl DirectTransportOptions {
    pub(crate) fn request(&self) -> DirectTransportRequest {
        DirectTransportRequest {
            direct: true,
            max_message_size: self.max_message_size,
        }
    }
}

/// Body of `router.createDirectTransport`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DirectTransportRequest {
    direct: bool,
    max_message_size: u32,
}

/// Direct transport. Derefs to [`Transport`]; bitrate limits are not
/// supported on it.
#[derive(Clone)]
pub struct DirectTransport {
    transport: Transport,
}

impl DirectTransport {
    pub(crate) fn new(transport: Transport) -> Self {
        Self { transport }
    }

    /// Inject an RTCP packet.
    pub fn send_rtcp(&self, rtcp_packet: impl Into<Bytes>) -> Result<()> {
        self.transport
            .payload_notify("transport.sendRtcp", rtcp_packet.into())
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }
}

impl Deref for DirectTransport {
    type Target = Transport;

    fn deref(&self) -> &Transport {
        &self.transport
    }
}

impl fmt::Debug for DirectTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectTransport")
            .field("id", &self.id())
            .field("closed", &self.closed())
            .finish()
    }
}
