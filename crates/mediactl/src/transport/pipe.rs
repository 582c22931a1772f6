//! Transport relaying media and data between two routers.

use std::fmt;
use std::net::IpAddr;
use std::ops::Deref;

use mediactl_ortc::{NumSctpStreams, SctpParameters, SrtpParameters};
use serde::{Deserialize, Serialize};

use super::{Transport, TransportData};
use crate::data_structures::{AppData, ListenIp, SctpState, TransportTuple};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct PipeTransportOptions {
    pub listen_ip: ListenIp,
    pub enable_sctp: bool,
    pub num_sctp_streams: NumSctpStreams,
    pub max_sctp_message_size: u32,
    pub sctp_send_buffer_size: u32,
    /// Offer RTX and NACK to consumers of this transport.
    pub enable_rtx: bool,
    pub enable_srtp: bool,
    pub app_data: AppData,
}

impl PipeTransportOptions {
    pub fn new(listen_ip: ListenIp) -> Self {
        Self {
            listen_ip,
            enable_sctp: false,
            num_sctp_streams: NumSctpStreams::default(),
            max_sctp_message_size: 268_435_456,
            sctp_send_buffer_size: 268_435_456,
            enable_rtx: false,
            enable_srtp: false,
            app_data: AppData::new(),
        }
    }

    pub(crate) fn request(&self) -> PipeTransportRequest {
        PipeTransportRequest {
            listen_ip: self.listen_ip,
            enable_sctp: self.enable_sctp,
            num_sctp_streams: self.num_sctp_streams,
            max_sctp_message_size: self.max_sctp_message_size,
            sctp_send_buffer_size: self.sctp_send_buffer_size,
            is_data_channel: false,
            enable_rtx: self.enable_rtx,
            enable_srtp: self.enable_srtp,
        }
    }
}

/// Body of `router.createPipeTransport`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PipeTransportRequest {
    listen_ip: ListenIp,
    enable_sctp: bool,
    num_sctp_streams: NumSctpStreams,
    max_sctp_message_size: u32,
    sctp_send_buffer_size: u32,
    is_data_channel: bool,
    enable_rtx: bool,
    enable_srtp: bool,
}

/// Address of the peer pipe transport.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipeTransportRemoteParameters {
    pub ip: IpAddr,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub srtp_parameters: Option<SrtpParameters>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PipeTransportData {
    pub(crate) tuple: TransportTuple,
    #[serde(default)]
    pub(crate) sctp_parameters: Option<SctpParameters>,
    #[serde(default)]
    pub(crate) sctp_state: Option<SctpState>,
    #[serde(default)]
    pub(crate) rtx: bool,
    #[serde(default)]
    pub(crate) srtp_parameters: Option<SrtpParameters>,
}

/// Pipe transport. Derefs to [`Transport`].
#[derive(Clone)]
pub struct PipeTransport {
    transport: Transport,
}

impl PipeTransport {
    pub(crate) fn new(transport: Transport) -> Self {
        Self { transport }
    }

    fn data<R>(&self, f: impl FnOnce(&mut PipeTransportData) -> R) -> Option<R> {
        self.transport.with_data(|data| match data {
            TransportData::Pipe(data) => Some(f(data)),
            _ => None,
        })
    }

    pub fn tuple(&self) -> Option<TransportTuple> {
        self.data(|data| data.tuple.clone())
    }

    pub fn rtx(&self) -> bool {
        self.data(|data| data.rtx).unwrap_or(false)
    }

    pub fn srtp_parameters(&self) -> Option<SrtpParameters> {
        self.data(|data| data.srtp_parameters.clone()).flatten()
    }

    pub async fn connect(&self, remote: PipeTransportRemoteParameters) -> Result<()> {
        tracing::debug!(transport_id = %self.id(), "connect()");

        #[derive(Deserialize)]
        struct Response {
            tuple: TransportTuple,
        }

        let Response { tuple } = self.transport.request("transport.connect", remote).await?;
        self.data(|data| data.tuple = tuple);
        Ok(())
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }
}

impl Deref for PipeTransport {
    type Target = Transport;

    fn deref(&self) -> &Transport {
        &self.transport
    }
}

impl fmt::Debug for PipeTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeTransport")
            .field("id", &self.id())
            .field("tuple", &self.tuple())
            .field("closed", &self.closed())
            .finish()
    }
}
