//! Plain RTP transport for non-WebRTC endpoints, with optional SRTP.

use std::fmt;
use std::net::IpAddr;
use std::ops::Deref;

use mediactl_ortc::{NumSctpStreams, SctpParameters, SrtpCryptoSuite, SrtpParameters};
use serde::{Deserialize, Serialize};

use super::{Transport, TransportData};
use crate::data_structures::{AppData, ListenIp, SctpState, TransportTuple};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct PlainTransportOptions {
    pub listen_ip: ListenIp,
    /// Carry RTP and RTCP on the same port.
    pub rtcp_mux: bool,
    /// Learn the remote address from the first packet received.
    pub comedia: bool,
    pub enable_sctp: bool,
    pub num_sctp_streams: NumSctpStreams,
    pub max_sctp_message_size: u32,
    pub sctp_send_buffer_size: u32,
    pub enable_srtp: bool,
    pub srtp_crypto_suite: SrtpCryptoSuite,
    pub app_data: AppData,
}

impl PlainTransportOptions {
    pub fn new(listen_ip: ListenIp) -> Self {
        Self {
            listen_ip,
            rtcp_mux: true,
            comedia: false,
            enable_sctp: false,
            num_sctp_streams: NumSctpStreams::default(),
            max_sctp_message_size: 262_144,
            sctp_send_buffer_size: 262_144,
            enable_srtp: false,
            srtp_crypto_suite: SrtpCryptoSuite::default(),
            app_data: AppData::new(),
        }
    }

    pub(crate) fn request(&self) -> PlainTransportRequest {
        PlainTransportRequest {
            listen_ip: self.listen_ip,
            rtcp_mux: self.rtcp_mux,
            comedia: self.comedia,
            enable_sctp: self.enable_sctp,
            num_sctp_streams: self.num_sctp_streams,
            max_sctp_message_size: self.max_sctp_message_size,
            sctp_send_buffer_size: self.sctp_send_buffer_size,
            is_data_channel: false,
            enable_srtp: self.enable_srtp,
            srtp_crypto_suite: self.srtp_crypto_suite,
        }
    }
}

/// Body of `router.createPlainTransport`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlainTransportRequest {
    listen_ip: ListenIp,
    rtcp_mux: bool,
    comedia: bool,
    enable_sctp: bool,
    num_sctp_streams: NumSctpStreams,
    max_sctp_message_size: u32,
    sctp_send_buffer_size: u32,
    is_data_channel: bool,
    enable_srtp: bool,
    srtp_crypto_suite: SrtpCryptoSuite,
}

/// Remote side of a plain transport. Fields left unset are learnt by the
/// engine (comedia) or not needed (rtcp-mux).
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlainTransportRemoteParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtcp_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub srtp_parameters: Option<SrtpParameters>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PlainTransportData {
    pub(crate) rtcp_mux: bool,
    pub(crate) comedia: bool,
    pub(crate) tuple: TransportTuple,
    #[serde(default)]
    pub(crate) rtcp_tuple: Option<TransportTuple>,
    #[serde(default)]
    pub(crate) sctp_parameters: Option<SctpParameters>,
    #[serde(default)]
    pub(crate) sctp_state: Option<SctpState>,
    #[serde(default)]
    pub(crate) srtp_parameters: Option<SrtpParameters>,
}

/// Plain RTP transport. Derefs to [`Transport`].
#[derive(Clone)]
pub struct PlainTransport {
    transport: Transport,
}

impl PlainTransport {
    pub(crate) fn new(transport: Transport) -> Self {
        Self { transport }
    }

    fn data<R>(&self, f: impl FnOnce(&mut PlainTransportData) -> R) -> Option<R> {
        self.transport.with_data(|data| match data {
            TransportData::Plain(data) => Some(f(data)),
            _ => None,
        })
    }

    pub fn rtcp_mux(&self) -> bool {
        self.data(|data| data.rtcp_mux).unwrap_or(true)
    }

    pub fn comedia(&self) -> bool {
        self.data(|data| data.comedia).unwrap_or(false)
    }

    pub fn tuple(&self) -> Option<TransportTuple> {
        self.data(|data| data.tuple.clone())
    }

    /// Separate RTCP address; `None` with rtcp-mux.
    pub fn rtcp_tuple(&self) -> Option<TransportTuple> {
        self.data(|data| data.rtcp_tuple.clone()).flatten()
    }

    /// Local SRTP keying, when SRTP is enabled.
    pub fn srtp_parameters(&self) -> Option<SrtpParameters> {
        self.data(|data| data.srtp_parameters.clone()).flatten()
    }

    pub async fn connect(&self, remote: PlainTransportRemoteParameters) -> Result<()> {
        tracing::debug!(transport_id = %self.id(), "connect()");

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Response {
            #[serde(default)]
            tuple: Option<TransportTuple>,
            #[serde(default)]
            rtcp_tuple: Option<TransportTuple>,
            #[serde(default)]
            srtp_parameters: Option<SrtpParameters>,
        }

        let response: Response = self.transport.request("transport.connect", remote).await?;
        self.data(|data| {
            if let Some(tuple) = response.tuple {
                data.tuple = tuple;
            }
            if response.rtcp_tuple.is_some() {
                data.rtcp_tuple = response.rtcp_tuple;
            }
            if response.srtp_parameters.is_some() {
                data.srtp_parameters = response.srtp_parameters;
            }
        });
        Ok(())
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }
}

impl Deref for PlainTransport {
    type Target = Transport;

    fn deref(&self) -> &Transport {
        &self.transport
    }
}

impl fmt::Debug for PlainTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainTransport")
            .field("id", &self.id())
            .field("tuple", &self.tuple())
            .field("closed", &self.closed())
            .finish()
    }
}
