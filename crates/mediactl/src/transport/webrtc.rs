//! Transport towards a WebRTC endpoint: ICE plus DTLS, optionally SCTP.

use std::fmt;
use std::ops::Deref;

use mediactl_ortc::{NumSctpStreams, SctpParameters};
use serde::{Deserialize, Serialize};

use super::{Transport, TransportData};
use crate::data_structures::{
    AppData, DtlsParameters, DtlsRole, DtlsState, IceCandidate, IceParameters, IceRole, IceState,
    ListenIp, SctpState, TransportTuple,
};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct WebRtcTransportOptions {
    /// Addresses to gather ICE candidates on, in priority order.
    pub listen_ips: Vec<ListenIp>,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,
    pub prefer_tcp: bool,
    /// Bits per second before bandwidth estimation kicks in.
    pub initial_available_outgoing_bitrate: u32,
    pub enable_sctp: bool,
    pub num_sctp_streams: NumSctpStreams,
    pub max_sctp_message_size: u32,
    pub sctp_send_buffer_size: u32,
    pub app_data: AppData,
}

impl WebRtcTransportOptions {
    pub fn new(listen_ips: Vec<ListenIp>) -> Self {
        Self {
            listen_ips,
            enable_udp: true,
            enable_tcp: false,
            prefer_udp: false,
            prefer_tcp: false,
            initial_available_outgoing_bitrate: 600_000,
            enable_sctp: false,
            num_sctp_streams: NumSctpStreams::default(),
            max_sctp_message_size: 262_144,
            sctp_send_buffer_size: 262_144,
            app_data: AppData::new(),
        }
    }

    pub(crate) fn request(&self) -> Result<WebRtcTransportRequest<'_>> {
        if self.listen_ips.is_empty() {
            return Err(Error::Validation("missing listenIps".to_string()));
        }
        Ok(WebRtcTransportRequest {
            listen_ips: &self.listen_ips,
            enable_udp: self.enable_udp,
            enable_tcp: self.enable_tcp,
            prefer_udp: self.prefer_udp,
            prefer_tcp: self.prefer_tcp,
            initial_available_outgoing_bitrate: self.initial_available_outgoing_bitrate,
            enable_sctp: self.enable_sctp,
            num_sctp_streams: self.num_sctp_streams,
            max_sctp_message_size: self.max_sctp_message_size,
            sctp_send_buffer_size: self.sctp_send_buffer_size,
            is_data_channel: true,
        })
    }
}

/// Body of `router.createWebRtcTransport`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WebRtcTransportRequest<'a> {
    listen_ips: &'a [ListenIp],
    enable_udp: bool,
    enable_tcp: bool,
    prefer_udp: bool,
    prefer_tcp: bool,
    initial_available_outgoing_bitrate: u32,
    enable_sctp: bool,
    num_sctp_streams: NumSctpStreams,
    max_sctp_message_size: u32,
    sctp_send_buffer_size: u32,
    is_data_channel: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WebRtcTransportData {
    pub(crate) ice_role: IceRole,
    pub(crate) ice_parameters: IceParameters,
    #[serde(default)]
    pub(crate) ice_candidates: Vec<IceCandidate>,
    pub(crate) ice_state: IceState,
    #[serde(default)]
    pub(crate) ice_selected_tuple: Option<TransportTuple>,
    pub(crate) dtls_parameters: DtlsParameters,
    pub(crate) dtls_state: DtlsState,
    #[serde(default)]
    pub(crate) dtls_remote_cert: Option<String>,
    #[serde(default)]
    pub(crate) sctp_parameters: Option<SctpParameters>,
    #[serde(default)]
    pub(crate) sctp_state: Option<SctpState>,
}

/// Transport towards a WebRTC endpoint. Derefs to [`Transport`].
#[derive(Clone)]
pub struct WebRtcTransport {
    transport: Transport,
}

impl WebRtcTransport {
    pub(crate) fn new(transport: Transport) -> Self {
        Self { transport }
    }

    fn data<R>(&self, f: impl FnOnce(&mut WebRtcTransportData) -> R) -> Option<R> {
        self.transport.with_data(|data| match data {
            TransportData::WebRtc(data) => Some(f(data)),
            _ => None,
        })
    }

    pub fn ice_role(&self) -> Option<IceRole> {
        self.data(|data| data.ice_role)
    }

    pub fn ice_parameters(&self) -> Option<IceParameters> {
        self.data(|data| data.ice_parameters.clone())
    }

    pub fn ice_candidates(&self) -> Vec<IceCandidate> {
        self.data(|data| data.ice_candidates.clone())
            .unwrap_or_default()
    }

    pub fn ice_state(&self) -> Option<IceState> {
        self.data(|data| data.ice_state)
    }

    pub fn ice_selected_tuple(&self) -> Option<TransportTuple> {
        self.data(|data| data.ice_selected_tuple.clone()).flatten()
    }

    pub fn dtls_parameters(&self) -> Option<DtlsParameters> {
        self.data(|data| data.dtls_parameters.clone())
    }

    pub fn dtls_state(&self) -> Option<DtlsState> {
        self.data(|data| data.dtls_state)
    }

    /// Remote certificate in PEM, once DTLS connected.
    pub fn dtls_remote_cert(&self) -> Option<String> {
        self.data(|data| data.dtls_remote_cert.clone()).flatten()
    }

    /// Hand the remote DTLS parameters to the engine. The local role is
    /// whatever the engine picked in response.
    pub async fn connect(&self, dtls_parameters: DtlsParameters) -> Result<()> {
        tracing::debug!(transport_id = %self.id(), "connect()");

        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Data {
            dtls_parameters: DtlsParameters,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Response {
            dtls_local_role: DtlsRole,
        }

        let response: Response = self
            .transport
            .request("transport.connect", Data { dtls_parameters })
            .await?;
        self.data(|data| data.dtls_parameters.role = response.dtls_local_role);
        Ok(())
    }

    /// Generate new ICE credentials.
    pub async fn restart_ice(&self) -> Result<IceParameters> {
        tracing::debug!(transport_id = %self.id(), "restart_ice()");

        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Response {
            ice_parameters: IceParameters,
        }

        let Response { ice_parameters } =
            self.transport.request("transport.restartIce", ()).await?;
        self.data(|data| data.ice_parameters = ice_parameters.clone());
        Ok(ice_parameters)
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }
}

impl Deref for WebRtcTransport {
    type Target = Transport;

    fn deref(&self) -> &Transport {
        &self.transport
    }
}

impl fmt::Debug for WebRtcTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebRtcTransport")
            .field("id", &self.id())
            .field("ice_state", &self.ice_state())
            .field("dtls_state", &self.dtls_state())
            .field("closed", &self.closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_and_request_shape() {
        let options = WebRtcTransportOptions::new(vec![ListenIp::new(IpAddr::V4(Ipv4Addr::LOCALHOST))]);
        let request = serde_json::to_value(options.request().unwrap()).unwrap();
        assert_eq!(request["enableUdp"], json!(true));
        assert_eq!(request["enableTcp"], json!(false));
        assert_eq!(request["initialAvailableOutgoingBitrate"], json!(600_000));
        assert_eq!(request["numSctpStreams"], json!({ "OS": 1024, "MIS": 1024 }));
        assert_eq!(request["maxSctpMessageSize"], json!(262_144));
        assert_eq!(request["isDataChannel"], json!(true));
        assert_eq!(request["listenIps"], json!([{ "ip": "127.0.0.1" }]));
    }

    #[test]
    fn empty_listen_ips_are_rejected() {
        let err = WebRtcTransportOptions::new(Vec::new()).request().unwrap_err();
        assert!(matches!(err, Error::Validation(ref reason) if reason == "missing listenIps"));
    }

    #[test]
    fn data_decodes_without_optional_fields() {
        let data: WebRtcTransportData = serde_json::from_value(json!({
            "iceRole": "controlled",
            "iceParameters": { "usernameFragment": "u", "password": "p", "iceLite": true },
            "iceCandidates": [],
            "iceState": "new",
            "dtlsParameters": { "role": "auto", "fingerprints": [] },
            "dtlsState": "new",
        }))
        .unwrap();
        assert_eq!(data.ice_role, IceRole::Controlled);
        assert!(data.sctp_parameters.is_none());
        assert!(data.ice_selected_tuple.is_none());
    }
}
