//! SCTP association and stream parameter types.

use serde::{Deserialize, Serialize};

/// Number of SCTP streams in each direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct NumSctpStreams {
    /// Outgoing streams (OS).
    pub os: u16,
    /// Maximum incoming streams (MIS).
    pub mis: u16,
}

impl Default for NumSctpStreams {
    fn default() -> Self {
        Self { os: 1024, mis: 1024 }
    }
}

/// SCTP capabilities of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SctpCapabilities {
    pub num_streams: NumSctpStreams,
}

/// SCTP association parameters of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SctpParameters {
    pub port: u16,
    #[serde(rename = "OS")]
    pub os: u16,
    #[serde(rename = "MIS")]
    pub mis: u16,
    pub max_message_size: u32,
}

/// Parameters of one SCTP stream carrying a data channel.
///
/// `ordered` stays `None` until validation fills in its default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SctpStreamParameters {
    pub stream_id: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordered: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_packet_life_time: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retransmits: Option<u16>,
}

impl SctpStreamParameters {
    /// Reliable ordered stream.
    pub fn new_ordered(stream_id: u16) -> Self {
        Self {
            stream_id,
            ordered: Some(true),
            ..Self::default()
        }
    }

    /// Whether the stream is ordered, treating an unset flag as ordered.
    pub fn is_ordered(&self) -> bool {
        self.ordered.unwrap_or(true)
    }
}
