//! RTP and SCTP capability negotiation.
//!
//! Pure value-type functions used by routers to decide which codecs a
//! producer may send, how its stream is rewritten inside the router and
//! what each consumer receives:
//!
//! - [`generate_router_rtp_capabilities`] builds a router's capabilities
//!   from requested media codecs.
//! - [`get_producer_rtp_parameters_mapping`] and
//!   [`get_consumable_rtp_parameters`] turn producer parameters into the
//!   router-side consumable form.
//! - [`can_consume`], [`get_consumer_rtp_parameters`] and
//!   [`get_pipe_consumer_rtp_parameters`] derive consumer parameters.

pub mod error;
pub mod h264_profile;
pub mod negotiation;
pub mod rtp_parameters;
pub mod scalability_modes;
pub mod sctp_parameters;
pub mod srtp_parameters;
pub mod supported_rtp_capabilities;
pub mod validation;

pub use error::{OrtcError, Result};
pub use negotiation::{
    can_consume, generate_random_ssrc, generate_router_rtp_capabilities,
    get_consumable_rtp_parameters, get_consumer_rtp_parameters,
    get_pipe_consumer_rtp_parameters, get_producer_rtp_parameters_mapping,
    DYNAMIC_PAYLOAD_TYPES,
};
pub use rtp_parameters::{
    CodecDescription, MediaKind, ParameterValue, RtcpFeedback, RtcpParameters, RtpCapabilities,
    RtpCodecCapability, RtpCodecParameters, RtpCodecParametersParameters, RtpEncodingParameters,
    RtpEncodingParametersRtx, RtpHeaderExtension, RtpHeaderExtensionDirection,
    RtpHeaderExtensionParameters, RtpMapping, RtpMappingCodec, RtpMappingEncoding, RtpParameters,
};
pub use scalability_modes::{parse_scalability_mode, ScalabilityMode};
pub use sctp_parameters::{NumSctpStreams, SctpCapabilities, SctpParameters, SctpStreamParameters};
pub use srtp_parameters::{SrtpCryptoSuite, SrtpParameters};
pub use supported_rtp_capabilities::supported_rtp_capabilities;
pub use validation::*;
