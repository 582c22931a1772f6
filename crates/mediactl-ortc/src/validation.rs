//! Shape checks and default filling for caller-supplied capabilities and
//! parameters.
//!
//! Each validator mutates its argument in place: structurally required
//! defaults are filled in and derived fields (codec `kind`) are set. Type
//! mismatches are already rejected by deserialization, so these functions
//! only enforce the rules the type system cannot express.

use crate::error::{validation, Result};
use crate::rtp_parameters::{
    CodecDescription, MediaKind, RtcpFeedback, RtcpParameters, RtpCapabilities,
    RtpCodecCapability, RtpCodecParameters, RtpEncodingParameters, RtpHeaderExtension,
    RtpHeaderExtensionParameters, RtpParameters,
};
use crate::sctp_parameters::{
    NumSctpStreams, SctpCapabilities, SctpParameters, SctpStreamParameters,
};

pub fn validate_rtp_capabilities(caps: &mut RtpCapabilities) -> Result<()> {
    for codec in &mut caps.codecs {
        validate_rtp_codec_capability(codec)?;
    }
    for ext in &mut caps.header_extensions {
        validate_rtp_header_extension(ext)?;
    }
    Ok(())
}

/// Validate a codec capability, deriving `kind` from the MIME type.
pub fn validate_rtp_codec_capability(codec: &mut RtpCodecCapability) -> Result<()> {
    let kind = kind_of(&codec.mime_type)?;
    codec.kind = Some(kind);
    codec.channels = normalized_channels(kind, codec.channels);
    check_apt(codec)?;
    for fb in &mut codec.rtcp_feedback {
        validate_rtcp_feedback(fb)?;
    }
    Ok(())
}

pub fn validate_rtcp_feedback(fb: &mut RtcpFeedback) -> Result<()> {
    if fb.r#type.is_empty() {
        return Err(validation("missing fb.type"));
    }
    Ok(())
}

pub fn validate_rtp_header_extension(ext: &mut RtpHeaderExtension) -> Result<()> {
    if ext.uri.is_empty() {
        return Err(validation("missing ext.uri"));
    }
    Ok(())
}

pub fn validate_rtp_parameters(params: &mut RtpParameters) -> Result<()> {
    if params.mid.as_deref() == Some("") {
        return Err(validation("params.mid is empty"));
    }
    for codec in &mut params.codecs {
        validate_rtp_codec_parameters(codec)?;
    }
    for ext in &mut params.header_extensions {
        validate_rtp_header_extension_parameters(ext)?;
    }
    for encoding in &mut params.encodings {
        validate_rtp_encoding_parameters(encoding)?;
    }
    validate_rtcp_parameters(&mut params.rtcp)
}

pub fn validate_rtp_codec_parameters(codec: &mut RtpCodecParameters) -> Result<()> {
    let kind = kind_of(&codec.mime_type)?;
    codec.channels = normalized_channels(kind, codec.channels);
    check_apt(codec)?;
    for fb in &mut codec.rtcp_feedback {
        validate_rtcp_feedback(fb)?;
    }
    Ok(())
}

pub fn validate_rtp_header_extension_parameters(
    ext: &mut RtpHeaderExtensionParameters,
) -> Result<()> {
    if ext.uri.is_empty() {
        return Err(validation("missing ext.uri"));
    }
    Ok(())
}

pub fn validate_rtp_encoding_parameters(encoding: &mut RtpEncodingParameters) -> Result<()> {
    if encoding.rid.as_deref() == Some("") {
        return Err(validation("invalid encoding.rid"));
    }
    if let Some(mode) = encoding.scalability_mode.as_deref() {
        if mode.is_empty() {
            return Err(validation("invalid encoding.scalabilityMode"));
        }
    }
    Ok(())
}

pub fn validate_rtcp_parameters(rtcp: &mut RtcpParameters) -> Result<()> {
    if rtcp.cname.as_deref() == Some("") {
        return Err(validation("invalid rtcp.cname"));
    }
    Ok(())
}

pub fn validate_sctp_capabilities(caps: &mut SctpCapabilities) -> Result<()> {
    validate_num_sctp_streams(&mut caps.num_streams)
}

pub fn validate_num_sctp_streams(streams: &mut NumSctpStreams) -> Result<()> {
    if streams.os == 0 {
        return Err(validation("invalid numStreams.OS"));
    }
    if streams.mis == 0 {
        return Err(validation("invalid numStreams.MIS"));
    }
    Ok(())
}

pub fn validate_sctp_parameters(params: &mut SctpParameters) -> Result<()> {
    if params.os == 0 {
        return Err(validation("invalid params.OS"));
    }
    if params.mis == 0 {
        return Err(validation("invalid params.MIS"));
    }
    if params.max_message_size == 0 {
        return Err(validation("invalid params.maxMessageSize"));
    }
    Ok(())
}

/// Validate stream reliability options and fill in `ordered`.
pub fn validate_sctp_stream_parameters(params: &mut SctpStreamParameters) -> Result<()> {
    let partially_reliable =
        params.max_packet_life_time.is_some() || params.max_retransmits.is_some();

    if params.max_packet_life_time.is_some() && params.max_retransmits.is_some() {
        return Err(validation(
            "cannot provide both maxPacketLifeTime and maxRetransmits",
        ));
    }

    match params.ordered {
        Some(true) if partially_reliable => Err(validation(
            "cannot be ordered with maxPacketLifeTime or maxRetransmits",
        )),
        Some(_) => Ok(()),
        None => {
            params.ordered = Some(!partially_reliable);
            Ok(())
        }
    }
}

fn kind_of(mime_type: &str) -> Result<MediaKind> {
    MediaKind::from_mime_type(mime_type).ok_or_else(|| validation("invalid codec.mimeType"))
}

fn normalized_channels(kind: MediaKind, channels: Option<u8>) -> Option<u8> {
    match kind {
        MediaKind::Audio => Some(channels.unwrap_or(1)),
        MediaKind::Video => None,
    }
}

fn check_apt<C: CodecDescription>(codec: &C) -> Result<()> {
    match codec.parameters().get("apt") {
        Some(value) if value.as_number().is_none() => {
            Err(validation("invalid codec apt parameter"))
        }
        _ => Ok(()),
    }
}
