//! Codecs and header extensions the media engine can route.

use crate::rtp_parameters::{
    MediaKind, ParameterValue, RtcpFeedback, RtpCapabilities, RtpCodecCapability,
    RtpCodecParametersParameters, RtpHeaderExtension, RtpHeaderExtensionDirection,
};

pub const MID_URI: &str = "urn:ietf:params:rtp-hdrext:sdes:mid";
pub const RTP_STREAM_ID_URI: &str = "urn:ietf:params:rtp-hdrext:sdes:rtp-stream-id";
pub const REPAIRED_RTP_STREAM_ID_URI: &str =
    "urn:ietf:params:rtp-hdrext:sdes:repaired-rtp-stream-id";
pub const ABS_SEND_TIME_URI: &str = "http://www.webrtc.org/experiments/rtp-hdrext/abs-send-time";
pub const TRANSPORT_WIDE_CC_URI: &str =
    "http://www.ietf.org/id/draft-holmer-rmcat-transport-wide-cc-extensions-01";
pub const FRAME_MARKING_07_URI: &str =
    "http://tools.ietf.org/html/draft-ietf-avtext-framemarking-07";
pub const FRAME_MARKING_URI: &str = "urn:ietf:params:rtp-hdrext:framemarking";
pub const AUDIO_LEVEL_URI: &str = "urn:ietf:params:rtp-hdrext:ssrc-audio-level";
pub const VIDEO_ORIENTATION_URI: &str = "urn:3gpp:video-orientation";
pub const TOFFSET_URI: &str = "urn:ietf:params:rtp-hdrext:toffset";
pub const ABS_CAPTURE_TIME_URI: &str =
    "http://www.webrtc.org/experiments/rtp-hdrext/abs-capture-time";

fn params(entries: &[(&str, ParameterValue)]) -> RtpCodecParametersParameters {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

fn codec(
    kind: MediaKind,
    mime_type: &str,
    preferred_payload_type: Option<u8>,
    clock_rate: u32,
    channels: Option<u8>,
    parameters: RtpCodecParametersParameters,
    rtcp_feedback: Vec<RtcpFeedback>,
) -> RtpCodecCapability {
    RtpCodecCapability {
        kind: Some(kind),
        mime_type: mime_type.to_string(),
        preferred_payload_type,
        clock_rate,
        channels,
        parameters,
        rtcp_feedback,
    }
}

fn audio(mime_type: &str, pt: Option<u8>, clock_rate: u32, feedback: bool) -> RtpCodecCapability {
    let rtcp_feedback = if feedback {
        vec![RtcpFeedback::new("transport-cc", "")]
    } else {
        Vec::new()
    };
    codec(
        MediaKind::Audio,
        mime_type,
        pt,
        clock_rate,
        None,
        RtpCodecParametersParameters::new(),
        rtcp_feedback,
    )
}

fn multiopus(channels: u8, mapping: &str, streams: u32, coupled: u32) -> RtpCodecCapability {
    codec(
        MediaKind::Audio,
        "audio/multiopus",
        None,
        48000,
        Some(channels),
        params(&[
            ("channel_mapping", ParameterValue::from(mapping)),
            ("num_streams", ParameterValue::from(streams)),
            ("coupled_streams", ParameterValue::from(coupled)),
        ]),
        vec![RtcpFeedback::new("transport-cc", "")],
    )
}

fn video(mime_type: &str, parameters: RtpCodecParametersParameters) -> RtpCodecCapability {
    codec(
        MediaKind::Video,
        mime_type,
        None,
        90000,
        None,
        parameters,
        vec![
            RtcpFeedback::new("nack", ""),
            RtcpFeedback::new("nack", "pli"),
            RtcpFeedback::new("ccm", "fir"),
            RtcpFeedback::new("goog-remb", ""),
            RtcpFeedback::new("transport-cc", ""),
        ],
    )
}

fn ext(
    kind: MediaKind,
    uri: &str,
    preferred_id: u16,
    direction: RtpHeaderExtensionDirection,
) -> RtpHeaderExtension {
    RtpHeaderExtension {
        kind,
        uri: uri.to_string(),
        preferred_id,
        preferred_encrypt: false,
        direction,
    }
}

/// The engine's fixed capability table, in preference order.
pub fn supported_rtp_capabilities() -> RtpCapabilities {
    use MediaKind::{Audio, Video};
    use RtpHeaderExtensionDirection::{RecvOnly, SendRecv};

    let mut opus = audio("audio/opus", None, 48000, true);
    opus.channels = Some(2);

    let mut codecs = vec![
        opus,
        multiopus(4, "0,1,2,3", 2, 2),
        multiopus(6, "0,4,1,2,3,5", 4, 2),
        multiopus(8, "0,6,1,2,3,4,5,7", 5, 3),
        audio("audio/PCMU", Some(0), 8000, true),
        audio("audio/PCMA", Some(8), 8000, true),
        audio("audio/ISAC", None, 32000, true),
        audio("audio/ISAC", None, 16000, true),
        audio("audio/G722", Some(9), 8000, true),
        audio("audio/iLBC", None, 8000, true),
        audio("audio/SILK", None, 24000, true),
        audio("audio/SILK", None, 16000, true),
        audio("audio/SILK", None, 12000, true),
        audio("audio/SILK", None, 8000, true),
        audio("audio/CN", Some(13), 32000, false),
        audio("audio/CN", Some(13), 16000, false),
        audio("audio/CN", Some(13), 8000, false),
        audio("audio/telephone-event", None, 48000, false),
        audio("audio/telephone-event", None, 32000, false),
        audio("audio/telephone-event", None, 16000, false),
        audio("audio/telephone-event", None, 8000, false),
    ];
    codecs.extend([
        video("video/VP8", RtpCodecParametersParameters::new()),
        video("video/VP9", RtpCodecParametersParameters::new()),
        video(
            "video/H264",
            params(&[("level-asymmetry-allowed", ParameterValue::from(1u32))]),
        ),
        video(
            "video/H265",
            params(&[("level-asymmetry-allowed", ParameterValue::from(1u32))]),
        ),
    ]);

    let header_extensions = vec![
        ext(Audio, MID_URI, 1, SendRecv),
        ext(Video, MID_URI, 1, SendRecv),
        ext(Video, RTP_STREAM_ID_URI, 2, RecvOnly),
        ext(Video, REPAIRED_RTP_STREAM_ID_URI, 3, RecvOnly),
        ext(Audio, ABS_SEND_TIME_URI, 4, SendRecv),
        ext(Video, ABS_SEND_TIME_URI, 4, SendRecv),
        ext(Audio, TRANSPORT_WIDE_CC_URI, 5, RecvOnly),
        ext(Video, TRANSPORT_WIDE_CC_URI, 5, SendRecv),
        ext(Video, FRAME_MARKING_07_URI, 6, SendRecv),
        ext(Video, FRAME_MARKING_URI, 7, SendRecv),
        ext(Audio, AUDIO_LEVEL_URI, 10, SendRecv),
        ext(Video, VIDEO_ORIENTATION_URI, 11, SendRecv),
        ext(Video, TOFFSET_URI, 12, SendRecv),
        ext(Video, ABS_CAPTURE_TIME_URI, 13, SendRecv),
        ext(Audio, ABS_CAPTURE_TIME_URI, 13, SendRecv),
    ];

    RtpCapabilities {
        codecs,
        header_extensions,
    }
}
