//! Capability negotiation between producers, routers and consumers.
//!
//! Every function here is pure apart from random SSRC generation: inputs are
//! borrowed and results are freshly built values.

use std::collections::VecDeque;

use rand::Rng;
use tracing::debug;

use crate::error::{unsupported, validation, Result};
use crate::h264_profile;
use crate::rtp_parameters::{
    CodecDescription, MediaKind, ParameterValue, RtcpFeedback, RtcpParameters, RtpCapabilities,
    RtpCodecCapability, RtpCodecParameters, RtpCodecParametersParameters, RtpEncodingParameters,
    RtpEncodingParametersRtx, RtpHeaderExtensionDirection, RtpHeaderExtensionParameters,
    RtpMapping, RtpMappingCodec, RtpMappingEncoding, RtpParameters,
};
use crate::scalability_modes::parse_scalability_mode;
use crate::supported_rtp_capabilities::{
    supported_rtp_capabilities, ABS_SEND_TIME_URI, MID_URI, TRANSPORT_WIDE_CC_URI,
};
use crate::validation::{validate_rtp_capabilities, validate_rtp_codec_capability};

/// Dynamic payload types handed out by the router, in allocation order.
pub const DYNAMIC_PAYLOAD_TYPES: [u8; 32] = [
    100, 101, 102, 103, 104, 105, 106, 107, 108, 109, 110, 111, 112, 113, 114, 115, 116, 117,
    118, 119, 120, 121, 122, 123, 124, 125, 126, 127, 96, 97, 98, 99,
];

/// Random SSRC in `[100000000, 999999999]`.
pub fn generate_random_ssrc() -> u32 {
    rand::thread_rng().gen_range(100_000_000..=999_999_999)
}

/// Outcome of a successful codec match for the H264 `profile-level-id`.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ProfileLevelIdAnswer {
    Unchanged,
    Set(String),
    Remove,
}

impl ProfileLevelIdAnswer {
    fn apply(self, params: &mut RtpCodecParametersParameters) {
        match self {
            ProfileLevelIdAnswer::Unchanged => {}
            ProfileLevelIdAnswer::Set(id) => {
                params.insert("profile-level-id".to_string(), ParameterValue::String(id));
            }
            ProfileLevelIdAnswer::Remove => {
                params.remove("profile-level-id");
            }
        }
    }
}

/// Compare two codecs. Payload types are never compared.
///
/// Non-strict matching checks MIME type, clock rate, channels and the
/// multiopus stream layout. Strict matching adds the H264 packetization
/// mode and profile rules and the VP9 profile. `a` plays the local side of
/// the H264 profile negotiation.
fn match_codecs<A, B>(a: &A, b: &B, strict: bool) -> Option<ProfileLevelIdAnswer>
where
    A: CodecDescription,
    B: CodecDescription,
{
    let mime_type = a.mime_type().to_lowercase();
    if mime_type != b.mime_type().to_lowercase()
        || a.clock_rate() != b.clock_rate()
        || a.channels() != b.channels()
    {
        return None;
    }

    match mime_type.as_str() {
        "audio/multiopus" => {
            for key in ["num_streams", "coupled_streams"] {
                if a.parameters().get(key) != b.parameters().get(key) {
                    return None;
                }
            }
        }
        "video/h264" | "video/h264-svc" if strict => {
            if param_or_zero(a.parameters(), "packetization-mode")
                != param_or_zero(b.parameters(), "packetization-mode")
            {
                return None;
            }
            if !h264_profile::is_same_profile(a.parameters(), b.parameters()) {
                return None;
            }
            return match h264_profile::generate_profile_level_id_for_answer(
                a.parameters(),
                b.parameters(),
            ) {
                Ok(Some(id)) => Some(ProfileLevelIdAnswer::Set(id)),
                Ok(None) => Some(ProfileLevelIdAnswer::Remove),
                Err(_) => None,
            };
        }
        "video/vp9" if strict => {
            if param_or_zero(a.parameters(), "profile-id")
                != param_or_zero(b.parameters(), "profile-id")
            {
                return None;
            }
        }
        _ => {}
    }

    Some(ProfileLevelIdAnswer::Unchanged)
}

/// Parameter value with absent and falsy values folded into `0`.
fn param_or_zero(params: &RtpCodecParametersParameters, key: &str) -> ParameterValue {
    match params.get(key) {
        Some(value) if !value.is_falsy() => value.clone(),
        _ => ParameterValue::Number(0),
    }
}

/// Build the router capabilities for the requested media codecs.
///
/// Each requested codec must match an entry of the supported table. Payload
/// types come from the requested codec, then the table, then the dynamic
/// pool. Every video codec gets a companion RTX codec from the pool.
pub fn generate_router_rtp_capabilities(
    media_codecs: &[RtpCodecCapability],
) -> Result<RtpCapabilities> {
    let supported = supported_rtp_capabilities();
    let mut dynamic_payload_types: VecDeque<u8> = DYNAMIC_PAYLOAD_TYPES.into_iter().collect();
    let mut caps = RtpCapabilities {
        codecs: Vec::new(),
        header_extensions: supported.header_extensions.clone(),
    };

    for media_codec in media_codecs {
        let mut media_codec = media_codec.clone();
        validate_rtp_codec_capability(&mut media_codec)?;

        let matched = supported
            .codecs
            .iter()
            .find(|supported_codec| match_codecs(&media_codec, *supported_codec, false).is_some())
            .ok_or_else(|| {
                unsupported(format!(
                    "media codec not supported [mimeType:{}]",
                    media_codec.mime_type
                ))
            })?;

        let mut codec = matched.clone();

        if let Some(pt) = media_codec.preferred_payload_type {
            codec.preferred_payload_type = Some(pt);
            dynamic_payload_types.retain(|dynamic| *dynamic != pt);
        } else if codec.preferred_payload_type.is_none() {
            let pt = dynamic_payload_types
                .pop_front()
                .ok_or_else(|| unsupported("cannot allocate more dynamic codec payload types"))?;
            codec.preferred_payload_type = Some(pt);
        }

        if caps
            .codecs
            .iter()
            .any(|c| c.preferred_payload_type == codec.preferred_payload_type)
        {
            return Err(validation("duplicated codec.preferredPayloadType"));
        }

        codec.parameters.extend(media_codec.parameters);

        let rtx = match (codec.kind, codec.preferred_payload_type) {
            (Some(MediaKind::Video), Some(apt)) => {
                let pt = dynamic_payload_types.pop_front().ok_or_else(|| {
                    unsupported("cannot allocate more dynamic codec payload types")
                })?;
                Some(RtpCodecCapability {
                    kind: codec.kind,
                    mime_type: "video/rtx".to_string(),
                    preferred_payload_type: Some(pt),
                    clock_rate: codec.clock_rate,
                    channels: None,
                    parameters: [("apt".to_string(), ParameterValue::from(apt))].into(),
                    rtcp_feedback: Vec::new(),
                })
            }
            _ => None,
        };

        caps.codecs.push(codec);
        caps.codecs.extend(rtx);
    }

    Ok(caps)
}

/// Map a producer's payload types and SSRCs onto the router's.
///
/// The producer's H264 `profile-level-id` parameters are rewritten in place
/// to the negotiated answer.
pub fn get_producer_rtp_parameters_mapping(
    params: &mut RtpParameters,
    caps: &RtpCapabilities,
) -> Result<RtpMapping> {
    // (producer codec index, router codec index), media codecs first.
    let mut pairs: Vec<(usize, usize)> = Vec::with_capacity(params.codecs.len());

    for (index, codec) in params.codecs.iter_mut().enumerate() {
        if codec.is_rtx() {
            continue;
        }
        let matched = caps
            .codecs
            .iter()
            .enumerate()
            .find_map(|(cap_index, cap_codec)| {
                match_codecs(&*codec, cap_codec, true).map(|answer| (cap_index, answer))
            });
        let Some((cap_index, answer)) = matched else {
            return Err(unsupported(format!(
                "unsupported codec [mimeType:{}, payloadType:{}]",
                codec.mime_type, codec.payload_type
            )));
        };
        answer.apply(&mut codec.parameters);
        pairs.push((index, cap_index));
    }

    for (index, codec) in params.codecs.iter().enumerate() {
        if !codec.is_rtx() {
            continue;
        }
        let apt = codec.apt();
        let media_index = params
            .codecs
            .iter()
            .position(|media| Some(u32::from(media.payload_type)) == apt)
            .ok_or_else(|| {
                validation(format!(
                    "missing media codec found for RTX PT {}",
                    codec.payload_type
                ))
            })?;
        let cap_media = pairs
            .iter()
            .find(|(producer_index, _)| *producer_index == media_index)
            .map(|(_, cap_index)| &caps.codecs[*cap_index])
            .ok_or_else(|| {
                validation(format!(
                    "missing media codec found for RTX PT {}",
                    codec.payload_type
                ))
            })?;
        let cap_media_pt = cap_media.preferred_payload_type.map(u32::from);
        let cap_rtx_index = caps
            .codecs
            .iter()
            .position(|cap_codec| cap_codec.is_rtx() && cap_codec.apt() == cap_media_pt)
            .ok_or_else(|| {
                unsupported(format!(
                    "no RTX codec for capability codec PT {}",
                    cap_media_pt.unwrap_or_default()
                ))
            })?;
        pairs.push((index, cap_rtx_index));
    }

    let mut codecs = Vec::with_capacity(pairs.len());
    for (index, cap_index) in pairs {
        let mapped_payload_type = caps.codecs[cap_index]
            .preferred_payload_type
            .ok_or_else(|| validation("router codec without preferredPayloadType"))?;
        codecs.push(RtpMappingCodec {
            payload_type: params.codecs[index].payload_type,
            mapped_payload_type,
        });
    }

    let base_ssrc = generate_random_ssrc();
    let encodings = params
        .encodings
        .iter()
        .zip(0u32..)
        .map(|(encoding, offset)| RtpMappingEncoding {
            ssrc: encoding.ssrc,
            rid: encoding.rid.clone(),
            scalability_mode: encoding.scalability_mode.clone(),
            mapped_ssrc: base_ssrc + offset,
        })
        .collect();

    Ok(RtpMapping { codecs, encodings })
}

/// Router-side form of a producer's parameters, shared by all its consumers.
pub fn get_consumable_rtp_parameters(
    kind: MediaKind,
    params: &RtpParameters,
    caps: &RtpCapabilities,
    mapping: &RtpMapping,
) -> Result<RtpParameters> {
    let mut consumable = RtpParameters::default();

    for codec in params.codecs.iter().filter(|c| !c.is_rtx()) {
        let mapped_pt = mapping
            .codecs
            .iter()
            .find(|entry| entry.payload_type == codec.payload_type)
            .map(|entry| entry.mapped_payload_type)
            .ok_or_else(|| {
                validation(format!("no mapping for codec PT {}", codec.payload_type))
            })?;
        let cap_codec = caps
            .codecs
            .iter()
            .find(|c| c.preferred_payload_type == Some(mapped_pt))
            .ok_or_else(|| validation(format!("no router codec with PT {mapped_pt}")))?;

        consumable.codecs.push(RtpCodecParameters {
            mime_type: cap_codec.mime_type.clone(),
            payload_type: mapped_pt,
            clock_rate: cap_codec.clock_rate,
            channels: cap_codec.channels,
            parameters: codec.parameters.clone(),
            rtcp_feedback: cap_codec.rtcp_feedback.clone(),
        });

        let cap_rtx = caps
            .codecs
            .iter()
            .find(|c| c.is_rtx() && c.apt() == Some(u32::from(mapped_pt)));
        if let Some(cap_rtx) = cap_rtx {
            if let Some(payload_type) = cap_rtx.preferred_payload_type {
                consumable.codecs.push(RtpCodecParameters {
                    mime_type: cap_rtx.mime_type.clone(),
                    payload_type,
                    clock_rate: cap_rtx.clock_rate,
                    channels: None,
                    parameters: cap_rtx.parameters.clone(),
                    rtcp_feedback: cap_rtx.rtcp_feedback.clone(),
                });
            }
        }
    }

    consumable.header_extensions = caps
        .header_extensions
        .iter()
        .filter(|ext| {
            ext.kind == kind
                && matches!(
                    ext.direction,
                    RtpHeaderExtensionDirection::SendRecv | RtpHeaderExtensionDirection::SendOnly
                )
        })
        .map(|ext| RtpHeaderExtensionParameters {
            uri: ext.uri.clone(),
            id: ext.preferred_id,
            encrypt: ext.preferred_encrypt,
            parameters: RtpCodecParametersParameters::new(),
        })
        .collect();

    for (index, encoding) in params.encodings.iter().enumerate() {
        let mapped = mapping
            .encodings
            .get(index)
            .ok_or_else(|| validation(format!("no mapping for encoding {index}")))?;
        consumable.encodings.push(RtpEncodingParameters {
            ssrc: Some(mapped.mapped_ssrc),
            rid: None,
            rtx: None,
            codec_payload_type: None,
            ..encoding.clone()
        });
    }

    consumable.rtcp = RtcpParameters {
        cname: params.rtcp.cname.clone(),
        reduced_size: true,
        mux: Some(true),
    };

    Ok(consumable)
}

/// Consumable codecs the remote side can receive, with orphaned RTX codecs
/// removed, and whether any RTX codec survived.
fn matching_consumer_codecs(
    consumable: &RtpParameters,
    caps: &RtpCapabilities,
) -> (Vec<RtpCodecParameters>, bool) {
    let mut codecs: Vec<RtpCodecParameters> = consumable
        .codecs
        .iter()
        .filter_map(|codec| {
            let cap_codec = caps
                .codecs
                .iter()
                .find(|cap_codec| match_codecs(*cap_codec, codec, true).is_some())?;
            Some(RtpCodecParameters {
                rtcp_feedback: cap_codec.rtcp_feedback.clone(),
                ..codec.clone()
            })
        })
        .collect();

    let media_pts: Vec<u32> = codecs
        .iter()
        .filter(|c| !c.is_rtx())
        .map(|c| u32::from(c.payload_type))
        .collect();
    codecs.retain(|codec| !codec.is_rtx() || codec.apt().is_some_and(|apt| media_pts.contains(&apt)));
    let rtx_supported = codecs.iter().any(|c| c.is_rtx());

    (codecs, rtx_supported)
}

fn has_media_codec(codecs: &[RtpCodecParameters]) -> bool {
    codecs.first().is_some_and(|first| !first.is_rtx())
}

/// Whether a remote endpoint with `caps` can consume the given parameters.
pub fn can_consume(consumable: &RtpParameters, caps: &RtpCapabilities) -> Result<bool> {
    let mut caps = caps.clone();
    validate_rtp_capabilities(&mut caps)?;

    let (codecs, _) = matching_consumer_codecs(consumable, &caps);
    let can = has_media_codec(&codecs);
    if !can {
        debug!("no consumable codec matches the remote capabilities");
    }
    Ok(can)
}

/// Parameters for a consumer of `consumable` on an endpoint with `caps`.
///
/// With `pipe` unset the consumer gets one encoding with a fresh SSRC;
/// simulcast sources are described through its scalability mode. With
/// `pipe` set every source encoding is kept.
pub fn get_consumer_rtp_parameters(
    consumable: &RtpParameters,
    caps: &RtpCapabilities,
    pipe: bool,
) -> Result<RtpParameters> {
    let mut caps = caps.clone();
    for codec in &mut caps.codecs {
        validate_rtp_codec_capability(codec)?;
    }

    let (mut codecs, rtx_supported) = matching_consumer_codecs(consumable, &caps);
    if !has_media_codec(&codecs) {
        return Err(unsupported("no compatible media codecs"));
    }

    let header_extensions: Vec<RtpHeaderExtensionParameters> = consumable
        .header_extensions
        .iter()
        .filter(|ext| {
            caps.header_extensions
                .iter()
                .any(|cap_ext| cap_ext.preferred_id == ext.id && cap_ext.uri == ext.uri)
        })
        .cloned()
        .collect();

    // Keep one congestion control feedback: transport-cc when its extension
    // survived, REMB with abs-send-time, neither otherwise.
    let has_extension = |uri: &str| header_extensions.iter().any(|ext| ext.uri == uri);
    let dropped: &[&str] = if has_extension(TRANSPORT_WIDE_CC_URI) {
        &["goog-remb"]
    } else if has_extension(ABS_SEND_TIME_URI) {
        &["transport-cc"]
    } else {
        &["transport-cc", "goog-remb"]
    };
    for codec in &mut codecs {
        codec
            .rtcp_feedback
            .retain(|fb| !dropped.contains(&fb.r#type.as_str()));
    }

    let encodings = if pipe {
        sequential_encodings(&consumable.encodings, rtx_supported)
    } else {
        vec![single_consumer_encoding(&consumable.encodings, rtx_supported)]
    };

    Ok(RtpParameters {
        mid: None,
        codecs,
        header_extensions,
        encodings,
        rtcp: consumable.rtcp.clone(),
    })
}

fn single_consumer_encoding(
    source: &[RtpEncodingParameters],
    rtx_supported: bool,
) -> RtpEncodingParameters {
    let ssrc = generate_random_ssrc();
    let mut encoding = RtpEncodingParameters {
        ssrc: Some(ssrc),
        rtx: rtx_supported.then_some(RtpEncodingParametersRtx { ssrc: ssrc + 1 }),
        ..Default::default()
    };

    let mut scalability_mode = source
        .iter()
        .find_map(|e| e.scalability_mode.clone().filter(|mode| !mode.is_empty()));
    if source.len() > 1 {
        let temporal_layers = parse_scalability_mode(scalability_mode.as_deref()).temporal_layers;
        scalability_mode = Some(format!("S{}T{}", source.len(), temporal_layers));
    }
    encoding.scalability_mode = scalability_mode;

    let max_bitrate = source
        .iter()
        .filter_map(|e| e.max_bitrate)
        .max()
        .unwrap_or(0);
    if max_bitrate > 0 {
        encoding.max_bitrate = Some(max_bitrate);
    }

    encoding
}

/// Copies of `source` with SSRCs (and RTX SSRCs) counting up from two
/// random bases.
fn sequential_encodings(source: &[RtpEncodingParameters], rtx: bool) -> Vec<RtpEncodingParameters> {
    let base_ssrc = generate_random_ssrc();
    let base_rtx_ssrc = generate_random_ssrc();

    source
        .iter()
        .zip(0u32..)
        .map(|(encoding, offset)| RtpEncodingParameters {
            ssrc: Some(base_ssrc + offset),
            rtx: rtx.then_some(RtpEncodingParametersRtx {
                ssrc: base_rtx_ssrc + offset,
            }),
            ..encoding.clone()
        })
        .collect()
}

/// Parameters for the consumer side of a pipe transport.
///
/// Transport-level extensions (MID and bandwidth estimation) are removed and
/// feedback is reduced to PLI, FIR and, with RTX, generic NACK.
pub fn get_pipe_consumer_rtp_parameters(
    consumable: &RtpParameters,
    enable_rtx: bool,
) -> RtpParameters {
    let keep_feedback = |fb: &RtcpFeedback| {
        (fb.r#type == "nack" && fb.parameter == "pli")
            || (fb.r#type == "ccm" && fb.parameter == "fir")
            || (enable_rtx && fb.r#type == "nack" && fb.parameter.is_empty())
    };

    let codecs = consumable
        .codecs
        .iter()
        .filter(|codec| enable_rtx || !codec.is_rtx())
        .map(|codec| RtpCodecParameters {
            rtcp_feedback: codec
                .rtcp_feedback
                .iter()
                .filter(|fb| keep_feedback(fb))
                .cloned()
                .collect(),
            ..codec.clone()
        })
        .collect();

    let header_extensions = consumable
        .header_extensions
        .iter()
        .filter(|ext| {
            ext.uri != MID_URI && ext.uri != ABS_SEND_TIME_URI && ext.uri != TRANSPORT_WIDE_CC_URI
        })
        .cloned()
        .collect();

    RtpParameters {
        mid: None,
        codecs,
        header_extensions,
        encodings: sequential_encodings(&consumable.encodings, enable_rtx),
        rtcp: consumable.rtcp.clone(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::OrtcError;

    fn capability(value: serde_json::Value) -> RtpCodecCapability {
        serde_json::from_value(value).unwrap()
    }

    fn opus() -> RtpCodecCapability {
        capability(json!({ "kind": "audio", "mimeType": "audio/opus", "clockRate": 48000, "channels": 2 }))
    }

    fn vp8() -> RtpCodecCapability {
        capability(json!({ "kind": "video", "mimeType": "video/VP8", "clockRate": 90000 }))
    }

    fn h264() -> RtpCodecCapability {
        capability(json!({
            "kind": "video",
            "mimeType": "video/H264",
            "clockRate": 90000,
            "parameters": { "packetization-mode": 1, "profile-level-id": "42e01f" }
        }))
    }

    fn router_caps() -> RtpCapabilities {
        generate_router_rtp_capabilities(&[opus(), vp8(), h264()]).unwrap()
    }

    fn vp8_producer_params() -> RtpParameters {
        serde_json::from_value(json!({
            "mid": "0",
            "codecs": [{
                "mimeType": "video/VP8",
                "payloadType": 96,
                "clockRate": 90000,
                "rtcpFeedback": [{ "type": "nack" }, { "type": "nack", "parameter": "pli" }]
            }],
            "headerExtensions": [
                { "uri": MID_URI, "id": 1 },
                { "uri": TRANSPORT_WIDE_CC_URI, "id": 5 }
            ],
            "encodings": [{ "ssrc": 11111111 }],
            "rtcp": { "cname": "vp8-cname" }
        }))
        .unwrap()
    }

    fn consumable_for(params: &mut RtpParameters, kind: MediaKind) -> RtpParameters {
        let caps = router_caps();
        let mapping = get_producer_rtp_parameters_mapping(params, &caps).unwrap();
        get_consumable_rtp_parameters(kind, params, &caps, &mapping).unwrap()
    }

    #[test]
    fn router_capabilities_assign_payload_types() {
        let caps = router_caps();
        let summary: Vec<(&str, Option<u8>)> = caps
            .codecs
            .iter()
            .map(|c| (c.mime_type.as_str(), c.preferred_payload_type))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("audio/opus", Some(100)),
                ("video/VP8", Some(101)),
                ("video/rtx", Some(102)),
                ("video/H264", Some(103)),
                ("video/rtx", Some(104)),
            ]
        );
        assert_eq!(caps.codecs[2].apt(), Some(101));
        assert_eq!(caps.codecs[4].apt(), Some(103));
        // Requested parameters override the table's.
        assert_eq!(
            caps.codecs[3].parameters.get("level-asymmetry-allowed"),
            Some(&ParameterValue::Number(1))
        );
        assert_eq!(
            caps.codecs[3].parameters.get("profile-level-id"),
            Some(&ParameterValue::from("42e01f"))
        );
        assert_eq!(caps.header_extensions.len(), 15);
    }

    #[test]
    fn router_capabilities_are_deterministic() {
        assert_eq!(router_caps(), router_caps());
    }

    #[test]
    fn router_capabilities_honor_preferred_payload_type() {
        let mut codec = vp8();
        codec.preferred_payload_type = Some(100);
        let caps = generate_router_rtp_capabilities(&[codec, opus()]).unwrap();
        assert_eq!(caps.codecs[0].preferred_payload_type, Some(100));
        assert_eq!(caps.codecs[1].preferred_payload_type, Some(101));
        assert_eq!(caps.codecs[2].mime_type, "audio/opus");
        assert_eq!(caps.codecs[2].preferred_payload_type, Some(102));
    }

    #[test]
    fn router_capabilities_reject_duplicates() {
        let mut first = opus();
        first.preferred_payload_type = Some(111);
        let mut second = vp8();
        second.preferred_payload_type = Some(111);
        assert_eq!(
            generate_router_rtp_capabilities(&[first, second]),
            Err(OrtcError::Validation(
                "duplicated codec.preferredPayloadType".to_string()
            ))
        );

        // A dynamic type already handed out cannot be requested explicitly.
        let mut late = vp8();
        late.preferred_payload_type = Some(100);
        assert!(generate_router_rtp_capabilities(&[opus(), late]).is_err());
    }

    #[test]
    fn router_capabilities_reject_unknown_codec() {
        let codec = capability(json!({ "mimeType": "audio/chirp", "clockRate": 8000 }));
        assert_eq!(
            generate_router_rtp_capabilities(&[codec]),
            Err(OrtcError::Unsupported(
                "media codec not supported [mimeType:audio/chirp]".to_string()
            ))
        );
    }

    #[test]
    fn dynamic_pool_exhaustion_accounts_for_reservations() {
        let mut reserved = vp8();
        reserved.preferred_payload_type = Some(100);
        // One reservation leaves 31 slots: the reserved codec's RTX plus 15
        // more VP8/RTX pairs.
        let mut codecs = vec![reserved];
        codecs.extend(std::iter::repeat_with(vp8).take(15));
        let caps = generate_router_rtp_capabilities(&codecs).unwrap();
        assert_eq!(caps.codecs.len(), 32);

        codecs.push(opus());
        assert_eq!(
            generate_router_rtp_capabilities(&codecs),
            Err(OrtcError::Unsupported(
                "cannot allocate more dynamic codec payload types".to_string()
            ))
        );
    }

    #[test]
    fn producer_mapping_maps_payload_types_and_ssrcs() {
        let caps = router_caps();
        let mut params = vp8_producer_params();
        params.codecs.push(
            serde_json::from_value(json!({
                "mimeType": "video/rtx",
                "payloadType": 97,
                "clockRate": 90000,
                "parameters": { "apt": 96 }
            }))
            .unwrap(),
        );
        params.encodings.push(RtpEncodingParameters {
            ssrc: Some(22222222),
            ..Default::default()
        });

        let mapping = get_producer_rtp_parameters_mapping(&mut params, &caps).unwrap();
        assert_eq!(
            mapping.codecs,
            vec![
                RtpMappingCodec { payload_type: 96, mapped_payload_type: 101 },
                RtpMappingCodec { payload_type: 97, mapped_payload_type: 102 },
            ]
        );
        assert_eq!(mapping.encodings.len(), 2);
        assert_eq!(mapping.encodings[0].ssrc, Some(11111111));
        assert_eq!(
            mapping.encodings[1].mapped_ssrc,
            mapping.encodings[0].mapped_ssrc + 1
        );
        assert!((100_000_000..=999_999_999).contains(&mapping.encodings[0].mapped_ssrc));
    }

    #[test]
    fn producer_mapping_rejects_unsupported_codec() {
        let caps = router_caps();
        let mut params = vp8_producer_params();
        params.codecs[0].mime_type = "video/VP9".to_string();
        assert_eq!(
            get_producer_rtp_parameters_mapping(&mut params, &caps),
            Err(OrtcError::Unsupported(
                "unsupported codec [mimeType:video/VP9, payloadType:96]".to_string()
            ))
        );
    }

    #[test]
    fn producer_mapping_rejects_orphan_rtx() {
        let caps = router_caps();
        let mut params = vp8_producer_params();
        params.codecs.push(
            serde_json::from_value(json!({
                "mimeType": "video/rtx",
                "payloadType": 97,
                "clockRate": 90000,
                "parameters": { "apt": 120 }
            }))
            .unwrap(),
        );
        assert_eq!(
            get_producer_rtp_parameters_mapping(&mut params, &caps),
            Err(OrtcError::Validation(
                "missing media codec found for RTX PT 97".to_string()
            ))
        );
    }

    #[test]
    fn producer_mapping_negotiates_h264_profile() {
        let caps = router_caps();
        let mut params: RtpParameters = serde_json::from_value(json!({
            "codecs": [{
                "mimeType": "video/H264",
                "payloadType": 125,
                "clockRate": 90000,
                "parameters": {
                    "packetization-mode": 1,
                    "profile-level-id": "42e02a",
                    "level-asymmetry-allowed": 1
                }
            }],
            "encodings": [{ "ssrc": 1234 }]
        }))
        .unwrap();

        let mapping = get_producer_rtp_parameters_mapping(&mut params, &caps).unwrap();
        assert_eq!(mapping.codecs[0].mapped_payload_type, 103);
        assert_eq!(
            params.codecs[0].parameters.get("profile-level-id"),
            Some(&ParameterValue::from("42e02a"))
        );

        // Without level asymmetry the lower level wins.
        params.codecs[0].parameters.remove("level-asymmetry-allowed");
        get_producer_rtp_parameters_mapping(&mut params, &caps).unwrap();
        assert_eq!(
            params.codecs[0].parameters.get("profile-level-id"),
            Some(&ParameterValue::from("42e01f"))
        );
    }

    #[test]
    fn h264_packetization_mode_must_match() {
        let caps = router_caps();
        let mut params: RtpParameters = serde_json::from_value(json!({
            "codecs": [{
                "mimeType": "video/H264",
                "payloadType": 125,
                "clockRate": 90000,
                "parameters": { "profile-level-id": "42e01f" }
            }],
            "encodings": [{ "ssrc": 1234 }]
        }))
        .unwrap();
        assert!(matches!(
            get_producer_rtp_parameters_mapping(&mut params, &caps),
            Err(OrtcError::Unsupported(_))
        ));
    }

    #[test]
    fn h264_svc_follows_h264_profile_rules() {
        let svc = |mode: u8, profile: &str| {
            capability(json!({
                "kind": "video",
                "mimeType": "video/H264-SVC",
                "clockRate": 90000,
                "parameters": { "packetization-mode": mode, "profile-level-id": profile }
            }))
        };

        assert!(match_codecs(&svc(1, "42e01f"), &svc(0, "42e01f"), true).is_none());
        assert!(match_codecs(&svc(1, "42e01f"), &svc(1, "640c1f"), true).is_none());
        assert!(match_codecs(&svc(1, "42e01f"), &svc(1, "42e01f"), true).is_some());
        // Non-strict matching ignores the H264 parameters.
        assert!(match_codecs(&svc(1, "42e01f"), &svc(0, "640c1f"), false).is_some());
    }

    #[test]
    fn consumable_parameters_use_router_view() {
        let mut params = vp8_producer_params();
        let consumable = consumable_for(&mut params, MediaKind::Video);

        assert_eq!(consumable.codecs.len(), 2);
        assert_eq!(consumable.codecs[0].payload_type, 101);
        assert_eq!(consumable.codecs[0].rtcp_feedback.len(), 5);
        assert_eq!(consumable.codecs[1].mime_type, "video/rtx");
        assert_eq!(consumable.codecs[1].apt(), Some(101));

        assert!(consumable
            .header_extensions
            .iter()
            .all(|ext| ext.uri != crate::supported_rtp_capabilities::RTP_STREAM_ID_URI));
        assert!(consumable.header_extensions.iter().any(|ext| ext.uri == MID_URI));

        assert_eq!(consumable.encodings.len(), 1);
        let encoding = &consumable.encodings[0];
        assert_ne!(encoding.ssrc, Some(11111111));
        assert!(encoding.rid.is_none() && encoding.rtx.is_none());

        assert_eq!(consumable.rtcp.cname.as_deref(), Some("vp8-cname"));
        assert!(consumable.rtcp.reduced_size);
        assert_eq!(consumable.rtcp.mux, Some(true));
    }

    #[test]
    fn consumer_without_rtx_support_gets_single_plain_encoding() {
        let mut params = vp8_producer_params();
        let consumable = consumable_for(&mut params, MediaKind::Video);
        let remote: RtpCapabilities = serde_json::from_value(json!({
            "codecs": [{
                "kind": "video",
                "mimeType": "video/VP8",
                "clockRate": 90000,
                "rtcpFeedback": [{ "type": "nack" }, { "type": "transport-cc" }, { "type": "goog-remb" }]
            }],
            "headerExtensions": [
                { "kind": "video", "uri": TRANSPORT_WIDE_CC_URI, "preferredId": 5 }
            ]
        }))
        .unwrap();

        assert!(can_consume(&consumable, &remote).unwrap());
        let consumer = get_consumer_rtp_parameters(&consumable, &remote, false).unwrap();

        assert_eq!(consumer.codecs.len(), 1);
        assert_eq!(consumer.codecs[0].mime_type, "video/VP8");
        assert_eq!(
            consumer.codecs[0].rtcp_feedback,
            vec![RtcpFeedback::new("nack", ""), RtcpFeedback::new("transport-cc", "")]
        );
        assert_eq!(consumer.header_extensions.len(), 1);
        assert_eq!(consumer.encodings.len(), 1);
        let encoding = &consumer.encodings[0];
        assert!(encoding.ssrc.is_some());
        assert_ne!(encoding.ssrc, consumable.encodings[0].ssrc);
        assert!(encoding.rtx.is_none());
    }

    #[test]
    fn consumer_with_rtx_and_simulcast() {
        let mut params = vp8_producer_params();
        params.encodings = (0..3)
            .map(|i| RtpEncodingParameters {
                rid: Some(format!("r{i}")),
                scalability_mode: Some("L1T3".to_string()),
                max_bitrate: Some(100_000 * (i + 1)),
                ..Default::default()
            })
            .collect();
        let consumable = consumable_for(&mut params, MediaKind::Video);

        let mut remote = router_caps();
        remote.header_extensions.retain(|ext| ext.uri == ABS_SEND_TIME_URI);
        let consumer = get_consumer_rtp_parameters(&consumable, &remote, false).unwrap();

        assert_eq!(consumer.codecs.len(), 2);
        assert!(consumer.codecs[0]
            .rtcp_feedback
            .iter()
            .all(|fb| fb.r#type != "transport-cc"));
        assert!(consumer.codecs[0]
            .rtcp_feedback
            .iter()
            .any(|fb| fb.r#type == "goog-remb"));

        let encoding = &consumer.encodings[0];
        let ssrc = encoding.ssrc.unwrap();
        assert_eq!(encoding.rtx, Some(RtpEncodingParametersRtx { ssrc: ssrc + 1 }));
        assert_eq!(encoding.scalability_mode.as_deref(), Some("S3T3"));
        assert_eq!(encoding.max_bitrate, Some(300_000));
    }

    #[test]
    fn pipe_consumer_keeps_every_encoding() {
        let mut params = vp8_producer_params();
        params.encodings = (0..2)
            .map(|i| RtpEncodingParameters {
                rid: Some(format!("r{i}")),
                ..Default::default()
            })
            .collect();
        let consumable = consumable_for(&mut params, MediaKind::Video);

        let consumer = get_consumer_rtp_parameters(&consumable, &router_caps(), true).unwrap();
        assert_eq!(consumer.encodings.len(), 2);
        let base = consumer.encodings[0].ssrc.unwrap();
        assert_eq!(consumer.encodings[1].ssrc, Some(base + 1));
        let rtx_base = consumer.encodings[0].rtx.unwrap().ssrc;
        assert_eq!(consumer.encodings[1].rtx.unwrap().ssrc, rtx_base + 1);
    }

    #[test]
    fn pipe_consumer_parameters_strip_transport_features() {
        let mut params = vp8_producer_params();
        let consumable = consumable_for(&mut params, MediaKind::Video);

        let without_rtx = get_pipe_consumer_rtp_parameters(&consumable, false);
        assert_eq!(without_rtx.codecs.len(), 1);
        assert_eq!(
            without_rtx.codecs[0].rtcp_feedback,
            vec![RtcpFeedback::new("nack", "pli"), RtcpFeedback::new("ccm", "fir")]
        );
        assert!(without_rtx.header_extensions.iter().all(|ext| {
            ext.uri != MID_URI && ext.uri != ABS_SEND_TIME_URI && ext.uri != TRANSPORT_WIDE_CC_URI
        }));
        assert!(without_rtx.encodings[0].rtx.is_none());

        let with_rtx = get_pipe_consumer_rtp_parameters(&consumable, true);
        assert_eq!(with_rtx.codecs.len(), 2);
        assert_eq!(
            with_rtx.codecs[0].rtcp_feedback,
            vec![
                RtcpFeedback::new("nack", ""),
                RtcpFeedback::new("nack", "pli"),
                RtcpFeedback::new("ccm", "fir")
            ]
        );
        assert!(with_rtx.encodings[0].rtx.is_some());
    }

    #[test]
    fn can_consume_agrees_with_consumer_parameters() {
        let mut params = vp8_producer_params();
        let consumable = consumable_for(&mut params, MediaKind::Video);

        let candidates: Vec<RtpCapabilities> = vec![
            router_caps(),
            RtpCapabilities::default(),
            serde_json::from_value(json!({
                "codecs": [{ "mimeType": "video/rtx", "clockRate": 90000, "parameters": { "apt": 101 } }]
            }))
            .unwrap(),
            serde_json::from_value(json!({
                "codecs": [{ "mimeType": "video/VP8", "clockRate": 48000 }]
            }))
            .unwrap(),
            serde_json::from_value(json!({
                "codecs": [
                    { "mimeType": "video/rtx", "clockRate": 90000 },
                    { "mimeType": "video/vp8", "clockRate": 90000 }
                ]
            }))
            .unwrap(),
        ];

        for caps in &candidates {
            let can = can_consume(&consumable, caps).unwrap();
            let result = get_consumer_rtp_parameters(&consumable, caps, false);
            assert_eq!(can, result.is_ok(), "{caps:?}");
            if let Err(err) = result {
                assert_eq!(err, OrtcError::Unsupported("no compatible media codecs".to_string()));
            }
        }
    }

    #[test]
    fn multiopus_requires_same_layout() {
        let four = capability(json!({
            "mimeType": "audio/multiopus",
            "clockRate": 48000,
            "channels": 4,
            "parameters": { "num_streams": 2, "coupled_streams": 2 }
        }));
        assert!(generate_router_rtp_capabilities(&[four.clone()]).is_ok());

        let mut wrong = four;
        wrong
            .parameters
            .insert("coupled_streams".to_string(), ParameterValue::Number(1));
        assert!(matches!(
            generate_router_rtp_capabilities(&[wrong]),
            Err(OrtcError::Unsupported(_))
        ));
    }

    #[test]
    fn vp9_profile_must_match_strictly() {
        let vp9 = capability(json!({ "mimeType": "video/VP9", "clockRate": 90000 }));
        let caps = generate_router_rtp_capabilities(&[vp9]).unwrap();
        let mut params: RtpParameters = serde_json::from_value(json!({
            "codecs": [{
                "mimeType": "video/VP9",
                "payloadType": 98,
                "clockRate": 90000,
                "parameters": { "profile-id": 2 }
            }],
            "encodings": [{ "ssrc": 1 }]
        }))
        .unwrap();
        assert!(get_producer_rtp_parameters_mapping(&mut params, &caps).is_err());

        params.codecs[0]
            .parameters
            .insert("profile-id".to_string(), ParameterValue::Number(0));
        assert!(get_producer_rtp_parameters_mapping(&mut params, &caps).is_ok());
    }
}
