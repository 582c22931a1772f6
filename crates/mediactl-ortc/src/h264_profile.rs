//! H264 `profile-level-id` parsing and offer/answer negotiation
//! (RFC 6184 section 8.1).

use std::fmt;

use crate::rtp_parameters::{ParameterValue, RtpCodecParametersParameters};

/// H264 profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    ConstrainedBaseline,
    Baseline,
    Main,
    ConstrainedHigh,
    High,
}

/// H264 level, `level_idc` times ten except for `1b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    L1b,
    L1,
    L1_1,
    L1_2,
    L1_3,
    L2,
    L2_1,
    L2_2,
    L3,
    L3_1,
    L3_2,
    L4,
    L4_1,
    L4_2,
    L5,
    L5_1,
    L5_2,
}

impl Level {
    fn idc(self) -> u8 {
        match self {
            Level::L1b => 0,
            Level::L1 => 10,
            Level::L1_1 => 11,
            Level::L1_2 => 12,
            Level::L1_3 => 13,
            Level::L2 => 20,
            Level::L2_1 => 21,
            Level::L2_2 => 22,
            Level::L3 => 30,
            Level::L3_1 => 31,
            Level::L3_2 => 32,
            Level::L4 => 40,
            Level::L4_1 => 41,
            Level::L4_2 => 42,
            Level::L5 => 50,
            Level::L5_1 => 51,
            Level::L5_2 => 52,
        }
    }

    fn from_idc(idc: u8) -> Option<Self> {
        let level = match idc {
            10 => Level::L1,
            11 => Level::L1_1,
            12 => Level::L1_2,
            13 => Level::L1_3,
            20 => Level::L2,
            21 => Level::L2_1,
            22 => Level::L2_2,
            30 => Level::L3,
            31 => Level::L3_1,
            32 => Level::L3_2,
            40 => Level::L4,
            41 => Level::L4_1,
            42 => Level::L4_2,
            50 => Level::L5,
            51 => Level::L5_1,
            52 => Level::L5_2,
            _ => return None,
        };
        Some(level)
    }

    /// Whether `self` is a lower level than `other`, with `1b` sitting
    /// between `1` and `1.1`.
    fn is_less_than(self, other: Level) -> bool {
        if self == Level::L1b {
            return other != Level::L1 && other != Level::L1b;
        }
        if other == Level::L1b {
            return self != Level::L1;
        }
        self.idc() < other.idc()
    }

    fn min(self, other: Level) -> Level {
        if self.is_less_than(other) {
            self
        } else {
            other
        }
    }
}

const CONSTRAINT_SET3_FLAG: u8 = 0x10;

/// `profile_iop` pattern of 8 characters, `0`, `1` or `x` (don't care).
struct BitPattern {
    mask: u8,
    masked_value: u8,
}

impl BitPattern {
    const fn new(pattern: &[u8; 8]) -> Self {
        let mut mask = 0u8;
        let mut masked_value = 0u8;
        let mut i = 0;
        while i < 8 {
            let bit = 1 << (7 - i);
            if pattern[i] != b'x' {
                mask |= bit;
            }
            if pattern[i] == b'1' {
                masked_value |= bit;
            }
            i += 1;
        }
        Self { mask, masked_value }
    }

    fn is_match(&self, value: u8) -> bool {
        value & self.mask == self.masked_value
    }
}

struct ProfilePattern {
    profile_idc: u8,
    profile_iop: BitPattern,
    profile: Profile,
}

const PROFILE_PATTERNS: [ProfilePattern; 8] = [
    ProfilePattern {
        profile_idc: 0x42,
        profile_iop: BitPattern::new(b"x1xx0000"),
        profile: Profile::ConstrainedBaseline,
    },
    ProfilePattern {
        profile_idc: 0x4D,
        profile_iop: BitPattern::new(b"1xxx0000"),
        profile: Profile::ConstrainedBaseline,
    },
    ProfilePattern {
        profile_idc: 0x58,
        profile_iop: BitPattern::new(b"11xx0000"),
        profile: Profile::ConstrainedBaseline,
    },
    ProfilePattern {
        profile_idc: 0x42,
        profile_iop: BitPattern::new(b"x0xx0000"),
        profile: Profile::Baseline,
    },
    ProfilePattern {
        profile_idc: 0x58,
        profile_iop: BitPattern::new(b"10xx0000"),
        profile: Profile::Baseline,
    },
    ProfilePattern {
        profile_idc: 0x4D,
        profile_iop: BitPattern::new(b"0x0x0000"),
        profile: Profile::Main,
    },
    ProfilePattern {
        profile_idc: 0x64,
        profile_iop: BitPattern::new(b"00000000"),
        profile: Profile::High,
    },
    ProfilePattern {
        profile_idc: 0x64,
        profile_iop: BitPattern::new(b"00001100"),
        profile: Profile::ConstrainedHigh,
    },
];

/// Parsed `profile-level-id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileLevelId {
    pub profile: Profile,
    pub level: Level,
}

/// Default when the `profile-level-id` parameter is absent.
pub const DEFAULT_PROFILE_LEVEL_ID: ProfileLevelId = ProfileLevelId {
    profile: Profile::ConstrainedBaseline,
    level: Level::L3_1,
};

impl ProfileLevelId {
    pub fn new(profile: Profile, level: Level) -> Self {
        Self { profile, level }
    }

    /// Parse a 6 hex digit `profile-level-id` string.
    pub fn parse(value: &str) -> Option<Self> {
        if value.len() != 6 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let numeric = u32::from_str_radix(value, 16).ok()?;
        if numeric == 0 {
            return None;
        }

        let level_idc = (numeric & 0xFF) as u8;
        let profile_iop = ((numeric >> 8) & 0xFF) as u8;
        let profile_idc = ((numeric >> 16) & 0xFF) as u8;

        let level = if level_idc == Level::L1_1.idc() {
            if profile_iop & CONSTRAINT_SET3_FLAG != 0 {
                Level::L1b
            } else {
                Level::L1_1
            }
        } else {
            Level::from_idc(level_idc)?
        };

        PROFILE_PATTERNS
            .iter()
            .find(|p| p.profile_idc == profile_idc && p.profile_iop.is_match(profile_iop))
            .map(|p| Self::new(p.profile, level))
    }

    /// Hex form of the profile and level. `None` for level 1b with a High
    /// profile, which has no encoding.
    pub fn to_hex(&self) -> Option<String> {
        if self.level == Level::L1b {
            // Level 1b is signalled through constraint_set3.
            return match self.profile {
                Profile::ConstrainedBaseline => Some("42f00b".to_string()),
                Profile::Baseline => Some("42100b".to_string()),
                Profile::Main => Some("4d100b".to_string()),
                Profile::ConstrainedHigh | Profile::High => None,
            };
        }
        let prefix = match self.profile {
            Profile::ConstrainedBaseline => "42e0",
            Profile::Baseline => "4200",
            Profile::Main => "4d00",
            Profile::ConstrainedHigh => "640c",
            Profile::High => "6400",
        };
        Some(format!("{prefix}{:02x}", self.level.idc()))
    }
}

impl fmt::Display for ProfileLevelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_hex() {
            Some(hex) => f.write_str(&hex),
            None => write!(f, "{:?}/{:?}", self.profile, self.level),
        }
    }
}

/// Errors when negotiating a `profile-level-id` answer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProfileError {
    #[error("invalid local_profile_level_id")]
    InvalidLocal,
    #[error("invalid remote_profile_level_id")]
    InvalidRemote,
    #[error("H264 Profile mismatch")]
    ProfileMismatch,
}

/// `profile-level-id` from SDP codec parameters, defaulting when absent.
/// Returns `None` when present but unparseable.
pub fn parse_sdp_profile_level_id(params: &RtpCodecParametersParameters) -> Option<ProfileLevelId> {
    match params.get("profile-level-id") {
        None => Some(DEFAULT_PROFILE_LEVEL_ID),
        Some(ParameterValue::String(value)) => ProfileLevelId::parse(value),
        Some(ParameterValue::Number(value)) => ProfileLevelId::parse(&value.to_string()),
    }
}

/// Whether both parameter sets parse to the same H264 profile.
pub fn is_same_profile(
    a: &RtpCodecParametersParameters,
    b: &RtpCodecParametersParameters,
) -> bool {
    match (parse_sdp_profile_level_id(a), parse_sdp_profile_level_id(b)) {
        (Some(a), Some(b)) => a.profile == b.profile,
        _ => false,
    }
}

/// The `profile-level-id` to put in an answer, or `None` when neither side
/// carries one.
pub fn generate_profile_level_id_for_answer(
    local_supported: &RtpCodecParametersParameters,
    remote_offered: &RtpCodecParametersParameters,
) -> Result<Option<String>, ProfileError> {
    if !local_supported.contains_key("profile-level-id")
        && !remote_offered.contains_key("profile-level-id")
    {
        return Ok(None);
    }

    let local = parse_sdp_profile_level_id(local_supported).ok_or(ProfileError::InvalidLocal)?;
    let remote = parse_sdp_profile_level_id(remote_offered).ok_or(ProfileError::InvalidRemote)?;

    if local.profile != remote.profile {
        return Err(ProfileError::ProfileMismatch);
    }

    let asymmetry_allowed =
        level_asymmetry_allowed(local_supported) && level_asymmetry_allowed(remote_offered);

    let answer_level = if asymmetry_allowed {
        local.level
    } else {
        local.level.min(remote.level)
    };

    ProfileLevelId::new(local.profile, answer_level)
        .to_hex()
        .map(Some)
        .ok_or(ProfileError::InvalidLocal)
}

fn level_asymmetry_allowed(params: &RtpCodecParametersParameters) -> bool {
    match params.get("level-asymmetry-allowed") {
        Some(ParameterValue::Number(1)) => true,
        Some(ParameterValue::String(value)) => value == "1",
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_profile(value: &str) -> RtpCodecParametersParameters {
        [(
            "profile-level-id".to_string(),
            ParameterValue::from(value),
        )]
        .into()
    }

    #[test]
    fn parse_known_profiles() {
        assert_eq!(
            ProfileLevelId::parse("42e01f"),
            Some(ProfileLevelId::new(Profile::ConstrainedBaseline, Level::L3_1))
        );
        assert_eq!(
            ProfileLevelId::parse("42001f"),
            Some(ProfileLevelId::new(Profile::Baseline, Level::L3_1))
        );
        assert_eq!(
            ProfileLevelId::parse("4d0032"),
            Some(ProfileLevelId::new(Profile::Main, Level::L5))
        );
        assert_eq!(
            ProfileLevelId::parse("640c2a"),
            Some(ProfileLevelId::new(Profile::ConstrainedHigh, Level::L4_2))
        );
        assert_eq!(
            ProfileLevelId::parse("640028"),
            Some(ProfileLevelId::new(Profile::High, Level::L4))
        );
    }

    #[test]
    fn parse_level_1b() {
        assert_eq!(
            ProfileLevelId::parse("42f00b"),
            Some(ProfileLevelId::new(Profile::ConstrainedBaseline, Level::L1b))
        );
        assert_eq!(
            ProfileLevelId::parse("42e00b"),
            Some(ProfileLevelId::new(Profile::ConstrainedBaseline, Level::L1_1))
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(ProfileLevelId::parse(""), None);
        assert_eq!(ProfileLevelId::parse("42e01"), None);
        assert_eq!(ProfileLevelId::parse("42e01fa"), None);
        assert_eq!(ProfileLevelId::parse("000000"), None);
        assert_eq!(ProfileLevelId::parse("42e0zz"), None);
        // Unknown level.
        assert_eq!(ProfileLevelId::parse("42e00e"), None);
        // Unknown profile_idc.
        assert_eq!(ProfileLevelId::parse("ff001f"), None);
    }

    #[test]
    fn display_round_trips() {
        for value in ["42e01f", "42001f", "4d0032", "640c2a", "640028", "42f00b", "42100b", "4d100b"]
        {
            let parsed = ProfileLevelId::parse(value).unwrap();
            assert_eq!(parsed.to_hex().as_deref(), Some(value));
        }
    }

    #[test]
    fn missing_parameter_uses_default() {
        assert_eq!(
            parse_sdp_profile_level_id(&RtpCodecParametersParameters::new()),
            Some(DEFAULT_PROFILE_LEVEL_ID)
        );
    }

    #[test]
    fn same_profile_ignores_level() {
        assert!(is_same_profile(&with_profile("42e01f"), &with_profile("42e00a")));
        assert!(!is_same_profile(&with_profile("42e01f"), &with_profile("640c1f")));
        assert!(!is_same_profile(&with_profile("42e01f"), &with_profile("bad")));
    }

    #[test]
    fn answer_without_any_profile() {
        let empty = RtpCodecParametersParameters::new();
        assert_eq!(generate_profile_level_id_for_answer(&empty, &empty), Ok(None));
    }

    #[test]
    fn answer_uses_lowest_level_without_asymmetry() {
        assert_eq!(
            generate_profile_level_id_for_answer(&with_profile("42e01f"), &with_profile("42e00e")),
            Err(ProfileError::InvalidRemote)
        );
        assert_eq!(
            generate_profile_level_id_for_answer(&with_profile("42e01f"), &with_profile("42e015")),
            Ok(Some("42e015".to_string()))
        );
        assert_eq!(
            generate_profile_level_id_for_answer(&with_profile("42e01f"), &with_profile("42e00b")),
            Ok(Some("42e00b".to_string()))
        );
        assert_eq!(
            generate_profile_level_id_for_answer(&with_profile("42e00d"), &with_profile("42f00b")),
            Ok(Some("42f00b".to_string()))
        );
    }

    #[test]
    fn answer_keeps_local_level_with_asymmetry() {
        let mut local = with_profile("42e01f");
        local.insert("level-asymmetry-allowed".to_string(), ParameterValue::from(1u32));
        let mut remote = with_profile("42e00b");
        remote.insert("level-asymmetry-allowed".to_string(), ParameterValue::from("1"));
        assert_eq!(
            generate_profile_level_id_for_answer(&local, &remote),
            Ok(Some("42e01f".to_string()))
        );
    }

    #[test]
    fn answer_rejects_profile_mismatch() {
        assert_eq!(
            generate_profile_level_id_for_answer(&with_profile("42e01f"), &with_profile("640c1f")),
            Err(ProfileError::ProfileMismatch)
        );
    }
}
