/// Layer structure described by a scalability mode such as `L3T3_KEY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalabilityMode {
    pub spatial_layers: u8,
    pub temporal_layers: u8,
    pub ksvc: bool,
}

impl Default for ScalabilityMode {
    fn default() -> Self {
        Self {
            spatial_layers: 1,
            temporal_layers: 1,
            ksvc: false,
        }
    }
}

/// Parse `[LS]<spatial>T<temporal>[_KEY]`, with layer counts of 1 to 99.
/// Anything unparseable yields the single-layer default.
pub fn parse_scalability_mode(mode: Option<&str>) -> ScalabilityMode {
    mode.and_then(parse).unwrap_or_default()
}

fn parse(mode: &str) -> Option<ScalabilityMode> {
    let rest = mode.strip_prefix(['L', 'S'])?;
    let (spatial_layers, rest) = layer_count(rest)?;
    let rest = rest.strip_prefix('T')?;
    let (temporal_layers, rest) = layer_count(rest)?;

    Some(ScalabilityMode {
        spatial_layers,
        temporal_layers,
        ksvc: rest.starts_with("_KEY"),
    })
}

/// Leading `[1-9][0-9]?` and the remainder of the string.
fn layer_count(s: &str) -> Option<(u8, &str)> {
    let digits = s
        .bytes()
        .take(2)
        .take_while(u8::is_ascii_digit)
        .count();
    if digits == 0 || s.starts_with('0') {
        return None;
    }
    let value = s[..digits].parse().ok()?;
    Some((value, &s[digits..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(spatial_layers: u8, temporal_layers: u8, ksvc: bool) -> ScalabilityMode {
        ScalabilityMode {
            spatial_layers,
            temporal_layers,
            ksvc,
        }
    }

    #[test]
    fn parses_modes() {
        assert_eq!(parse_scalability_mode(Some("L1T3")), mode(1, 3, false));
        assert_eq!(parse_scalability_mode(Some("S3T3")), mode(3, 3, false));
        assert_eq!(parse_scalability_mode(Some("L3T2_KEY")), mode(3, 2, true));
        assert_eq!(parse_scalability_mode(Some("L10T12")), mode(10, 12, false));
        assert_eq!(parse_scalability_mode(Some("L2T3h")), mode(2, 3, false));
    }

    #[test]
    fn invalid_modes_default() {
        for invalid in ["", "T3", "L0T3", "L1T0", "X1T1", "L1", "LT1"] {
            assert_eq!(
                parse_scalability_mode(Some(invalid)),
                ScalabilityMode::default(),
                "{invalid}"
            );
        }
        assert_eq!(parse_scalability_mode(None), ScalabilityMode::default());
    }
}
