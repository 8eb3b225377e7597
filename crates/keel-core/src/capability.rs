//! Gateway capability bitmask and capability-expression parsing.
//!
//! A gateway is granted a bitmask of capabilities when its certificate is
//! issued. Operators express the grant as a raw integer, a named alias, or a
//! `|`-joined list of flag names; unknown tokens fail the transition.

use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// Capability flags a gateway may be granted within a volume.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GatewayCaps: u32 {
        /// Read file data.
        const READ_DATA = 0x01;
        /// Write file data.
        const WRITE_DATA = 0x02;
        /// Read filesystem metadata.
        const READ_METADATA = 0x04;
        /// Write filesystem metadata.
        const WRITE_METADATA = 0x08;
        /// Coordinate writes for files it owns.
        const COORDINATE = 0x10;
    }
}

/// Errors produced while parsing a capability expression.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CapabilityError {
    /// A flag name in a `|`-joined list is unknown.
    #[error("unknown gateway capability '{token}'")]
    UnknownFlag {
        /// The rejected token.
        token: String,
    },

    /// The expression was empty.
    #[error("empty capability expression")]
    Empty,
}

/// Named flag tokens accepted in `|`-joined capability lists.
const FLAG_TOKENS: &[(&str, GatewayCaps)] = &[
    ("GATEWAY_CAP_READ_DATA", GatewayCaps::READ_DATA),
    ("GATEWAY_CAP_WRITE_DATA", GatewayCaps::WRITE_DATA),
    ("GATEWAY_CAP_READ_METADATA", GatewayCaps::READ_METADATA),
    ("GATEWAY_CAP_WRITE_METADATA", GatewayCaps::WRITE_METADATA),
    ("GATEWAY_CAP_COORDINATE", GatewayCaps::COORDINATE),
];

/// Parses a capability expression into a bitmask.
///
/// Accepted forms:
/// - a raw integer (`"3"`), taken as the mask verbatim;
/// - an alias: `ALL`, `NONE` (recommended for replica gateways),
///   `READWRITE_METADATA` (recommended for acquisition gateways),
///   `READWRITE`, `READONLY`;
/// - a `|`-joined list of `GATEWAY_CAP_*` flag names.
///
/// # Errors
///
/// Returns [`CapabilityError::UnknownFlag`] for an unrecognized flag or
/// alias, or [`CapabilityError::Empty`] for an empty expression.
pub fn parse_caps(expression: &str) -> Result<GatewayCaps, CapabilityError> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Err(CapabilityError::Empty);
    }

    if let Ok(raw) = trimmed.parse::<u32>() {
        return Ok(GatewayCaps::from_bits_retain(raw));
    }

    let expanded = match trimmed {
        "ALL" => {
            "GATEWAY_CAP_READ_DATA|GATEWAY_CAP_WRITE_DATA|GATEWAY_CAP_READ_METADATA\
             |GATEWAY_CAP_WRITE_METADATA|GATEWAY_CAP_COORDINATE"
        },
        "NONE" => return Ok(GatewayCaps::empty()),
        "READWRITE_METADATA" => "GATEWAY_CAP_READ_METADATA|GATEWAY_CAP_WRITE_METADATA",
        "READWRITE" => {
            "GATEWAY_CAP_READ_DATA|GATEWAY_CAP_WRITE_DATA|GATEWAY_CAP_READ_METADATA\
             |GATEWAY_CAP_WRITE_METADATA"
        },
        "READONLY" => "GATEWAY_CAP_READ_DATA|GATEWAY_CAP_READ_METADATA",
        other => other,
    };

    let mut caps = GatewayCaps::empty();
    for token in expanded.split('|') {
        let token = token.trim();
        let flag = FLAG_TOKENS
            .iter()
            .find(|(name, _)| *name == token)
            .map(|(_, flag)| *flag)
            .ok_or_else(|| CapabilityError::UnknownFlag {
                token: token.to_string(),
            })?;
        caps |= flag;
    }
    Ok(caps)
}

/// Returns true when `new` grants any capability `old` does not.
#[must_use]
pub const fn caps_expanded(old: u32, new: u32) -> bool {
    (old | new) != old
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readwrite_alias_equals_joined_flags() {
        let alias = parse_caps("READWRITE").unwrap();
        let joined = parse_caps(
            "GATEWAY_CAP_READ_DATA|GATEWAY_CAP_WRITE_DATA|GATEWAY_CAP_READ_METADATA|GATEWAY_CAP_WRITE_METADATA",
        )
        .unwrap();
        assert_eq!(alias, joined);
    }

    #[test]
    fn aliases_resolve_to_expected_masks() {
        assert_eq!(parse_caps("NONE").unwrap(), GatewayCaps::empty());
        assert_eq!(parse_caps("ALL").unwrap(), GatewayCaps::all());
        assert_eq!(
            parse_caps("READONLY").unwrap(),
            GatewayCaps::READ_DATA | GatewayCaps::READ_METADATA
        );
        assert_eq!(
            parse_caps("READWRITE_METADATA").unwrap(),
            GatewayCaps::READ_METADATA | GatewayCaps::WRITE_METADATA
        );
    }

    #[test]
    fn raw_integers_are_taken_verbatim() {
        assert_eq!(
            parse_caps("3").unwrap(),
            GatewayCaps::READ_DATA | GatewayCaps::WRITE_DATA
        );
        assert_eq!(parse_caps("0").unwrap(), GatewayCaps::empty());
    }

    #[test]
    fn unknown_tokens_are_rejected() {
        assert_eq!(
            parse_caps("GATEWAY_CAP_FLY").unwrap_err(),
            CapabilityError::UnknownFlag {
                token: "GATEWAY_CAP_FLY".to_string()
            }
        );
        assert_eq!(
            parse_caps("EVERYTHING").unwrap_err(),
            CapabilityError::UnknownFlag {
                token: "EVERYTHING".to_string()
            }
        );
        assert_eq!(parse_caps("  ").unwrap_err(), CapabilityError::Empty);
    }

    #[test]
    fn expansion_detection() {
        let readonly = parse_caps("READONLY").unwrap().bits();
        let readwrite = parse_caps("READWRITE").unwrap().bits();
        assert!(caps_expanded(readonly, readwrite));
        assert!(!caps_expanded(readwrite, readonly));
        assert!(!caps_expanded(readonly, readonly));
    }
}
