//! Target identifier classification and normalization.
//!
//! Raw identifier strings are classified into one of the accepted lexical forms
//! without touching the platform. Four concrete forms are recognized, plus two
//! symbolic words:
//!
//! - CoreSimulator UUID (`8-4-4-4-12` hex) -> simulator, normalized to uppercase
//! - Classic device UDID (40 hex digits) -> device, normalized to lowercase
//! - Modern device UDID (8 hex, `-`, 16 hex) -> device, normalized to uppercase
//! - ECID (`0x` followed by 1..=16 hex digits) -> device, normalized to lowercase
//! - `booted` / `default` (case-insensitive) -> symbolic, resolved later
//!
//! Anything else is rejected with [`TargetError::InvalidIdentifier`]. Classification
//! is purely lexical; whether a target actually exists is the registry's business.
//!
//! # Example
//!
//! ```
//! use armada_core::identifier::TargetIdentifier;
//!
//! let id = TargetIdentifier::classify("a1b2c3d4-e5f6-7890-abcd-ef1234567890").unwrap();
//! assert_eq!(id.as_str(), "A1B2C3D4-E5F6-7890-ABCD-EF1234567890");
//! assert!(TargetIdentifier::classify("not-an-identifier").is_err());
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TargetError;
use crate::target::TargetKind;

/// Symbolic identifiers that resolve against live registry state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolicTarget {
    /// The unique booted simulator.
    Booted,
    /// The configured (or policy-derived) default target.
    Default,
}

/// A classified target identifier.
///
/// `Simulator` and `Device` carry the normalized identifier string. `Symbolic`
/// identifiers carry no concrete target and must go through resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum TargetIdentifier {
    Simulator(String),
    Device(String),
    Symbolic(SymbolicTarget),
}

impl TargetIdentifier {
    /// Classifies a raw identifier string into one of the accepted forms.
    ///
    /// Leading and trailing whitespace is ignored. No platform lookup happens
    /// here and no form is ever guessed: an input that matches none of the
    /// lexical shapes is an error, not a search term.
    ///
    /// # Errors
    ///
    /// [`TargetError::InvalidIdentifier`] if the input matches no accepted form.
    pub fn classify(raw: &str) -> Result<Self, TargetError> {
        let trimmed = raw.trim();

        if trimmed.eq_ignore_ascii_case("booted") {
            return Ok(TargetIdentifier::Symbolic(SymbolicTarget::Booted));
        }
        if trimmed.eq_ignore_ascii_case("default") {
            return Ok(TargetIdentifier::Symbolic(SymbolicTarget::Default));
        }
        if let Some(normalized) = parse_simulator_uuid(trimmed) {
            return Ok(TargetIdentifier::Simulator(normalized));
        }
        if let Some(normalized) = parse_classic_udid(trimmed) {
            return Ok(TargetIdentifier::Device(normalized));
        }
        if let Some(normalized) = parse_modern_udid(trimmed) {
            return Ok(TargetIdentifier::Device(normalized));
        }
        if let Some(normalized) = parse_ecid(trimmed) {
            return Ok(TargetIdentifier::Device(normalized));
        }

        Err(TargetError::InvalidIdentifier {
            raw: raw.to_string(),
        })
    }

    /// Builds an identifier for a udid reported by the platform for a known kind.
    ///
    /// Discovery output is trusted for the kind; the string is normalized when it
    /// matches an accepted form and carried as-is otherwise.
    pub fn for_kind(kind: TargetKind, udid: &str) -> Self {
        match Self::classify(udid) {
            Ok(TargetIdentifier::Simulator(s)) if kind == TargetKind::Simulator => {
                TargetIdentifier::Simulator(s)
            }
            Ok(TargetIdentifier::Device(s)) if kind == TargetKind::Device => {
                TargetIdentifier::Device(s)
            }
            _ => match kind {
                TargetKind::Simulator => TargetIdentifier::Simulator(udid.trim().to_string()),
                TargetKind::Device => TargetIdentifier::Device(udid.trim().to_string()),
            },
        }
    }

    /// The normalized identifier string, or the symbolic word.
    pub fn as_str(&self) -> &str {
        match self {
            TargetIdentifier::Simulator(s) | TargetIdentifier::Device(s) => s,
            TargetIdentifier::Symbolic(SymbolicTarget::Booted) => "booted",
            TargetIdentifier::Symbolic(SymbolicTarget::Default) => "default",
        }
    }

    /// Whether this identifier names one concrete target.
    pub fn is_concrete(&self) -> bool {
        !matches!(self, TargetIdentifier::Symbolic(_))
    }

    /// The target kind implied by the identifier form, if concrete.
    pub fn kind_hint(&self) -> Option<TargetKind> {
        match self {
            TargetIdentifier::Simulator(_) => Some(TargetKind::Simulator),
            TargetIdentifier::Device(_) => Some(TargetKind::Device),
            TargetIdentifier::Symbolic(_) => None,
        }
    }
}

impl fmt::Display for TargetIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetIdentifier {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::classify(s)
    }
}

impl From<TargetIdentifier> for String {
    fn from(id: TargetIdentifier) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for TargetIdentifier {
    type Error = TargetError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::classify(&s)
    }
}

fn parse_simulator_uuid(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    if s.len() != 36
        || bytes[8] != b'-'
        || bytes[13] != b'-'
        || bytes[18] != b'-'
        || bytes[23] != b'-'
    {
        return None;
    }
    // Uuid::parse_str also accepts unhyphenated and urn forms, so the shape
    // check above is load-bearing.
    Uuid::parse_str(s).ok().map(|_| s.to_ascii_uppercase())
}

fn parse_classic_udid(s: &str) -> Option<String> {
    if s.len() == 40 && s.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(s.to_ascii_lowercase())
    } else {
        None
    }
}

fn parse_modern_udid(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    if s.len() == 25
        && bytes[8] == b'-'
        && bytes[..8].iter().all(|b| b.is_ascii_hexdigit())
        && bytes[9..].iter().all(|b| b.is_ascii_hexdigit())
    {
        Some(s.to_ascii_uppercase())
    } else {
        None
    }
}

fn parse_ecid(s: &str) -> Option<String> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    if (1..=16).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(format!("0x{}", digits.to_ascii_lowercase()))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_uuid_as_simulator_and_uppercases() {
        let id = TargetIdentifier::classify("a1b2c3d4-e5f6-7890-abcd-ef1234567890").unwrap();
        match id {
            TargetIdentifier::Simulator(s) => {
                assert_eq!(s, "A1B2C3D4-E5F6-7890-ABCD-EF1234567890");
            }
            other => panic!("expected Simulator, got: {other:?}"),
        }
    }

    #[test]
    fn classifies_classic_udid_as_device_and_lowercases() {
        let raw = "0123456789ABCDEF0123456789ABCDEF01234567";
        let id = TargetIdentifier::classify(raw).unwrap();
        match id {
            TargetIdentifier::Device(s) => {
                assert_eq!(s, raw.to_lowercase());
                assert_eq!(s.len(), 40);
            }
            other => panic!("expected Device, got: {other:?}"),
        }
    }

    #[test]
    fn classifies_modern_udid_as_device_and_uppercases() {
        let id = TargetIdentifier::classify("00008110-001a0c123456789a").unwrap();
        match id {
            TargetIdentifier::Device(s) => assert_eq!(s, "00008110-001A0C123456789A"),
            other => panic!("expected Device, got: {other:?}"),
        }
    }

    #[test]
    fn classifies_ecid_as_device_and_lowercases() {
        let id = TargetIdentifier::classify("0X1FA4C29B").unwrap();
        match id {
            TargetIdentifier::Device(s) => assert_eq!(s, "0x1fa4c29b"),
            other => panic!("expected Device, got: {other:?}"),
        }
    }

    #[test]
    fn symbolic_words_are_case_insensitive() {
        assert_eq!(
            TargetIdentifier::classify("Booted").unwrap(),
            TargetIdentifier::Symbolic(SymbolicTarget::Booted)
        );
        assert_eq!(
            TargetIdentifier::classify("BOOTED").unwrap(),
            TargetIdentifier::Symbolic(SymbolicTarget::Booted)
        );
        assert_eq!(
            TargetIdentifier::classify("Default").unwrap(),
            TargetIdentifier::Symbolic(SymbolicTarget::Default)
        );
    }

    #[test]
    fn surrounding_whitespace_is_ignored() {
        let id = TargetIdentifier::classify("  booted\n").unwrap();
        assert_eq!(id, TargetIdentifier::Symbolic(SymbolicTarget::Booted));
    }

    #[test]
    fn rejects_wrong_length_hex_strings() {
        // 39 and 41 hex digits straddle the classic udid length
        let thirty_nine = "0123456789abcdef0123456789abcdef0123456";
        let forty_one = "0123456789abcdef0123456789abcdef012345678";
        assert!(TargetIdentifier::classify(thirty_nine).is_err());
        assert!(TargetIdentifier::classify(forty_one).is_err());
    }

    #[test]
    fn rejects_uuid_with_misplaced_dashes() {
        assert!(TargetIdentifier::classify("a1b2c3d4e-5f6-7890-abcd-ef1234567890").is_err());
        // unhyphenated 32-hex must not classify as a simulator UUID
        assert!(TargetIdentifier::classify("a1b2c3d4e5f67890abcdef1234567890").is_err());
    }

    #[test]
    fn rejects_overlong_ecid() {
        // 17 hex digits after the prefix
        assert!(TargetIdentifier::classify("0x0123456789abcdef0").is_err());
        assert!(TargetIdentifier::classify("0x").is_err());
    }

    #[test]
    fn rejects_non_hex_modern_udid() {
        assert!(TargetIdentifier::classify("0000811g-001A0C123456789A").is_err());
        assert!(TargetIdentifier::classify("00008110_001A0C123456789A").is_err());
    }

    #[test]
    fn rejects_arbitrary_names() {
        assert!(TargetIdentifier::classify("iPhone 15 Pro").is_err());
        assert!(TargetIdentifier::classify("").is_err());
        assert!(TargetIdentifier::classify("bootedd").is_err());
    }

    #[test]
    fn invalid_input_is_echoed_in_error() {
        match TargetIdentifier::classify("garbage") {
            Err(TargetError::InvalidIdentifier { raw }) => assert_eq!(raw, "garbage"),
            other => panic!("expected InvalidIdentifier, got: {other:?}"),
        }
    }

    #[test]
    fn for_kind_normalizes_known_forms() {
        let id = TargetIdentifier::for_kind(
            TargetKind::Simulator,
            "a1b2c3d4-e5f6-7890-abcd-ef1234567890",
        );
        assert_eq!(id.as_str(), "A1B2C3D4-E5F6-7890-ABCD-EF1234567890");
        assert_eq!(id.kind_hint(), Some(TargetKind::Simulator));
    }

    #[test]
    fn for_kind_keeps_unrecognized_strings_verbatim() {
        let id = TargetIdentifier::for_kind(TargetKind::Device, "odd-platform-id");
        assert_eq!(id.as_str(), "odd-platform-id");
        assert_eq!(id.kind_hint(), Some(TargetKind::Device));
    }

    #[test]
    fn serde_round_trips_through_string_form() {
        let id = TargetIdentifier::classify("00008110-001A0C123456789A").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00008110-001A0C123456789A\"");
        let back: TargetIdentifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn symbolic_identifiers_are_not_concrete() {
        assert!(!TargetIdentifier::classify("booted").unwrap().is_concrete());
        assert!(TargetIdentifier::classify("0x1f").unwrap().is_concrete());
    }
}
