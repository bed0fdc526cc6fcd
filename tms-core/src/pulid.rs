//! Prefixed lexically sortable identifiers.
//!
//! A PULID renders as `<prefix>_<suffix>` where the suffix is the 26-character
//! Crockford base32 encoding of a UUIDv7. The encoding is order-preserving, so
//! identifiers minted later sort after identifiers minted earlier.
//!
//! The nil PULID is the empty string. It compares equal only to itself and is
//! what an unset business unit deserializes to.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const SUFFIX_LEN: usize = 26;
const MAX_PREFIX_LEN: usize = 8;

/// Well-known entity prefixes.
pub mod prefix {
    pub const SEQUENCE: &str = "seq";
    pub const EMAIL_PROFILE: &str = "prof";
    pub const EMAIL_TEMPLATE: &str = "tmpl";
    pub const EMAIL_QUEUE: &str = "q";
    pub const EMAIL_LOG: &str = "log";
    pub const SESSION: &str = "sess";
    pub const ORGANIZATION: &str = "org";
    pub const BUSINESS_UNIT: &str = "bu";
    pub const USER: &str = "usr";
}

/// Errors raised when parsing a PULID from text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PulidError {
    #[error("identifier is missing a prefix: {value}")]
    MissingPrefix { value: String },

    #[error("identifier prefix is invalid: {prefix}")]
    InvalidPrefix { prefix: String },

    #[error("identifier suffix is malformed: {reason}")]
    MalformedSuffix { reason: String },
}

/// Typed-prefix identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Pulid(String);

impl Pulid {
    /// The nil identifier.
    pub const fn nil() -> Self {
        Pulid(String::new())
    }

    /// Mint a new identifier with the given prefix.
    ///
    /// Prefixes are short lowercase ASCII tokens; callers pass one of the
    /// constants in [`prefix`].
    pub fn new(prefix: &str) -> Self {
        Self::from_uuid(prefix, Uuid::now_v7())
    }

    /// Build an identifier from an existing UUID.
    pub fn from_uuid(prefix: &str, id: Uuid) -> Self {
        Pulid(format!("{}_{}", prefix, encode_suffix(id.as_u128())))
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix portion, or `None` for the nil identifier.
    pub fn prefix(&self) -> Option<&str> {
        self.0.split_once('_').map(|(p, _)| p)
    }

    /// Decode the suffix back into the UUID it was minted from.
    pub fn to_uuid(&self) -> Option<Uuid> {
        let (_, suffix) = self.0.split_once('_')?;
        decode_suffix(suffix).ok().map(Uuid::from_u128)
    }

    /// Parse and check that the prefix matches `expected`.
    pub fn parse_with_prefix(value: &str, expected: &str) -> Result<Self, PulidError> {
        let id: Pulid = value.parse()?;
        match id.prefix() {
            Some(p) if p == expected => Ok(id),
            Some(p) => Err(PulidError::InvalidPrefix {
                prefix: p.to_string(),
            }),
            None => Err(PulidError::MissingPrefix {
                value: value.to_string(),
            }),
        }
    }
}

impl FromStr for Pulid {
    type Err = PulidError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.is_empty() {
            return Ok(Pulid::nil());
        }

        let (prefix, suffix) = value
            .split_once('_')
            .ok_or_else(|| PulidError::MissingPrefix {
                value: value.to_string(),
            })?;

        if prefix.is_empty() {
            return Err(PulidError::MissingPrefix {
                value: value.to_string(),
            });
        }
        if prefix.len() > MAX_PREFIX_LEN
            || !prefix
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        {
            return Err(PulidError::InvalidPrefix {
                prefix: prefix.to_string(),
            });
        }

        decode_suffix(suffix)?;
        Ok(Pulid(format!("{}_{}", prefix, suffix.to_ascii_uppercase())))
    }
}

impl fmt::Display for Pulid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Pulid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            f.write_str("Pulid(nil)")
        } else {
            write!(f, "Pulid({})", self.0)
        }
    }
}

impl Serialize for Pulid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Pulid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        match raw {
            None => Ok(Pulid::nil()),
            Some(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

fn encode_suffix(mut value: u128) -> String {
    let mut out = [b'0'; SUFFIX_LEN];
    for slot in out.iter_mut().rev() {
        *slot = CROCKFORD[(value & 0x1f) as usize];
        value >>= 5;
    }
    // Every byte comes from the ASCII alphabet above.
    out.iter().map(|&b| b as char).collect()
}

fn decode_suffix(suffix: &str) -> Result<u128, PulidError> {
    if suffix.len() != SUFFIX_LEN {
        return Err(PulidError::MalformedSuffix {
            reason: format!("expected {} characters, got {}", SUFFIX_LEN, suffix.len()),
        });
    }

    let mut value: u128 = 0;
    for (idx, ch) in suffix.bytes().enumerate() {
        let digit = decode_char(ch).ok_or_else(|| PulidError::MalformedSuffix {
            reason: format!("invalid character {:?}", ch as char),
        })?;
        // 26 * 5 = 130 bits; the leading character may only carry 3.
        if idx == 0 && digit > 7 {
            return Err(PulidError::MalformedSuffix {
                reason: "value overflows 128 bits".to_string(),
            });
        }
        value = (value << 5) | u128::from(digit);
    }
    Ok(value)
}

fn decode_char(ch: u8) -> Option<u8> {
    let upper = ch.to_ascii_uppercase();
    let normalized = match upper {
        b'O' => b'0',
        b'I' | b'L' => b'1',
        other => other,
    };
    CROCKFORD
        .iter()
        .position(|&c| c == normalized)
        .map(|p| p as u8)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_new_has_prefix_and_suffix() {
        let id = Pulid::new(prefix::SEQUENCE);
        assert_eq!(id.prefix(), Some("seq"));
        assert_eq!(id.as_str().len(), "seq_".len() + SUFFIX_LEN);
        assert!(!id.is_nil());
    }

    #[test]
    fn test_nil_equals_only_itself() {
        let nil = Pulid::nil();
        assert!(nil.is_nil());
        assert_eq!(nil, Pulid::default());
        assert_ne!(nil, Pulid::new(prefix::BUSINESS_UNIT));
        assert_eq!("".parse::<Pulid>().unwrap(), nil);
    }

    #[test]
    fn test_ids_sort_by_creation() {
        let a = Pulid::new(prefix::EMAIL_QUEUE);
        let b = Pulid::new(prefix::EMAIL_QUEUE);
        assert!(a < b, "{a} should sort before {b}");
    }

    #[test]
    fn test_parse_rejects_missing_prefix() {
        let err = "01HZY3J2V1N4D6K9P0QWERTY12".parse::<Pulid>().unwrap_err();
        assert!(matches!(err, PulidError::MissingPrefix { .. }));

        let err = "_01HZY3J2V1N4D6K9P0QWERTY12".parse::<Pulid>().unwrap_err();
        assert!(matches!(err, PulidError::MissingPrefix { .. }));
    }

    #[test]
    fn test_parse_rejects_malformed_suffix() {
        let err = "sess_short".parse::<Pulid>().unwrap_err();
        assert!(matches!(err, PulidError::MalformedSuffix { .. }));

        let err = "sess_01HZY3J2V1N4D6K9P0QWERTU!2".parse::<Pulid>().unwrap_err();
        assert!(matches!(err, PulidError::MalformedSuffix { .. }));

        // Leading character above 7 cannot fit in 128 bits.
        let err = "sess_81HZY3J2V1N4D6K9P0QWERTY12".parse::<Pulid>().unwrap_err();
        assert!(matches!(err, PulidError::MalformedSuffix { .. }));
    }

    #[test]
    fn test_parse_with_prefix_checks_prefix() {
        let id = Pulid::new(prefix::SESSION);
        assert!(Pulid::parse_with_prefix(id.as_str(), "sess").is_ok());
        let err = Pulid::parse_with_prefix(id.as_str(), "usr").unwrap_err();
        assert!(matches!(err, PulidError::InvalidPrefix { .. }));
    }

    #[test]
    fn test_serde_round_trip_and_null() {
        let id = Pulid::new(prefix::ORGANIZATION);
        let json = serde_json::to_string(&id).unwrap();
        let back: Pulid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        let nil: Pulid = serde_json::from_str("null").unwrap();
        assert!(nil.is_nil());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_uuid_survives_encoding(bits in any::<u128>()) {
            let id = Pulid::from_uuid("bu", Uuid::from_u128(bits));
            let parsed: Pulid = id.as_str().parse().unwrap();
            prop_assert_eq!(parsed.to_uuid(), Some(Uuid::from_u128(bits)));
        }

        #[test]
        fn prop_encoding_preserves_order(a in any::<u128>(), b in any::<u128>()) {
            let ea = encode_suffix(a);
            let eb = encode_suffix(b);
            prop_assert_eq!(a.cmp(&b), ea.cmp(&eb));
        }
    }
}
