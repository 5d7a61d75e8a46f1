//! Hex digest newtype used for leaves, siblings, and roots.

use std::fmt;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{MerkleError, Result};

/// Raw digest bytes, rendered as lowercase hex without a `0x` prefix.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MerkleHash(Vec<u8>);

impl MerkleHash {
    /// Parses a hex digest.
    ///
    /// Surrounding whitespace and a `0x`/`0X` prefix are stripped and case is
    /// ignored, so `"0xAB"` and `"ab"` are the same leaf.
    ///
    /// # Errors
    ///
    /// Returns `MerkleError::InvalidHash` for empty, odd-length, or non-hex
    /// input.
    pub fn parse_hex(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if digits.is_empty() {
            return Err(MerkleError::invalid_hash(input, "empty digest"));
        }
        if digits.len() % 2 != 0 {
            return Err(MerkleError::invalid_hash(input, "odd number of hex digits"));
        }

        hex::decode(digits)
            .map(Self)
            .map_err(|e| MerkleError::invalid_hash(input, e.to_string()))
    }

    /// Wraps raw digest bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// SHA-256 of arbitrary content.
    pub fn content_hash(content: &[u8]) -> Self {
        Self(Sha256::digest(content).to_vec())
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for MerkleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for MerkleHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MerkleHash({})", self.to_hex())
    }
}

impl std::str::FromStr for MerkleHash {
    type Err = MerkleError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_hex(s)
    }
}

impl Serialize for MerkleHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for MerkleHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::parse_hex(&hex).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes_prefix_and_case() {
        let upper = MerkleHash::parse_hex("  0XABcd01 ").unwrap();
        let lower = MerkleHash::parse_hex("abcd01").unwrap();

        assert_eq!(upper, lower);
        assert_eq!(upper.to_hex(), "abcd01");
    }

    #[test]
    fn parse_rejects_malformed_input() {
        for bad in ["", "0x", "abc", "zz", "0xg0"] {
            let err = MerkleHash::parse_hex(bad).unwrap_err();
            assert!(matches!(err, MerkleError::InvalidHash { .. }), "accepted {bad:?}");
        }
    }

    #[test]
    fn content_hash_matches_known_vector() {
        assert_eq!(
            MerkleHash::content_hash(b"").to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn serde_uses_hex_strings() {
        let hash = MerkleHash::parse_hex("0A0B").unwrap();

        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, "\"0a0b\"");

        let back: MerkleHash = serde_json::from_str("\"0x0A0B\"").unwrap();
        assert_eq!(back, hash);
        assert!(serde_json::from_str::<MerkleHash>("\"xyz\"").is_err());
    }
}
