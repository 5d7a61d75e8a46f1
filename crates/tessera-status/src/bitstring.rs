//! Bitstring packing shared by publishers and verifiers.
//!
//! Index `i` lives in bit `i % 8` (least significant first) of byte `i / 8`.
//! The wire form is unpadded base64url.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};

use crate::error::{Result, StatusListError};

/// Zeroed buffer large enough for `capacity` bits.
pub fn allocate(capacity: usize) -> Vec<u8> {
    vec![0; capacity.div_ceil(8)]
}

/// Sets the bit for `index`. Out-of-range indices are ignored.
pub fn set_bit(bytes: &mut [u8], index: usize) {
    if let Some(byte) = bytes.get_mut(index / 8) {
        *byte |= 1 << (index % 8);
    }
}

/// Whether the bit for `index` is set. Out-of-range indices read as unset.
pub fn bit_is_set(bytes: &[u8], index: usize) -> bool {
    bytes.get(index / 8).is_some_and(|byte| byte & (1 << (index % 8)) != 0)
}

/// Encodes a buffer for publication.
pub fn encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decodes a published bitstring.
///
/// # Errors
///
/// Returns `StatusListError::InvalidBitstring` if the input is not unpadded
/// base64url.
pub fn decode(bitstring: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(bitstring)
        .map_err(|e| StatusListError::InvalidBitstring { reason: e.to_string() })
}

/// Hex SHA-256 digest of a buffer.
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_are_least_significant_first() {
        let mut bytes = allocate(16);
        set_bit(&mut bytes, 0);
        set_bit(&mut bytes, 9);

        assert_eq!(bytes, vec![0b0000_0001, 0b0000_0010]);
        assert!(bit_is_set(&bytes, 9));
        assert!(!bit_is_set(&bytes, 8));
    }

    #[test]
    fn allocation_rounds_up() {
        assert_eq!(allocate(0).len(), 0);
        assert_eq!(allocate(1).len(), 1);
        assert_eq!(allocate(9).len(), 2);
        assert_eq!(allocate(131_072).len(), 16_384);
    }

    #[test]
    fn out_of_range_bits_are_ignored() {
        let mut bytes = allocate(8);
        set_bit(&mut bytes, 64);

        assert_eq!(bytes, vec![0]);
        assert!(!bit_is_set(&bytes, 64));
    }

    #[test]
    fn encoding_is_unpadded_url_safe() {
        let encoded = encode(&[0xfb, 0xff]);

        assert_eq!(encoded, "-_8");
        assert_eq!(decode(&encoded).unwrap(), vec![0xfb, 0xff]);
        assert!(matches!(decode("not base64!"), Err(StatusListError::InvalidBitstring { .. })));
    }
}
