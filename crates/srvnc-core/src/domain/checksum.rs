//! Per-chunk payload checksums.
//!
//! UDP already carries a 16-bit checksum, but it is optional on IPv4 and weak
//! against multi-bit corruption.  When enabled, each chunk carries the first
//! four bytes of the BLAKE3 digest of its payload.

use serde::{Deserialize, Serialize};

/// Whether chunks carry a payload checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumMode {
    /// Chunks are sent without a checksum field.
    Disabled,
    /// Chunks carry a 32-bit truncated BLAKE3 digest.
    #[default]
    Blake3,
}

impl ChecksumMode {
    /// Computes the checksum for `payload`, or `None` when disabled.
    pub fn compute(self, payload: &[u8]) -> Option<u32> {
        match self {
            ChecksumMode::Disabled => None,
            ChecksumMode::Blake3 => Some(blake3_32(payload)),
        }
    }
}

/// First four bytes of the BLAKE3 digest, read big-endian.
pub fn blake3_32(payload: &[u8]) -> u32 {
    let hash = blake3::hash(payload);
    let b = hash.as_bytes();
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

/// Returns `true` if `payload` matches the transmitted checksum.
pub fn verify(payload: &[u8], expected: u32) -> bool {
    blake3_32(payload) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_mode_produces_no_checksum() {
        assert_eq!(ChecksumMode::Disabled.compute(b"payload"), None);
    }

    #[test]
    fn test_blake3_checksum_detects_single_bit_flip() {
        let payload = b"frame slice".to_vec();
        let sum = ChecksumMode::Blake3.compute(&payload).expect("enabled");

        let mut corrupted = payload.clone();
        corrupted[0] ^= 0x01;

        assert!(verify(&payload, sum));
        assert!(!verify(&corrupted, sum));
    }

    #[test]
    fn test_checksum_mode_deserializes_from_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: ChecksumMode,
        }
        let w: Wrapper = toml::from_str("mode = \"disabled\"").expect("parse");
        assert_eq!(w.mode, ChecksumMode::Disabled);
    }
}
