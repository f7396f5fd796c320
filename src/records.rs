//! Record types for persisted progress data
//!
//! Bounds are stored as raw 8-byte big-endian values; presence markers carry a
//! small postcard-encoded record. Only the marker's existence matters for gap
//! detection, the record is there for operators.

use serde::{Deserialize, Serialize};

/// Value stored under a presence marker key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMarker {
    /// Unix time (seconds) at which the block finished processing
    pub processed_at: u64,
}

impl BlockMarker {
    /// Marker stamped with the current wall clock.
    pub fn now() -> Self {
        let processed_at = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self { processed_at }
    }
}

/// Encode a u64 as a fixed 8-byte big-endian array.
pub fn encode_u64(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

/// Decode an 8-byte big-endian value.
pub fn decode_u64(bytes: &[u8]) -> Result<u64, anyhow::Error> {
    if bytes.len() != 8 {
        anyhow::bail!("u64 encoding must be exactly 8 bytes, got {}", bytes.len());
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(u64::from_be_bytes(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u64_decoding_rejects_short_input() {
        assert!(decode_u64(&[0, 1, 2]).is_err());
        assert_eq!(decode_u64(&encode_u64(42)).unwrap(), 42);
    }

    #[test]
    fn test_marker_postcard_encoding() {
        let marker = BlockMarker { processed_at: 1_700_000_000 };
        let bytes = postcard::to_allocvec(&marker).unwrap();
        let decoded: BlockMarker = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(marker, decoded);
    }
}
