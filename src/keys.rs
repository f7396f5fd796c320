//! Key encoding and decoding utilities
//!
//! All keys use a single-byte prefix followed by binary data.
//! Block numbers are big-endian so that RocksDB's lexicographic order
//! matches numeric order and range scans are plain ordered scans.

use anyhow::Result;

/// Meta id of the lower coverage bound.
pub const META_LOWER_BOUND: u8 = 0x01;

/// Meta id of the upper coverage bound.
pub const META_UPPER_BOUND: u8 = 0x02;

/// Encode a presence marker key.
///
/// Format: byte 'B' (0x42) + block_number (8 bytes, big-endian)
/// Total length: 9 bytes
pub fn encode_block_key(block: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(b'B');
    key.extend_from_slice(&block.to_be_bytes());
    key
}

/// Decode a presence marker key back into its block number.
pub fn decode_block_key(key: &[u8]) -> Result<u64> {
    if key.len() != 9 || key[0] != b'B' {
        anyhow::bail!("Malformed block key ({} bytes)", key.len());
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&key[1..9]);
    Ok(u64::from_be_bytes(raw))
}

/// Encode a meta key.
///
/// Format: byte 'M' (0x4D) + meta_id (1 byte)
/// Total length: 2 bytes
///
/// Meta IDs:
/// - 0x01: lower bound
/// - 0x02: upper bound
pub fn encode_meta_key(meta_id: u8) -> Vec<u8> {
    vec![b'M', meta_id]
}
