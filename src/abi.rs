//! Minimal ABI decoding for event topics, event data and call data
//!
//! Only static types are decoded (address, uint256, bool). Every argument
//! occupies one 32-byte word, so positions are plain word indexes.

use alloy_primitives::{keccak256, Address, B256, U256};
use thiserror::Error;

/// Size of one ABI word.
pub const WORD: usize = 32;

/// Selector of the standard `Error(string)` revert payload.
pub const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Failure to decode a log or call payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected at least {expected} topics, got {got}")]
    MissingTopic { expected: usize, got: usize },

    #[error("payload too short: need {expected} bytes, got {got}")]
    ShortData { expected: usize, got: usize },

    #[error("word {index} is not a valid bool")]
    InvalidBool { index: usize },
}

/// Hash of a canonical event signature, e.g. `Transfer(address,address,uint256)`.
pub fn event_topic(signature: &str) -> B256 {
    keccak256(signature.as_bytes())
}

/// First four bytes of the hash of a canonical function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash[..4]);
    out
}

/// Lowercase hex encoding of a selector, the Router's input-data key.
pub fn selector_hex(signature: &str) -> String {
    hex::encode(selector(signature))
}

/// Borrow word `index` from an ABI-encoded byte string.
pub fn word(data: &[u8], index: usize) -> Result<&[u8], DecodeError> {
    let start = index * WORD;
    let end = start + WORD;
    if data.len() < end {
        return Err(DecodeError::ShortData {
            expected: end,
            got: data.len(),
        });
    }
    Ok(&data[start..end])
}

/// Interpret a word as an address (low 20 bytes).
pub fn word_to_address(word: &[u8]) -> Address {
    Address::from_slice(&word[WORD - 20..WORD])
}

pub fn word_to_u256(word: &[u8]) -> U256 {
    U256::from_be_slice(word)
}

pub fn data_address(data: &[u8], index: usize) -> Result<Address, DecodeError> {
    word(data, index).map(word_to_address)
}

pub fn data_u256(data: &[u8], index: usize) -> Result<U256, DecodeError> {
    word(data, index).map(word_to_u256)
}

pub fn data_bool(data: &[u8], index: usize) -> Result<bool, DecodeError> {
    let value = data_u256(data, index)?;
    if value == U256::ZERO {
        Ok(false)
    } else if value == U256::from(1u8) {
        Ok(true)
    } else {
        Err(DecodeError::InvalidBool { index })
    }
}

/// Borrow indexed topic `index` (topic 0 is the signature).
pub fn topic(topics: &[B256], index: usize) -> Result<&B256, DecodeError> {
    topics.get(index).ok_or(DecodeError::MissingTopic {
        expected: index + 1,
        got: topics.len(),
    })
}

pub fn topic_address(topics: &[B256], index: usize) -> Result<Address, DecodeError> {
    topic(topics, index).map(|t| word_to_address(t.as_slice()))
}

pub fn topic_u256(topics: &[B256], index: usize) -> Result<U256, DecodeError> {
    topic(topics, index).map(|t| word_to_u256(t.as_slice()))
}

pub fn topic_bool(topics: &[B256], index: usize) -> Result<bool, DecodeError> {
    let value = topic_u256(topics, index)?;
    if value == U256::ZERO {
        Ok(false)
    } else if value == U256::from(1u8) {
        Ok(true)
    } else {
        Err(DecodeError::InvalidBool { index })
    }
}

/// Arguments of a call, i.e. the input with its selector stripped.
pub fn call_args(input: &[u8]) -> Result<&[u8], DecodeError> {
    if input.len() < 4 {
        return Err(DecodeError::ShortData {
            expected: 4,
            got: input.len(),
        });
    }
    Ok(&input[4..])
}

/// Decode an `Error(string)` revert payload into its message.
///
/// Returns `None` for any other payload shape (custom errors, panics, empty).
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    if data.len() < 4 || data[..4] != ERROR_STRING_SELECTOR {
        return None;
    }
    let body = &data[4..];
    let offset = usize::try_from(data_u256(body, 0).ok()?).ok()?;
    let len_word = body.get(offset..offset.checked_add(WORD)?)?;
    let len = usize::try_from(word_to_u256(len_word)).ok()?;
    let start = offset + WORD;
    let bytes = body.get(start..start.checked_add(len)?)?;
    Some(String::from_utf8_lossy(bytes).into_owned())
}

/// Checksummed hex form used in every published payload.
pub fn checksum(address: &Address) -> String {
    address.to_checksum(None)
}


#[cfg(test)]
mod tests {
    use super::encode::*;
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn test_well_known_hashes() {
        assert_eq!(
            format!("{:x}", event_topic("Transfer(address,address,uint256)")),
            "ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
        assert_eq!(selector_hex("transfer(address,uint256)"), "a9059cbb");
        assert_eq!(selector_hex("transferFrom(address,address,uint256)"), "23b872dd");
        assert_eq!(hex::encode(selector("Error(string)")), "08c379a0");
    }

    #[test]
    fn test_word_access() {
        let who = address!("00000000000000000000000000000000000000aa");
        let data = data(&[address_word(who), u256_word(42)]);
        assert_eq!(data_address(&data, 0).unwrap(), who);
        assert_eq!(data_u256(&data, 1).unwrap(), U256::from(42u64));
        assert_eq!(
            data_u256(&data, 2),
            Err(DecodeError::ShortData { expected: 96, got: 64 })
        );
    }

    #[test]
    fn test_bool_rejects_dirty_word() {
        let data = data(&[u256_word(1), u256_word(0), u256_word(2)]);
        assert!(data_bool(&data, 0).unwrap());
        assert!(!data_bool(&data, 1).unwrap());
        assert_eq!(data_bool(&data, 2), Err(DecodeError::InvalidBool { index: 2 }));
    }

    #[test]
    fn test_missing_topic() {
        let topics = vec![event_topic("Burn(address,uint256)")];
        assert_eq!(
            topic_address(&topics, 1),
            Err(DecodeError::MissingTopic { expected: 2, got: 1 })
        );
    }

    #[test]
    fn test_decode_revert_reason() {
        let reason = b"insufficient balance";
        let mut payload = ERROR_STRING_SELECTOR.to_vec();
        payload.extend_from_slice(&u256_word(32));
        payload.extend_from_slice(&u256_word(reason.len() as u64));
        let mut padded = reason.to_vec();
        padded.resize(32, 0);
        payload.extend_from_slice(&padded);

        assert_eq!(
            decode_revert_reason(&payload).as_deref(),
            Some("insufficient balance")
        );
        assert_eq!(decode_revert_reason(&[0xde, 0xad, 0xbe, 0xef]), None);
        // Length pointing past the end of the payload
        payload.truncate(4 + 64 + 4);
        assert_eq!(decode_revert_reason(&payload), None);
    }

    #[test]
    fn test_call_args_requires_selector() {
        assert!(call_args(&[0x01, 0x02]).is_err());
        assert_eq!(call_args(&[1, 2, 3, 4, 5]).unwrap(), &[5]);
    }
}
