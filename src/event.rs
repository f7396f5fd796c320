//! Decoded event published downstream
//!
//! An `Event` is built by a handler, handed to the publisher and dropped.
//! Success-path events come from receipt logs and carry the log index;
//! revert-path events are synthesized from call data and carry none.

use serde::Serialize;
use serde_json::Value;

/// Structured event as published on the stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub block: u64,

    /// Position of the source log in the block, absent for revert-derived events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,

    pub contract_address: String,

    pub success: bool,

    /// Block timestamp in unix seconds
    pub timestamp: u64,

    #[serde(rename = "transactionHash")]
    pub tx_hash: String,

    /// Handler name, e.g. `TOKEN_TRANSFER`
    #[serde(rename = "transactionType")]
    pub tx_type: String,

    pub payload: Value,
}

impl Event {
    /// Deduplication key for the downstream stream.
    ///
    /// Log-derived events are keyed by `(txHash, logIndex)`, so two handlers
    /// never collide across logs of one transaction. Revert-derived events
    /// are keyed by `(txType, txHash)`.
    pub fn dedup_key(&self) -> String {
        match self.index {
            Some(index) => format!("{}:{}", self.tx_hash, index),
            None => format!("{}:{}", self.tx_type, self.tx_hash),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
