//! JSON-RPC client for Ethereum nodes
//!
//! Provides a typed interface to Ethereum JSON-RPC endpoints.
//! Handles hex string parsing, batching and error handling.

use crate::abi::decode_revert_reason;
use crate::chain::Chain;
use crate::types::{parse_hex_u64, Block, Receipt, Transaction};
use alloy_primitives::B256;
use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Error object of a JSON-RPC response.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RPC error {}: {}", self.code, self.message)
    }
}

impl RpcError {
    /// Revert reason carried by an `eth_call` error, if any.
    ///
    /// Prefers the ABI-encoded `Error(string)` in `data`, falling back to the
    /// node's own message.
    pub fn revert_reason(&self) -> String {
        let decoded = self
            .data
            .as_ref()
            .and_then(|d| d.as_str())
            .and_then(|s| hex::decode(s.strip_prefix("0x").unwrap_or(s)).ok())
            .and_then(|bytes| decode_revert_reason(&bytes));
        match decoded {
            Some(reason) => reason,
            None => self
                .message
                .strip_prefix("execution reverted: ")
                .unwrap_or(&self.message)
                .to_string(),
        }
    }
}

/// JSON-RPC client for Ethereum nodes.
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Create a new RPC client.
    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url,
            next_id: AtomicU64::new(1),
        })
    }

    /// Make a JSON-RPC call, keeping node-side errors separate from transport errors.
    async fn call_raw(&self, method: &str, params: Value) -> Result<std::result::Result<Value, RpcError>> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params
        });

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", method))?;

        let json: Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", method))?;

        split_response(json)
    }

    /// Make a JSON-RPC call.
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        match self.call_raw(method, params).await? {
            Ok(result) => Ok(result),
            Err(e) => anyhow::bail!("{} failed: {}", method, e),
        }
    }

    /// Send several calls as one JSON-RPC batch. Results are in request order.
    async fn call_batch(&self, calls: Vec<(&str, Value)>) -> Result<Vec<Value>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let first_id = self.next_id.fetch_add(calls.len() as u64, Ordering::Relaxed);
        let request: Vec<Value> = calls
            .iter()
            .enumerate()
            .map(|(i, (method, params))| {
                json!({
                    "jsonrpc": "2.0",
                    "id": first_id + i as u64,
                    "method": method,
                    "params": params
                })
            })
            .collect();

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .context("Failed to send batch RPC request")?;

        let responses: Vec<Value> = response
            .json()
            .await
            .context("Failed to parse batch RPC response")?;

        reorder_batch(first_id, calls.len(), responses)
    }

    /// Get a block by number with transaction hashes only.
    pub async fn get_block_by_number(&self, number: u64) -> Result<Option<Block>> {
        let params = json!([quantity(number), false]);
        let result = self.call("eth_getBlockByNumber", params).await?;
        if result.is_null() {
            return Ok(None);
        }
        serde_json::from_value(result)
            .map(Some)
            .context("Failed to deserialize block")
    }

    pub async fn get_blocks_by_number(&self, numbers: &[u64]) -> Result<Vec<Block>> {
        let calls = numbers
            .iter()
            .map(|n| ("eth_getBlockByNumber", json!([quantity(*n), false])))
            .collect();
        let results = self.call_batch(calls).await?;
        results
            .into_iter()
            .zip(numbers)
            .map(|(value, n)| {
                if value.is_null() {
                    anyhow::bail!("Block {} not found", n);
                }
                serde_json::from_value(value)
                    .with_context(|| format!("Failed to deserialize block {}", n))
            })
            .collect()
    }

    /// Get the current head block number.
    pub async fn block_number(&self) -> Result<u64> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        let number_str = result
            .as_str()
            .context("Block number response is not a string")?;
        parse_hex_u64(number_str).context("Failed to parse block number")
    }

    /// Get a transaction by hash.
    pub async fn get_transaction_by_hash(&self, tx_hash: B256) -> Result<Transaction> {
        let params = json!([format!("0x{:x}", tx_hash)]);
        let result = self.call("eth_getTransactionByHash", params).await?;
        if result.is_null() {
            anyhow::bail!("Transaction 0x{:x} not found", tx_hash);
        }
        serde_json::from_value(result).context("Failed to deserialize transaction")
    }

    /// Get every receipt of a block.
    pub async fn get_block_receipts(&self, number: u64) -> Result<Vec<Receipt>> {
        let params = json!([quantity(number)]);
        let result = self.call("eth_getBlockReceipts", params).await?;
        if result.is_null() {
            anyhow::bail!("Receipts for block {} not found", number);
        }
        serde_json::from_value(result).context("Failed to deserialize receipts")
    }

    /// Replay a transaction with `eth_call` at its own block and extract the revert reason.
    ///
    /// Returns an empty string if the replay does not revert.
    pub async fn simulate_reverted_tx(&self, tx_hash: B256, block: u64) -> Result<String> {
        let tx = self.get_transaction_by_hash(tx_hash).await?;
        let mut call = json!({
            "from": format!("0x{:x}", tx.from),
            "data": format!("0x{}", hex::encode(&tx.input)),
            "value": format!("0x{:x}", tx.value),
            "gas": quantity(tx.gas),
        });
        if let Some(to) = tx.to {
            call["to"] = json!(format!("0x{:x}", to));
        }

        match self.call_raw("eth_call", json!([call, quantity(block)])).await? {
            Ok(_) => Ok(String::new()),
            Err(e) => {
                tracing::debug!(tx = %tx_hash, code = e.code, "revert replay returned error");
                Ok(e.revert_reason())
            }
        }
    }
}

impl Chain for RpcClient {
    fn get_block(&self, number: u64) -> BoxFuture<'_, Result<Option<Block>>> {
        Box::pin(self.get_block_by_number(number))
    }

    fn get_blocks(&self, numbers: Vec<u64>) -> BoxFuture<'_, Result<Vec<Block>>> {
        Box::pin(async move { self.get_blocks_by_number(&numbers).await })
    }

    fn get_latest_block(&self) -> BoxFuture<'_, Result<u64>> {
        Box::pin(self.block_number())
    }

    fn get_transaction(&self, hash: B256) -> BoxFuture<'_, Result<Transaction>> {
        Box::pin(self.get_transaction_by_hash(hash))
    }

    fn get_receipts(&self, number: u64) -> BoxFuture<'_, Result<Vec<Receipt>>> {
        Box::pin(self.get_block_receipts(number))
    }

    fn get_revert_reason(&self, tx_hash: B256, block: u64) -> BoxFuture<'_, Result<String>> {
        Box::pin(self.simulate_reverted_tx(tx_hash, block))
    }
}

/// Hex quantity encoding of a number.
fn quantity(n: u64) -> String {
    format!("0x{:x}", n)
}

/// Put batch responses back in request order. Request `i` was sent with id
/// `first_id + i`; servers may answer a batch in any order.
fn reorder_batch(first_id: u64, expected: usize, responses: Vec<Value>) -> Result<Vec<Value>> {
    if responses.len() != expected {
        anyhow::bail!(
            "Batch RPC returned {} responses for {} calls",
            responses.len(),
            expected
        );
    }

    let mut ordered: Vec<Option<Value>> = vec![None; expected];
    for item in responses {
        let id = item
            .get("id")
            .and_then(|v| v.as_u64())
            .context("Batch response missing numeric 'id'")?;
        let slot = id
            .checked_sub(first_id)
            .and_then(|i| ordered.get_mut(i as usize))
            .with_context(|| format!("Batch response has unexpected id {}", id))?;
        let result = split_response(item)?.map_err(|e| anyhow::anyhow!("{}", e))?;
        *slot = Some(result);
    }

    ordered
        .into_iter()
        .map(|v| v.context("Batch response missing an id"))
        .collect()
}

/// Split a response object into its result or its error.
fn split_response(mut json: Value) -> Result<std::result::Result<Value, RpcError>> {
    if let Some(error) = json.get("error").filter(|e| !e.is_null()) {
        let error: RpcError =
            serde_json::from_value(error.clone()).context("Malformed RPC error object")?;
        return Ok(Err(error));
    }

    // Extract result
    json.get_mut("result")
        .map(Value::take)
        .map(Ok)
        .context("RPC response missing 'result' field")
}
