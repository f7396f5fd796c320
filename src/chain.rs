//! Chain client abstraction
//!
//! The processor and the supervisors only talk to the node through these
//! traits, so tests can script chain responses without a network.

use crate::types::{Block, Header, Receipt, Transaction};
use alloy_primitives::B256;
use anyhow::Result;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Read-only access to a chain node.
pub trait Chain: Send + Sync {
    /// Fetch a block with transaction hashes. `None` if the node does not have it.
    fn get_block(&self, number: u64) -> BoxFuture<'_, Result<Option<Block>>>;

    /// Fetch several blocks in one round trip, in request order.
    fn get_blocks(&self, numbers: Vec<u64>) -> BoxFuture<'_, Result<Vec<Block>>>;

    /// Number of the current chain head.
    fn get_latest_block(&self) -> BoxFuture<'_, Result<u64>>;

    fn get_transaction(&self, hash: B256) -> BoxFuture<'_, Result<Transaction>>;

    /// All receipts of a block, in transaction order.
    fn get_receipts(&self, number: u64) -> BoxFuture<'_, Result<Vec<Receipt>>>;

    /// Re-simulate a failed transaction at its block and return the revert reason.
    fn get_revert_reason(&self, tx_hash: B256, block: u64) -> BoxFuture<'_, Result<String>>;
}

/// Source of live chain heads.
pub trait HeadSource: Send + Sync {
    /// Open a fresh subscription to new block headers.
    fn subscribe(&self) -> BoxFuture<'_, Result<HeadSubscription>>;
}

/// One live head subscription.
///
/// A background reader task feeds `headers`; an `Err` item or a closed
/// channel means the subscription is dead and must be replaced.
/// `unsubscribe` consumes the handle, so it can only run once.
pub struct HeadSubscription {
    headers: mpsc::Receiver<Result<Header>>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl HeadSubscription {
    pub fn new(
        headers: mpsc::Receiver<Result<Header>>,
        shutdown: CancellationToken,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            headers,
            shutdown,
            task: Some(task),
        }
    }

    /// Subscription fed directly by a channel, with no reader task behind it.
    pub fn from_channel(headers: mpsc::Receiver<Result<Header>>) -> Self {
        Self {
            headers,
            shutdown: CancellationToken::new(),
            task: None,
        }
    }

    /// Next header, `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<Result<Header>> {
        self.headers.recv().await
    }

    /// Tell the reader to unsubscribe and close its connection, then wait for it.
    pub async fn unsubscribe(mut self) {
        self.shutdown.cancel();
        self.headers.close();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "head subscription reader ended abnormally");
            }
        }
    }
}

impl Drop for HeadSubscription {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
