//! Block processor
//!
//! Fetches one block and its receipts, keeps what touches watched addresses,
//! routes it to the handlers, and marks the block processed once everything
//! was published. Any failure before the mark leaves the block missing, and
//! the backfiller picks it up again on a later tick.

use crate::cache::AddressCache;
use crate::chain::Chain;
use crate::error::{ProcessError, RouteError};
use crate::pool::Task;
use crate::router::{ContractCreationPayload, InputDataPayload, LogPayload, Router};
use crate::stats::Stats;
use crate::store::ProgressStore;
use crate::types::{Block, Receipt};
use anyhow::Result;
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Which supervisor submitted a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Realtime,
    Backfill,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Realtime => f.write_str("realtime"),
            Origin::Backfill => f.write_str("backfill"),
        }
    }
}

/// Whether the node still has the state needed to replay a failed call.
#[derive(Debug, Clone, Copy)]
pub struct StateRetention {
    pub archive: bool,
    /// Blocks behind the head a non-archive node keeps state for.
    pub window: u64,
}

impl StateRetention {
    pub fn is_available(&self, block: u64, head: u64) -> bool {
        self.archive || head.saturating_sub(block) <= self.window
    }
}

pub struct BlockProcessor {
    chain: Arc<dyn Chain>,
    cache: Arc<AddressCache>,
    store: Arc<dyn ProgressStore>,
    router: Router,
    stats: Arc<Stats>,
    retention: StateRetention,
    cancel: CancellationToken,
}

impl BlockProcessor {
    pub fn new(
        chain: Arc<dyn Chain>,
        cache: Arc<AddressCache>,
        store: Arc<dyn ProgressStore>,
        router: Router,
        stats: Arc<Stats>,
        retention: StateRetention,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            chain,
            cache,
            store,
            router,
            stats,
            retention,
            cancel,
        }
    }

    /// Process one block and mark it on success.
    pub async fn process_block(&self, number: u64) -> Result<(), ProcessError> {
        let block = self
            .fetch(self.chain.get_block(number))
            .await?
            .ok_or_else(|| ProcessError::Integrity(format!("block {} not found", number)))?;
        if block.number != number {
            return Err(ProcessError::Integrity(format!(
                "asked for block {} but node returned {}",
                number, block.number
            )));
        }
        self.process_fetched(block).await
    }

    /// Fetch several blocks in one round trip, in the order asked for.
    pub async fn fetch_blocks(&self, numbers: &[u64]) -> Result<Vec<Block>, ProcessError> {
        let blocks = self.fetch(self.chain.get_blocks(numbers.to_vec())).await?;
        if blocks.len() != numbers.len() {
            return Err(ProcessError::Integrity(format!(
                "asked for {} blocks but node returned {}",
                numbers.len(),
                blocks.len()
            )));
        }
        for (block, number) in blocks.iter().zip(numbers) {
            if block.number != *number {
                return Err(ProcessError::Integrity(format!(
                    "asked for block {} but node returned {}",
                    number, block.number
                )));
            }
        }
        Ok(blocks)
    }

    /// Process a block whose header was already fetched, and mark it on success.
    pub async fn process_fetched(&self, block: Block) -> Result<(), ProcessError> {
        let number = block.number;
        let receipts = self.fetch(self.chain.get_receipts(number)).await?;
        if receipts.len() != block.transactions.len() {
            return Err(ProcessError::Integrity(format!(
                "block {} has {} transactions but {} receipts",
                number,
                block.transactions.len(),
                receipts.len()
            )));
        }

        for receipt in &receipts {
            if receipt.is_success() {
                self.process_success(&block, receipt).await?;
            } else {
                self.process_revert(&block, receipt).await?;
            }
        }

        self.store
            .mark_processed(number)
            .map_err(ProcessError::Store)?;
        Ok(())
    }

    /// Boxed task for the worker pool. Failures are logged and counted here.
    pub fn task(self: &Arc<Self>, number: u64, origin: Origin) -> Task {
        let processor = Arc::clone(self);
        Box::pin(async move {
            let result = processor.process_block(number).await;
            processor.report(number, origin, result);
        })
    }

    /// Like `task`, for a block fetched ahead of time.
    pub fn prefetched_task(self: &Arc<Self>, block: Block, origin: Origin) -> Task {
        let processor = Arc::clone(self);
        Box::pin(async move {
            let number = block.number;
            let result = processor.process_fetched(block).await;
            processor.report(number, origin, result);
        })
    }

    fn report(&self, number: u64, origin: Origin, result: Result<(), ProcessError>) {
        match result {
            Ok(()) => {
                self.stats.record_processed();
                debug!(block = number, %origin, "block processed");
            }
            Err(ProcessError::Cancelled) => {
                debug!(block = number, %origin, "block processing cancelled");
            }
            Err(e @ ProcessError::Store(_)) => {
                self.stats.record_failure();
                error!(block = number, %origin, error = %e, "failed to record block progress");
                self.stats.record_storage_failure();
            }
            Err(e) => {
                self.stats.record_failure();
                warn!(
                    block = number,
                    %origin,
                    kind = e.kind(),
                    error = %e,
                    "block processing failed, left for backfill"
                );
            }
        }
    }

    async fn process_success(&self, block: &Block, receipt: &Receipt) -> Result<(), ProcessError> {
        for log in &receipt.logs {
            if !self.cache.exists(&log.address) {
                continue;
            }
            let routed = self
                .router
                .process_log(LogPayload {
                    log,
                    timestamp: block.timestamp,
                })
                .await;
            self.isolate(block.number, routed)?;
        }

        if let Some(created) = receipt.contract_address {
            if self.cache.exists(&receipt.from) {
                let routed = self
                    .router
                    .process_contract_creation(ContractCreationPayload {
                        from: receipt.from,
                        block: block.number,
                        contract_address: created,
                        timestamp: block.timestamp,
                        tx_hash: receipt.transaction_hash,
                        success: true,
                    })
                    .await;
                self.isolate(block.number, routed)?;
            }
        }
        Ok(())
    }

    async fn process_revert(&self, block: &Block, receipt: &Receipt) -> Result<(), ProcessError> {
        // Failed deployments have no target to match against
        let Some(target) = receipt.to else {
            return Ok(());
        };
        if !self.cache.exists(&target) {
            return Ok(());
        }

        let head = self.stats.latest_head().max(block.number);
        if !self.retention.is_available(block.number, head) {
            warn!(
                block = block.number,
                tx = %receipt.transaction_hash,
                head,
                "state likely pruned, skipping reverted call"
            );
            return Ok(());
        }

        let tx = self
            .fetch(self.chain.get_transaction(receipt.transaction_hash))
            .await?;
        let contract = tx.to.unwrap_or(target);
        if !self.cache.exists(&contract) {
            return Ok(());
        }

        let revert_reason = match self
            .fetch(self.chain.get_revert_reason(tx.hash, block.number))
            .await
        {
            Ok(reason) => reason,
            Err(ProcessError::Cancelled) => return Err(ProcessError::Cancelled),
            Err(e) => {
                warn!(block = block.number, tx = %tx.hash, error = %e, "could not recover revert reason");
                String::new()
            }
        };

        let routed = self
            .router
            .process_input_data(InputDataPayload {
                from: tx.from,
                revert_reason,
                input: tx.input,
                block: block.number,
                contract_address: contract,
                timestamp: block.timestamp,
                tx_hash: tx.hash,
            })
            .await;
        self.isolate(block.number, routed)
    }

    /// Decode errors stay inside their handler; publish errors abort the block.
    fn isolate(&self, block: u64, routed: Result<(), RouteError>) -> Result<(), ProcessError> {
        match routed {
            Ok(()) => Ok(()),
            Err(RouteError::Decode { handler, source }) => {
                self.stats.record_decode_error();
                warn!(block, handler, error = %source, "handler could not decode event, skipping");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fetch<T>(&self, request: BoxFuture<'_, Result<T>>) -> Result<T, ProcessError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ProcessError::Cancelled),
            result = request => result.map_err(ProcessError::Fetch),
        }
    }
}
