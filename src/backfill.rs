//! Gap detector and backfiller
//!
//! On a timer, asks the progress store which blocks between the bounds have
//! no presence marker and submits them to the worker pool. The interval is
//! short while a backlog remains and long once everything is covered. An idle
//! tick also compacts old markers.

use crate::error::ProcessError;
use crate::pool::{Task, WorkerPool};
use crate::processor::{BlockProcessor, Origin};
use crate::stats::Stats;
use crate::store::ProgressStore;
use anyhow::Result;
use dashmap::DashSet;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct BackfillConfig {
    /// Tick interval while blocks are missing.
    pub busy_interval: Duration,
    /// Tick interval once the range is covered.
    pub idle_interval: Duration,
    /// Most blocks submitted in one tick.
    pub batch_size: usize,
    /// Gaps larger than this need `force` to be replayed.
    pub max_backlog: u64,
    pub force: bool,
    /// Skip the tick while more tasks than this are waiting in the pool.
    pub skip_when_queued_above: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            busy_interval: Duration::from_secs(2),
            idle_interval: Duration::from_secs(30),
            batch_size: 100,
            max_backlog: 100_000,
            force: false,
            skip_when_queued_above: 1,
        }
    }
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillOutcome {
    /// Bounds not set yet.
    Uninitialized,
    /// Nothing missing. Carries the number of markers compacted away.
    Idle { compacted: u64 },
    /// Gap above the safety threshold and no override given.
    Halted { missing: u64 },
    /// Pool too busy, nothing submitted.
    Skipped { queued: usize },
    Enqueued { missing: u64, pushed: usize },
}

pub struct Backfiller {
    store: Arc<dyn ProgressStore>,
    pool: Arc<WorkerPool>,
    processor: Arc<BlockProcessor>,
    stats: Arc<Stats>,
    config: BackfillConfig,
    /// Blocks submitted and not yet finished.
    in_flight: Arc<DashSet<u64>>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Backfiller {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        pool: Arc<WorkerPool>,
        processor: Arc<BlockProcessor>,
        stats: Arc<Stats>,
        config: BackfillConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            pool,
            processor,
            stats,
            config,
            in_flight: Arc::new(DashSet::new()),
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        })
    }

    /// One reconciliation pass.
    ///
    /// With `skip_latest` the block at the upper bound is left alone, since
    /// the realtime subscriber is most likely still working on it.
    pub async fn run_once(&self, skip_latest: bool) -> Result<BackfillOutcome> {
        let (Some(lower), Some(upper)) =
            (self.store.get_lower_bound()?, self.store.get_upper_bound()?)
        else {
            return Ok(BackfillOutcome::Uninitialized);
        };
        let upper = if skip_latest {
            upper.saturating_sub(1)
        } else {
            upper
        };
        if upper < lower {
            return Ok(BackfillOutcome::Idle { compacted: 0 });
        }

        let missing = self.store.missing_between(lower, upper)?;
        if missing.is_empty() {
            let compacted = self.store.compact()?;
            if compacted > 0 {
                info!(compacted, lower, "compacted block markers");
            }
            return Ok(BackfillOutcome::Idle { compacted });
        }

        let count = missing.count();
        if count > self.config.max_backlog && !self.config.force {
            error!(
                missing = count,
                lower,
                upper,
                max_backlog = self.config.max_backlog,
                "backlog exceeds safety threshold, rerun with force to replay it"
            );
            return Ok(BackfillOutcome::Halted { missing: count });
        }

        let queued = self.pool.size();
        if queued > self.config.skip_when_queued_above {
            debug!(queued, missing = count, "pool busy, skipping backfill tick");
            return Ok(BackfillOutcome::Skipped { queued });
        }

        let batch: Vec<u64> = missing
            .iter()
            .filter(|block| !self.in_flight.contains(block))
            .take(self.config.batch_size)
            .collect();
        let pushed = self.submit_batch(batch).await;

        info!(missing = count, pushed, lower, upper, "backfill tick");
        Ok(BackfillOutcome::Enqueued {
            missing: count,
            pushed,
        })
    }

    /// Spawn the timer loop.
    pub fn start(self: &Arc<Self>) {
        let backfiller = Arc::clone(self);
        let handle = tokio::spawn(async move { backfiller.run().await });
        *self.handle.lock() = Some(handle);
    }

    /// Stop the timer loop. Submitted blocks keep running in the pool.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "backfill loop terminated abnormally");
            }
        }
    }

    /// Blocks currently submitted by the backfiller and not finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    async fn run(&self) {
        loop {
            let delay = match self.run_once(true).await {
                Ok(BackfillOutcome::Enqueued { .. }) | Ok(BackfillOutcome::Skipped { .. }) => {
                    self.config.busy_interval
                }
                Ok(_) => self.config.idle_interval,
                Err(e) => {
                    warn!(error = %e, "backfill tick failed");
                    self.stats.record_storage_failure();
                    self.config.idle_interval
                }
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        debug!("backfill loop exited");
    }

    /// Prefetch the headers of `batch` in one request and submit a task per
    /// block. Falls back to fetching each block inside its own task when the
    /// batch request fails. Returns the number of blocks submitted.
    async fn submit_batch(&self, batch: Vec<u64>) -> usize {
        if batch.is_empty() {
            return 0;
        }

        let fetched = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return 0,
            result = self.processor.fetch_blocks(&batch) => result,
        };
        let tasks: Vec<(u64, Task)> = match fetched {
            Ok(blocks) => blocks
                .into_iter()
                .map(|block| (block.number, self.processor.prefetched_task(block, Origin::Backfill)))
                .collect(),
            Err(ProcessError::Cancelled) => return 0,
            Err(e) => {
                warn!(
                    blocks = batch.len(),
                    first = batch[0],
                    error = %e,
                    "batch block fetch failed, fetching blocks one by one"
                );
                batch
                    .iter()
                    .map(|&block| (block, self.processor.task(block, Origin::Backfill)))
                    .collect()
            }
        };

        let mut pushed = 0;
        for (block, task) in tasks {
            if !self.in_flight.insert(block) {
                continue;
            }
            let guard = InFlightGuard {
                in_flight: Arc::clone(&self.in_flight),
                block,
            };
            let tracked: Task = Box::pin(async move {
                let _guard = guard;
                task.await;
            });

            // A refused task is dropped here, and its guard with it
            let submitted = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = self.pool.submit(tracked) => Some(result),
            };
            match submitted {
                Some(Ok(())) => pushed += 1,
                Some(Err(e)) => {
                    debug!(block, error = %e, "backfill submission refused");
                    break;
                }
                None => break,
            }
        }
        pushed
    }
}

/// Clears a block's in-flight entry when its task finishes, panics or is
/// dropped unrun.
struct InFlightGuard {
    in_flight: Arc<DashSet<u64>>,
    block: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.block);
    }
}
