//! Pipeline counters and the periodic stats line

use crate::cache::AddressCache;
use crate::pool::WorkerPool;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Shared counters updated by the processor and the supervisors.
///
/// Also owns the halt token: once consecutive storage failures reach the
/// limit the token is cancelled and the service shuts down with an error.
#[derive(Debug)]
pub struct Stats {
    latest_head: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    decode_errors: AtomicU64,
    storage_failures: AtomicU32,
    max_storage_failures: u32,
    halt: CancellationToken,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub latest_head: u64,
    pub processed: u64,
    pub failed: u64,
    pub decode_errors: u64,
    pub storage_failures: u32,
}

impl Stats {
    pub fn new(max_storage_failures: u32) -> Self {
        Self {
            latest_head: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            storage_failures: AtomicU32::new(0),
            max_storage_failures: max_storage_failures.max(1),
            halt: CancellationToken::new(),
        }
    }

    /// Remember the highest head seen so far.
    pub fn record_head(&self, block: u64) {
        self.latest_head.fetch_max(block, Ordering::Relaxed);
    }

    pub fn latest_head(&self) -> u64 {
        self.latest_head.load(Ordering::Relaxed)
    }

    /// A block was fully processed and marked. Clears the storage failure streak.
    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.storage_failures.store(0, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a progress store failure. Returns true when the streak reached
    /// the limit and the halt token was cancelled.
    pub fn record_storage_failure(&self) -> bool {
        let streak = self.storage_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if streak >= self.max_storage_failures {
            if !self.halt.is_cancelled() {
                error!(
                    consecutive = streak,
                    "progress store keeps failing, halting"
                );
            }
            self.halt.cancel();
            return true;
        }
        false
    }

    /// Cancelled when the process must stop because progress can no longer be recorded.
    pub fn halt_token(&self) -> CancellationToken {
        self.halt.clone()
    }

    pub fn is_halted(&self) -> bool {
        self.halt.is_cancelled()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            latest_head: self.latest_head.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            storage_failures: self.storage_failures.load(Ordering::SeqCst),
        }
    }
}

/// Log one stats line every `interval` until `shutdown` fires.
pub async fn run_reporter(
    stats: Arc<Stats>,
    pool: Arc<WorkerPool>,
    cache: Arc<AddressCache>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let s = stats.snapshot();
                info!(
                    head = s.latest_head,
                    processed = s.processed,
                    failed = s.failed,
                    decode_errors = s.decode_errors,
                    queued = pool.size(),
                    active_workers = pool.active_workers(),
                    watched = cache.len(),
                    "stats"
                );
            }
        }
    }
}
