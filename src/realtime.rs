//! Realtime head subscriber
//!
//! A supervisor task that owns one head subscription at a time. Every header
//! is handed to the worker pool and the upper bound is raised right away,
//! without waiting for the block to be processed. When the subscription
//! dies the supervisor waits out the resubscribe interval and opens a new
//! one, until it is stopped.

use crate::chain::{HeadSource, HeadSubscription};
use crate::pool::WorkerPool;
use crate::processor::{BlockProcessor, Origin};
use crate::stats::Stats;
use crate::store::ProgressStore;
use crate::types::Header;
use anyhow::anyhow;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Lifecycle of the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Disconnected,
    Subscribing,
    Streaming,
    /// Waiting before the next subscribe attempt.
    Backoff,
    Stopped,
}

/// How one subscription ended.
enum StreamEnd {
    Stopped,
    Failed(anyhow::Error),
}

pub struct RealtimeSyncer {
    source: Arc<dyn HeadSource>,
    pool: Arc<WorkerPool>,
    processor: Arc<BlockProcessor>,
    store: Arc<dyn ProgressStore>,
    stats: Arc<Stats>,
    resubscribe_interval: Duration,
    state: watch::Sender<SyncState>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeSyncer {
    pub fn new(
        source: Arc<dyn HeadSource>,
        pool: Arc<WorkerPool>,
        processor: Arc<BlockProcessor>,
        store: Arc<dyn ProgressStore>,
        stats: Arc<Stats>,
        resubscribe_interval: Duration,
    ) -> Arc<Self> {
        let (state, _) = watch::channel(SyncState::Disconnected);
        Arc::new(Self {
            source,
            pool,
            processor,
            store,
            stats,
            resubscribe_interval,
            state,
            cancel: CancellationToken::new(),
            handle: Mutex::new(None),
        })
    }

    /// Spawn the supervisor loop.
    pub fn start(self: &Arc<Self>) {
        let syncer = Arc::clone(self);
        let handle = tokio::spawn(async move { syncer.supervise().await });
        *self.handle.lock() = Some(handle);
    }

    /// Unsubscribe and wait for the supervisor to exit.
    ///
    /// Work already submitted to the pool is not waited for.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "realtime supervisor terminated abnormally");
            }
        }
        self.state.send_replace(SyncState::Stopped);
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    async fn supervise(&self) {
        loop {
            self.state.send_replace(SyncState::Subscribing);
            let subscribed = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.source.subscribe() => result,
            };

            match subscribed {
                Ok(subscription) => {
                    debug!("head subscription streaming");
                    self.state.send_replace(SyncState::Streaming);
                    match self.stream(subscription).await {
                        StreamEnd::Stopped => break,
                        StreamEnd::Failed(e) => {
                            warn!(error = %e, "head subscription lost");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to subscribe to new heads");
                }
            }

            self.state.send_replace(SyncState::Backoff);
            debug!(
                interval_secs = self.resubscribe_interval.as_secs(),
                "resubscribing after backoff"
            );
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.resubscribe_interval) => {}
            }
        }

        self.state.send_replace(SyncState::Stopped);
        debug!("realtime supervisor exited");
    }

    async fn stream(&self, mut subscription: HeadSubscription) -> StreamEnd {
        let end = loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break StreamEnd::Stopped,
                next = subscription.next() => next,
            };

            match next {
                Some(Ok(header)) => {
                    if !self.on_header(header).await {
                        break StreamEnd::Stopped;
                    }
                }
                Some(Err(e)) => break StreamEnd::Failed(e),
                None => break StreamEnd::Failed(anyhow!("head stream closed")),
            }
        };

        subscription.unsubscribe().await;
        end
    }

    /// Submit the block and raise the upper bound. Returns false once
    /// shutdown has begun and no more work should be submitted.
    async fn on_header(&self, header: Header) -> bool {
        let number = header.number;
        debug!(block = number, hash = %header.hash, "new head");
        self.stats.record_head(number);

        let task = self.processor.task(number, Origin::Realtime);
        let submitted = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return false,
            result = self.pool.submit(task) => result,
        };
        if let Err(e) = submitted {
            debug!(block = number, error = %e, "head not submitted");
            return false;
        }

        match self.store.advance_upper_bound(number) {
            Ok(upper) if upper > number => {
                debug!(block = number, upper, "head behind upper bound");
            }
            Ok(_) => {}
            Err(e) => {
                error!(block = number, error = %e, "failed to advance upper bound");
                self.stats.record_storage_failure();
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RocksProgressStore;
    use crate::testutil::{header, plain_processor, wait_until, ChannelHeadSource, MockChain};
    use tempfile::TempDir;

    struct Fixture {
        source: Arc<ChannelHeadSource>,
        chain: Arc<MockChain>,
        store: Arc<RocksProgressStore>,
        pool: Arc<WorkerPool>,
        syncer: Arc<RealtimeSyncer>,
        _dir: TempDir,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksProgressStore::open(dir.path()).unwrap());
        let chain = Arc::new(MockChain::new());
        let stats = Arc::new(Stats::new(5));
        let pool = Arc::new(WorkerPool::new(2, 16));
        let source = Arc::new(ChannelHeadSource::default());
        let processor = plain_processor(chain.clone(), store.clone(), stats.clone());

        let syncer = RealtimeSyncer::new(
            source.clone(),
            pool.clone(),
            processor,
            store.clone(),
            stats,
            Duration::from_millis(10),
        );

        Fixture {
            source,
            chain,
            store,
            pool,
            syncer,
            _dir: dir,
        }
    }

    fn upper(store: &RocksProgressStore) -> Option<u64> {
        store.get_upper_bound().unwrap()
    }

    #[tokio::test]
    async fn test_headers_submitted_and_upper_advanced() {
        let f = fixture();
        f.chain.add_empty_blocks(10..=11);
        let heads = f.source.push_subscription();
        f.syncer.start();

        heads.send(Ok(header(10))).await.unwrap();
        heads.send(Ok(header(11))).await.unwrap();
        wait_until(|| upper(&f.store) == Some(11)).await;

        f.syncer.stop().await;
        f.pool.stop().await;

        assert!(f.store.get_marker(10).unwrap().is_some());
        assert!(f.store.get_marker(11).unwrap().is_some());
        assert_eq!(f.syncer.state(), SyncState::Stopped);
    }

    #[tokio::test]
    async fn test_out_of_order_header_keeps_upper() {
        let f = fixture();
        f.chain.add_empty_blocks([29, 30]);
        let heads = f.source.push_subscription();
        f.syncer.start();

        heads.send(Ok(header(30))).await.unwrap();
        heads.send(Ok(header(29))).await.unwrap();
        wait_until(|| f.store.get_marker(29).unwrap().is_some()).await;

        assert_eq!(upper(&f.store), Some(30));
        f.syncer.stop().await;
        f.pool.stop().await;
    }

    #[tokio::test]
    async fn test_resubscribes_after_stream_error() {
        let f = fixture();
        f.chain.add_empty_blocks([20]);
        let first = f.source.push_subscription();
        let second = f.source.push_subscription();
        f.syncer.start();

        first.send(Err(anyhow!("connection reset"))).await.unwrap();
        second.send(Ok(header(20))).await.unwrap();
        wait_until(|| upper(&f.store) == Some(20)).await;

        assert_eq!(f.source.subscribe_count(), 2);
        f.syncer.stop().await;
        f.pool.stop().await;
    }

    #[tokio::test]
    async fn test_keeps_retrying_when_node_unreachable() {
        let f = fixture();
        f.syncer.start();

        // No subscriptions queued, every attempt fails
        wait_until(|| f.source.subscribe_count() >= 3).await;

        f.syncer.stop().await;
        assert_eq!(f.syncer.state(), SyncState::Stopped);
        f.pool.stop().await;
    }

    #[tokio::test]
    async fn test_closed_stream_triggers_resubscribe() {
        let f = fixture();
        let first = f.source.push_subscription();
        let _second = f.source.push_subscription();
        f.syncer.start();

        let mut states = f.syncer.subscribe_state();
        wait_until(|| f.syncer.state() == SyncState::Streaming).await;
        drop(first);

        wait_until(|| f.source.subscribe_count() == 2).await;
        states
            .wait_for(|s| *s == SyncState::Streaming)
            .await
            .unwrap();

        f.syncer.stop().await;
        f.pool.stop().await;
    }
}
