//! Service wiring and lifecycle
//!
//! Builds the pipeline from a `Config`, bootstraps the progress bounds,
//! runs one full backfill pass, then starts the realtime subscriber, the
//! backfill loop and the stats reporter. Shutdown stops them in an order
//! that never submits work to a draining pool.

use crate::backfill::{BackfillConfig, BackfillOutcome, Backfiller};
use crate::cache::AddressCache;
use crate::chain::{Chain, HeadSource};
use crate::config::{load_optional_list, Config, PublisherKind};
use crate::handler::{default_router, HandlerContext};
use crate::pool::WorkerPool;
use crate::processor::{BlockProcessor, StateRetention};
use crate::publisher::{ConsolePublisher, DedupPublisher, Publisher, WebhookPublisher};
use crate::realtime::RealtimeSyncer;
use crate::rpc::RpcClient;
use crate::stats::{run_reporter, Stats};
use crate::store::{ProgressStore, RocksProgressStore};
use crate::ws::WsHeadSource;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// External collaborators the pipeline runs against.
pub struct Components {
    pub chain: Arc<dyn Chain>,
    pub heads: Arc<dyn HeadSource>,
    pub store: Arc<dyn ProgressStore>,
    pub cache: Arc<AddressCache>,
    pub publisher: Arc<dyn Publisher>,
    pub noisy: Vec<Address>,
}

impl Components {
    /// Connect to the node, open the store and load the address lists.
    pub fn from_config(config: &Config) -> Result<Self> {
        let timeout = config.request_timeout();

        let chain = Arc::new(RpcClient::new(config.chain.rpc_endpoint.clone(), timeout)?);
        let heads = Arc::new(WsHeadSource::new(config.chain.ws_endpoint.clone(), timeout));

        let store = Arc::new(
            RocksProgressStore::open(&config.core.db_path)
                .with_context(|| format!("Failed to open database at {:?}", config.core.db_path))?,
        );

        let watchlist = load_optional_list(config.cache.watchlist.as_deref())
            .context("Failed to load watchlist")?;
        let indexes = load_optional_list(config.cache.indexes.as_deref())
            .context("Failed to load index list")?;
        let blacklist = load_optional_list(config.cache.blacklist.as_deref())
            .context("Failed to load blacklist")?;
        let cache = Arc::new(AddressCache::bootstrap(&watchlist, &indexes, &blacklist));

        let inner: Arc<dyn Publisher> = match config.publisher.kind {
            PublisherKind::Console => Arc::new(ConsolePublisher),
            PublisherKind::Webhook => {
                let endpoint = config
                    .publisher
                    .endpoint
                    .clone()
                    .context("publisher.endpoint is required for the webhook publisher")?;
                Arc::new(WebhookPublisher::new(endpoint, timeout)?)
            }
        };
        let publisher = Arc::new(DedupPublisher::new(
            inner,
            Duration::from_secs(config.publisher.dedup_window_secs),
        ));

        Ok(Self {
            chain,
            heads,
            store,
            cache,
            publisher,
            noisy: config.cache.noisy_contracts.clone(),
        })
    }
}

/// Make sure both bounds exist and `upper` reaches the current head.
///
/// A fresh store starts at `start_block`, or at the head when it is 0 or
/// beyond the head. An existing lower bound is never moved.
pub async fn bootstrap_bounds(
    store: &dyn ProgressStore,
    chain: &dyn Chain,
    start_block: u64,
) -> Result<(u64, u64)> {
    let head = chain
        .get_latest_block()
        .await
        .context("Failed to get latest block number")?;

    let lower = match store.get_lower_bound()? {
        Some(lower) => {
            info!(lower, head, "resuming from existing progress");
            lower
        }
        None => {
            let lower = if start_block == 0 {
                head
            } else {
                start_block.min(head)
            };
            store.set_lower_bound(lower)?;
            info!(lower, head, "first run, lower bound set");
            lower
        }
    };
    let upper = store.advance_upper_bound(head)?;
    Ok((lower, upper))
}

/// A running pipeline.
pub struct Service {
    store: Arc<dyn ProgressStore>,
    publisher: Arc<dyn Publisher>,
    pool: Arc<WorkerPool>,
    stats: Arc<Stats>,
    realtime: Arc<RealtimeSyncer>,
    backfiller: Arc<Backfiller>,
    reporter: JoinHandle<()>,
    reporter_shutdown: CancellationToken,
    processing: CancellationToken,
}

impl Service {
    pub async fn start(config: &Config, components: Components) -> Result<Self> {
        let Components {
            chain,
            heads,
            store,
            cache,
            publisher,
            noisy,
        } = components;

        let stats = Arc::new(Stats::new(config.core.max_storage_failures));
        let ctx = HandlerContext::new(cache.clone(), noisy);
        let router = default_router(ctx, publisher.clone())?;
        let processing = CancellationToken::new();

        let processor = Arc::new(BlockProcessor::new(
            chain.clone(),
            cache.clone(),
            store.clone(),
            router,
            stats.clone(),
            StateRetention {
                archive: config.chain.archive_node,
                window: config.chain.state_retention_blocks,
            },
            processing.clone(),
        ));

        let workers = config.core.workers();
        let pool = Arc::new(WorkerPool::new(workers, config.core.queue_size));
        info!(workers, queue_size = config.core.queue_size, "worker pool ready");

        let (lower, upper) =
            bootstrap_bounds(store.as_ref(), chain.as_ref(), config.chain.start_block).await?;
        stats.record_head(upper);
        info!(lower, upper, "progress bounds");

        let backfiller = Backfiller::new(
            store.clone(),
            pool.clone(),
            processor.clone(),
            stats.clone(),
            BackfillConfig {
                busy_interval: Duration::from_secs(config.backfill.busy_interval_secs),
                idle_interval: Duration::from_secs(config.backfill.idle_interval_secs),
                batch_size: config.core.batch_size,
                max_backlog: config.backfill.max_backlog,
                force: config.backfill.force,
                skip_when_queued_above: config.backfill.skip_when_queued_above,
            },
        );

        // Catch up on everything before the live stream starts
        match backfiller.run_once(false).await? {
            BackfillOutcome::Halted { missing } => {
                warn!(missing, "initial backfill refused, continuing with live heads only");
            }
            outcome => info!(?outcome, "initial backfill pass"),
        }

        let realtime = RealtimeSyncer::new(
            heads,
            pool.clone(),
            processor,
            store.clone(),
            stats.clone(),
            Duration::from_secs(config.realtime.resubscribe_interval_secs),
        );
        realtime.start();
        backfiller.start();

        let reporter_shutdown = CancellationToken::new();
        let reporter = tokio::spawn(run_reporter(
            stats.clone(),
            pool.clone(),
            cache,
            Duration::from_secs(config.core.stats_interval_secs.max(1)),
            reporter_shutdown.clone(),
        ));

        Ok(Self {
            store,
            publisher,
            pool,
            stats,
            realtime,
            backfiller,
            reporter,
            reporter_shutdown,
            processing,
        })
    }

    /// Cancelled when repeated storage failures require the process to stop.
    pub fn halt_token(&self) -> CancellationToken {
        self.stats.halt_token()
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// Stop everything in order, bounded by `grace`.
    ///
    /// Fails if the grace period ran out or the service had halted.
    pub async fn shutdown(self, grace: Duration) -> Result<()> {
        let Service {
            store,
            publisher,
            pool,
            stats,
            realtime,
            backfiller,
            reporter,
            reporter_shutdown,
            processing,
        } = self;

        let halted = stats.is_halted();
        if halted {
            // Nothing could be marked anyway
            processing.cancel();
        }

        let drained = tokio::time::timeout(grace, async {
            realtime.stop().await;
            info!("realtime subscriber stopped");
            backfiller.stop().await;
            info!("backfill loop stopped");

            reporter_shutdown.cancel();
            if let Err(e) = reporter.await {
                warn!(error = %e, "stats reporter ended abnormally");
            }

            pool.stop().await;
            info!("worker pool drained");
            publisher.close().await;

            match store.compact() {
                Ok(removed) => info!(removed, "progress store compacted"),
                Err(e) => warn!(error = %e, "final compaction failed"),
            }
        })
        .await;

        if drained.is_err() {
            error!(grace_secs = grace.as_secs(), "shutdown grace period exceeded");
            processing.cancel();
            anyhow::bail!("shutdown did not complete within {:?}", grace);
        }
        if halted {
            anyhow::bail!("halted after repeated progress store failures");
        }
        Ok(())
    }
}

/// Run until Ctrl+C or a storage halt, then shut down.
pub async fn run(config: Config) -> Result<()> {
    let components = Components::from_config(&config)?;
    let service = Service::start(&config, components).await?;
    let halt = service.halt_token();

    tokio::select! {
        biased;
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
        _ = halt.cancelled() => {
            error!("progress store unusable, shutting down");
        }
    }

    service
        .shutdown(Duration::from_secs(config.core.shutdown_grace_secs))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{header, wait_until, ChannelHeadSource, MockChain, RecordingPublisher};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_bootstrap_fresh_and_resumed() {
        let dir = TempDir::new().unwrap();
        let store = RocksProgressStore::open(dir.path()).unwrap();
        let chain = MockChain::new();
        chain.set_latest(500);

        assert_eq!(bootstrap_bounds(&store, &chain, 450).await.unwrap(), (450, 500));

        chain.set_latest(520);
        assert_eq!(bootstrap_bounds(&store, &chain, 10).await.unwrap(), (450, 520));
    }

    #[tokio::test]
    async fn test_bootstrap_defaults_to_head() {
        let dir = TempDir::new().unwrap();
        let store = RocksProgressStore::open(dir.path()).unwrap();
        let chain = MockChain::new();
        chain.set_latest(77);

        assert_eq!(bootstrap_bounds(&store, &chain, 0).await.unwrap(), (77, 77));
    }

    #[tokio::test]
    async fn test_start_catches_up_and_shuts_down() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksProgressStore::open(dir.path()).unwrap());
        let chain = Arc::new(MockChain::new());
        chain.add_empty_blocks(40..=51);
        chain.set_latest(50);
        let heads = Arc::new(ChannelHeadSource::default());
        let live = heads.push_subscription();
        let publisher = Arc::new(RecordingPublisher::default());

        let mut config = Config::default();
        config.chain.start_block = 40;
        config.core.pool_size = 2;

        let service = Service::start(
            &config,
            Components {
                chain: chain.clone(),
                heads: heads.clone(),
                store: store.clone(),
                cache: Arc::new(AddressCache::new()),
                publisher: publisher.clone(),
                noisy: Vec::new(),
            },
        )
        .await
        .unwrap();

        live.send(Ok(header(51))).await.unwrap();
        wait_until(|| store.get_upper_bound().unwrap() == Some(51)).await;
        wait_until(|| store.get_marker(51).unwrap().is_some()).await;

        service.shutdown(Duration::from_secs(5)).await.unwrap();

        assert!(store.missing_between(40, 51).unwrap().is_empty());
        assert!(publisher.is_closed());
    }
}
