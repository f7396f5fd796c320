//! Test doubles shared by the unit tests
//!
//! A scripted chain, a publisher that records what it receives, and a head
//! source fed by channels the test controls.

use crate::cache::AddressCache;
use crate::chain::{Chain, HeadSource, HeadSubscription};
use crate::event::Event;
use crate::handler::{default_router, HandlerContext};
use crate::processor::{BlockProcessor, StateRetention};
use crate::publisher::Publisher;
use crate::stats::Stats;
use crate::store::ProgressStore;
use crate::types::{Block, Header, Log, Receipt, Transaction};
use alloy_primitives::{Address, B256, U256};
use anyhow::Result;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Chain whose blocks, receipts and transactions are scripted by the test.
#[derive(Default)]
pub struct MockChain {
    blocks: Mutex<HashMap<u64, (Block, Vec<Receipt>)>>,
    transactions: Mutex<HashMap<B256, Transaction>>,
    revert_reasons: Mutex<HashMap<B256, String>>,
    failing_receipts: Mutex<HashSet<u64>>,
    panicking_receipts: Mutex<HashSet<u64>>,
    failing_batches: AtomicBool,
    batch_fetches: Mutex<Vec<Vec<u64>>>,
    block_fetches: Mutex<Vec<u64>>,
    latest: AtomicU64,
    receipt_fetches: Mutex<Vec<u64>>,
    tx_fetches: AtomicUsize,
    revert_fetches: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a block whose transactions are exactly the given receipts.
    pub fn add_block(&self, number: u64, timestamp: u64, receipts: Vec<Receipt>) {
        let block = Block {
            number,
            hash: word(number),
            timestamp,
            transactions: receipts.iter().map(|r| r.transaction_hash).collect(),
        };
        self.blocks.lock().insert(number, (block, receipts));
        self.latest.fetch_max(number, Ordering::SeqCst);
    }

    /// Script a block with no transactions.
    pub fn add_empty_blocks(&self, numbers: impl IntoIterator<Item = u64>) {
        for n in numbers {
            self.add_block(n, 1_700_000_000 + n, Vec::new());
        }
    }

    /// Script a block whose header lists more transactions than receipts returned.
    pub fn add_inconsistent_block(&self, number: u64) {
        let block = Block {
            number,
            hash: word(number),
            timestamp: 0,
            transactions: vec![B256::repeat_byte(0xee)],
        };
        self.blocks.lock().insert(number, (block, Vec::new()));
    }

    pub fn add_transaction(&self, tx: Transaction) {
        self.transactions.lock().insert(tx.hash, tx);
    }

    pub fn set_revert_reason(&self, tx_hash: B256, reason: &str) {
        self.revert_reasons.lock().insert(tx_hash, reason.to_string());
    }

    pub fn fail_receipts_for(&self, number: u64) {
        self.failing_receipts.lock().insert(number);
    }

    /// Panic on the next receipt request for `number` only.
    pub fn panic_receipts_once_for(&self, number: u64) {
        self.panicking_receipts.lock().insert(number);
    }

    /// Make every batched block request fail.
    pub fn fail_batches(&self) {
        self.failing_batches.store(true, Ordering::SeqCst);
    }

    /// Block numbers of each batched request, in call order.
    pub fn batch_fetches(&self) -> Vec<Vec<u64>> {
        self.batch_fetches.lock().clone()
    }

    /// Block numbers requested one at a time, in call order.
    pub fn block_fetches(&self) -> Vec<u64> {
        self.block_fetches.lock().clone()
    }

    pub fn heal_receipts_for(&self, number: u64) {
        self.failing_receipts.lock().remove(&number);
    }

    pub fn set_latest(&self, number: u64) {
        self.latest.store(number, Ordering::SeqCst);
    }

    /// Block numbers whose receipts were requested, in call order.
    pub fn receipt_fetches(&self) -> Vec<u64> {
        self.receipt_fetches.lock().clone()
    }

    pub fn tx_fetches(&self) -> usize {
        self.tx_fetches.load(Ordering::SeqCst)
    }

    pub fn revert_fetches(&self) -> usize {
        self.revert_fetches.load(Ordering::SeqCst)
    }
}

impl Chain for MockChain {
    fn get_block(&self, number: u64) -> BoxFuture<'_, Result<Option<Block>>> {
        self.block_fetches.lock().push(number);
        let block = self.blocks.lock().get(&number).map(|(b, _)| b.clone());
        Box::pin(async move { Ok(block) })
    }

    fn get_blocks(&self, numbers: Vec<u64>) -> BoxFuture<'_, Result<Vec<Block>>> {
        self.batch_fetches.lock().push(numbers.clone());
        if self.failing_batches.load(Ordering::SeqCst) {
            return Box::pin(async { Err(anyhow::anyhow!("batch request rejected")) });
        }
        let blocks = self.blocks.lock();
        let result: Result<Vec<Block>> = numbers
            .iter()
            .map(|n| {
                blocks
                    .get(n)
                    .map(|(b, _)| b.clone())
                    .ok_or_else(|| anyhow::anyhow!("block {} not scripted", n))
            })
            .collect();
        Box::pin(async move { result })
    }

    fn get_latest_block(&self) -> BoxFuture<'_, Result<u64>> {
        let latest = self.latest.load(Ordering::SeqCst);
        Box::pin(async move { Ok(latest) })
    }

    fn get_transaction(&self, hash: B256) -> BoxFuture<'_, Result<Transaction>> {
        self.tx_fetches.fetch_add(1, Ordering::SeqCst);
        let tx = self.transactions.lock().get(&hash).cloned();
        Box::pin(async move { tx.ok_or_else(|| anyhow::anyhow!("transaction {} not scripted", hash)) })
    }

    fn get_receipts(&self, number: u64) -> BoxFuture<'_, Result<Vec<Receipt>>> {
        self.receipt_fetches.lock().push(number);
        if self.panicking_receipts.lock().remove(&number) {
            panic!("receipt decoder blew up on block {}", number);
        }
        let failing = self.failing_receipts.lock().contains(&number);
        let receipts = self.blocks.lock().get(&number).map(|(_, r)| r.clone());
        Box::pin(async move {
            if failing {
                anyhow::bail!("connection reset fetching receipts for {}", number);
            }
            receipts.ok_or_else(|| anyhow::anyhow!("receipts for {} not scripted", number))
        })
    }

    fn get_revert_reason(&self, tx_hash: B256, _block: u64) -> BoxFuture<'_, Result<String>> {
        self.revert_fetches.fetch_add(1, Ordering::SeqCst);
        let reason = self.revert_reasons.lock().get(&tx_hash).cloned();
        Box::pin(async move { reason.ok_or_else(|| anyhow::anyhow!("state pruned")) })
    }
}

/// Publisher that stores every event it is given.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<Event>>,
    failing: AtomicBool,
    closed: AtomicBool,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        let publisher = Self::default();
        publisher.failing.store(true, Ordering::SeqCst);
        publisher
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Publisher for RecordingPublisher {
    fn send<'a>(&'a self, event: &'a Event) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                anyhow::bail!("stream unavailable");
            }
            self.events.lock().push(event.clone());
            Ok(())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        self.closed.store(true, Ordering::SeqCst);
        Box::pin(async {})
    }
}

/// Head source handing out pre-created channels, one per subscription.
#[derive(Default)]
pub struct ChannelHeadSource {
    pending: Mutex<VecDeque<mpsc::Receiver<Result<Header>>>>,
    subscribes: AtomicUsize,
}

impl ChannelHeadSource {
    /// Queue a subscription and return the sender that feeds it.
    pub fn push_subscription(&self) -> mpsc::Sender<Result<Header>> {
        let (tx, rx) = mpsc::channel(16);
        self.pending.lock().push_back(rx);
        tx
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }
}

impl HeadSource for ChannelHeadSource {
    fn subscribe(&self) -> BoxFuture<'_, Result<HeadSubscription>> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        let next = self.pending.lock().pop_front();
        Box::pin(async move {
            next.map(HeadSubscription::from_channel)
                .ok_or_else(|| anyhow::anyhow!("node unreachable"))
        })
    }
}

/// 32-byte big-endian word holding `n`.
pub fn word(n: u64) -> B256 {
    let mut raw = [0u8; 32];
    raw[24..].copy_from_slice(&n.to_be_bytes());
    B256::from(raw)
}

pub fn header(number: u64) -> Header {
    Header {
        number,
        hash: word(number),
        timestamp: 1_700_000_000 + number,
    }
}

pub fn tx_hash(n: u64) -> B256 {
    word(0x1000_0000 + n)
}

pub fn log(address: Address, topics: Vec<B256>, data: Vec<u8>, block: u64, index: u64, tx: B256) -> Log {
    Log {
        address,
        topics,
        data,
        log_index: index,
        transaction_hash: tx,
        block_number: block,
    }
}

pub fn log_with_topics(topics: Vec<B256>) -> Log {
    log(Address::repeat_byte(0x11), topics, Vec::new(), 1, 0, tx_hash(0))
}

pub fn success_receipt(tx: B256, from: Address, to: Address, block: u64, logs: Vec<Log>) -> Receipt {
    Receipt {
        transaction_hash: tx,
        status: 1,
        from,
        to: Some(to),
        contract_address: None,
        block_number: block,
        logs,
    }
}

pub fn failed_receipt(tx: B256, from: Address, to: Address, block: u64) -> Receipt {
    Receipt {
        transaction_hash: tx,
        status: 0,
        from,
        to: Some(to),
        contract_address: None,
        block_number: block,
        logs: Vec::new(),
    }
}

pub fn creation_receipt(tx: B256, from: Address, created: Address, block: u64) -> Receipt {
    Receipt {
        transaction_hash: tx,
        status: 1,
        from,
        to: None,
        contract_address: Some(created),
        block_number: block,
        logs: Vec::new(),
    }
}

pub fn transaction(hash: B256, from: Address, to: Address, input: Vec<u8>) -> Transaction {
    Transaction {
        hash,
        from,
        to: Some(to),
        value: U256::ZERO,
        gas: 100_000,
        input,
    }
}

/// Processor over `chain` and `store` with an empty address cache and an
/// archive node, so every scripted block is processed and marked.
pub fn plain_processor(
    chain: Arc<MockChain>,
    store: Arc<dyn ProgressStore>,
    stats: Arc<Stats>,
) -> Arc<BlockProcessor> {
    let cache = Arc::new(AddressCache::new());
    let router = default_router(
        HandlerContext::new(cache.clone(), []),
        Arc::new(RecordingPublisher::default()),
    )
    .expect("built-in handlers do not conflict");

    Arc::new(BlockProcessor::new(
        chain,
        cache,
        store,
        router,
        stats,
        StateRetention {
            archive: true,
            window: 0,
        },
        CancellationToken::new(),
    ))
}

/// Poll `condition` every few milliseconds, failing the test after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
