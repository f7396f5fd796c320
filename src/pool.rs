//! Bounded worker pool
//!
//! A fixed set of tokio workers pulling boxed futures from one bounded
//! queue. `submit` waits while the queue is full, which throttles the
//! realtime subscriber and the backfiller. A panicking task is caught and
//! logged; the worker keeps going.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::backtrace::Backtrace;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Unit of work run by the pool.
pub type Task = BoxFuture<'static, ()>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("worker pool is stopped")]
    Stopped,
}

/// Counters shared between the pool handle and its workers.
#[derive(Debug, Default)]
struct Counters {
    queued: AtomicUsize,
    active: AtomicUsize,
    panics: AtomicU64,
}

pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
    size: usize,
}

impl WorkerPool {
    /// Spawn `workers` workers behind a queue of `queue_size` slots.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(workers: usize, queue_size: usize) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel::<Task>(queue_size.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let counters = Arc::new(Counters::default());

        let handles = (0..workers)
            .map(|id| tokio::spawn(worker_loop(id, rx.clone(), counters.clone())))
            .collect();

        debug!(workers, queue_size, "worker pool started");

        Self {
            sender: Mutex::new(Some(tx)),
            workers: tokio::sync::Mutex::new(handles),
            counters,
            size: workers,
        }
    }

    /// Enqueue a task, waiting for a free slot if the queue is full.
    pub async fn submit(&self, task: Task) -> Result<(), PoolError> {
        let sender = self.sender.lock().clone().ok_or(PoolError::Stopped)?;

        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        if sender.send(task).await.is_err() {
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(PoolError::Stopped);
        }
        Ok(())
    }

    /// Tasks submitted but not yet picked up by a worker.
    pub fn size(&self) -> usize {
        self.counters.queued.load(Ordering::SeqCst)
    }

    /// Tasks currently executing.
    pub fn active_workers(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }

    /// Configured number of workers.
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Number of tasks that panicked since start.
    pub fn panics(&self) -> u64 {
        self.counters.panics.load(Ordering::Relaxed)
    }

    pub fn is_stopped(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Stop accepting work and wait until every queued and running task finished.
    ///
    /// Calling it again after the pool has drained returns immediately.
    pub async fn stop(&self) {
        // Dropping the last sender closes the queue once it is drained
        drop(self.sender.lock().take());

        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "pool worker terminated abnormally");
            }
        }
        debug!("worker pool drained");
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>,
    counters: Arc<Counters>,
) {
    loop {
        let task = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(task) = task else {
            break;
        };

        counters.queued.fetch_sub(1, Ordering::SeqCst);
        counters.active.fetch_add(1, Ordering::SeqCst);

        if let Err(payload) = AssertUnwindSafe(task).catch_unwind().await {
            counters.panics.fetch_add(1, Ordering::Relaxed);
            let backtrace = Backtrace::force_capture();
            error!(
                worker = id,
                panic = %panic_message(payload.as_ref()),
                backtrace = %backtrace,
                "worker pool task panicked"
            );
        }

        counters.active.fetch_sub(1, Ordering::SeqCst);
    }
    debug!(worker = id, "pool worker exiting");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
