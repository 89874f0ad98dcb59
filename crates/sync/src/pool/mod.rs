//! Bounded-concurrency worker pool.
//!
//! Items go through a bounded queue to a dispatcher, which runs at most
//! `concurrency` of them at once. Submitting blocks while the queue is full,
//! which pushes back on whoever is producing items. Every accepted item comes
//! back out exactly once on the completion channel, in whatever order the
//! work finishes.

mod keyed;
mod worker;

use crate::item::{Completion, WorkItem};
use keyed::KeyedLock;
use regsync_store::CacheHandle;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    /// Maximum items being processed at once.
    pub concurrency: usize,
    /// Items accepted ahead of the workers before [`submit()`](PoolHandle::submit) blocks.
    pub buffer: usize,
}
impl Default for PoolOptions {
    fn default() -> Self {
        Self { concurrency: 20, buffer: 16 }
    }
}

/// The pool no longer accepts work; the item is handed back untouched.
#[derive(Debug)]
pub struct Rejected(pub WorkItem);

/// A cheap, clonable way to feed and observe a [`WorkerPool`].
#[derive(Debug, Clone)]
pub struct PoolHandle {
    queue: mpsc::Sender<WorkItem>,
    closed: CancellationToken,
    outstanding: Arc<watch::Sender<usize>>,
}
impl PoolHandle {
    /// Queue `item`, waiting for room if the pool is saturated.
    ///
    /// Cancel-safe: dropping the future before it resolves means the item
    /// was not accepted, and no completion will be produced for it.
    pub async fn submit(&self, item: WorkItem) -> Result<(), Rejected> {
        if self.closed.is_cancelled() {
            return Err(Rejected(item));
        }
        let permit = tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            permit = self.queue.reserve() => permit.ok(),
        };
        let Some(permit) = permit else {
            return Err(Rejected(item));
        };
        self.outstanding.send_modify(|n| *n += 1);
        permit.send(item);
        Ok(())
    }

    /// Whether [`drain()`](WorkerPool::drain) has begun.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Accepted items whose completion hasn't been delivered yet.
    pub fn outstanding(&self) -> usize {
        *self.outstanding.borrow()
    }

    /// Wait until every accepted item has completed. The pool stays open.
    pub async fn wait_idle(&self) {
        let mut outstanding = self.outstanding.subscribe();
        // The sender is owned by `self`, so the channel can't close under us.
        _ = outstanding.wait_for(|n| *n == 0).await;
    }
}

/// Runs [`WorkItem`]s against a cache store with bounded concurrency.
///
/// # Examples
///
/// ```no_run
/// use regsync_store::CacheHandle;
/// use regsync_sync::pool::{PoolOptions, WorkerPool};
///
/// # async fn example(store: CacheHandle, items: Vec<regsync_sync::WorkItem>) {
/// let (pool, mut completions) = WorkerPool::new(store, PoolOptions::default());
/// let handle = pool.handle();
/// tokio::spawn(async move {
///     for item in items {
///         if handle.submit(item).await.is_err() {
///             break;
///         }
///     }
/// });
/// tokio::spawn(async move {
///     while let Some(completion) = completions.recv().await {
///         println!("{}: {:?}", completion.item.name, completion.result.is_ok());
///     }
/// });
/// pool.drain().await;
/// # }
/// ```
pub struct WorkerPool {
    handle: PoolHandle,
    dispatcher: JoinHandle<()>,
}
impl WorkerPool {
    /// Start the pool. Must be called from within a Tokio runtime.
    ///
    /// The returned receiver must be consumed, or workers will block trying
    /// to deliver completions.
    pub fn new(store: CacheHandle, options: PoolOptions) -> (Self, mpsc::Receiver<Completion>) {
        let concurrency = options.concurrency.max(1);
        let (queue, rx) = mpsc::channel(options.buffer.max(1));
        let (completions, completed) = mpsc::channel(concurrency);
        let handle = PoolHandle {
            queue,
            closed: CancellationToken::new(),
            outstanding: Arc::new(watch::Sender::new(0)),
        };
        let dispatcher = Dispatcher {
            store,
            concurrency,
            locks: KeyedLock::default(),
            completions,
            closed: handle.closed.clone(),
            outstanding: handle.outstanding.clone(),
        };
        let pool = Self { handle, dispatcher: tokio::spawn(dispatcher.run(rx)) };
        (pool, completed)
    }

    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    pub async fn submit(&self, item: WorkItem) -> Result<(), Rejected> {
        self.handle.submit(item).await
    }

    pub async fn wait_idle(&self) {
        self.handle.wait_idle().await
    }

    /// Stop accepting new items, then wait for everything already accepted
    /// to complete.
    pub async fn drain(self) {
        tracing::debug!(outstanding = self.handle.outstanding(), "Draining worker pool");
        self.handle.closed.cancel();
        if let Err(e) = self.dispatcher.await {
            tracing::error!(error = %e, "Worker pool dispatcher failed");
        }
    }
}

struct Dispatcher {
    store: CacheHandle,
    concurrency: usize,
    locks: KeyedLock,
    completions: mpsc::Sender<Completion>,
    closed: CancellationToken,
    outstanding: Arc<watch::Sender<usize>>,
}
impl Dispatcher {
    async fn run(self, mut rx: mpsc::Receiver<WorkItem>) {
        let mut workers = JoinSet::new();
        let mut closing = false;
        loop {
            let item = tokio::select! {
                _ = self.closed.cancelled(), if !closing => {
                    // Refuse new sends; whatever is already queued still comes
                    // out of `recv()` below.
                    rx.close();
                    closing = true;
                    continue;
                },
                item = rx.recv() => item,
            };
            let Some(item) = item else {
                break;
            };
            while workers.len() >= self.concurrency {
                self.reap(workers.join_next().await);
            }
            let store = self.store.clone();
            let locks = self.locks.clone();
            let completions = self.completions.clone();
            let outstanding = self.outstanding.clone();
            workers.spawn(async move {
                let completion = worker::process(store, locks, item).await;
                if completions.send(completion).await.is_err() {
                    tracing::warn!("Completion receiver dropped; result discarded");
                }
                outstanding.send_modify(|n| *n = n.saturating_sub(1));
            });
            while let Some(joined) = workers.try_join_next() {
                self.reap(Some(joined));
            }
        }
        while let Some(joined) = workers.join_next().await {
            self.reap(Some(joined));
        }
        tracing::debug!("Worker pool drained");
    }

    fn reap(&self, joined: Option<Result<(), tokio::task::JoinError>>) {
        // Panics are caught inside the worker; this only fires on runtime
        // shutdown.
        if let Some(Err(e)) = joined {
            tracing::error!(error = %e, "Worker task did not finish");
        }
    }
}
