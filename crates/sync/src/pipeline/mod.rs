//! The sync pipeline.
//!
//! One run goes through these phases:
//! 1. Optionally pin the cache staleness override ([`StalenessGuard`]).
//! 2. Optionally reconcile the existing cache, and wait for that work.
//! 3. Follow the change feed: resolve each change (bounded, in feed order),
//!    submit it to the worker pool, and checkpoint completed sequences as
//!    the [`CursorTracker`] allows.
//! 4. On shutdown or when the feed ends: stop submitting, drain the pool,
//!    flush the last checkpoint and restore the staleness setting.

mod state;
#[cfg(test)]
mod tests;

pub use self::state::PipelineState;
use crate::cursor::{CommitPolicy, CursorTracker};
use crate::error::{ErrorKind, Result};
use crate::item::{Completion, Origin, Outcome, WorkItem};
use crate::pool::{PoolOptions, WorkerPool};
use crate::reconcile::{OriginFilter, ReconcileReport, reconcile};
use crate::tuning::StalenessGuard;
use exn::ResultExt;
use futures::StreamExt;
use regsync_checkpoint::{CheckpointStore, StateHandle};
use regsync_registry::{Cursor, FeedHandle, ResolverHandle};
use regsync_store::{CacheHandle, ManifestEntry};
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Tracing target of the one-line-per-package activity log.
pub const ACTIVITY_TARGET: &str = "regsync::activity";

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub pool: PoolOptions,
    /// Metadata lookups allowed in flight ahead of the pool.
    pub resolve_concurrency: usize,
    pub reconcile: bool,
    /// Staleness threshold to hold while running; `None` leaves it alone.
    pub staleness: Option<u64>,
    /// Follow from here instead of from the checkpoint.
    pub since: Option<Cursor>,
    pub commit_policy: CommitPolicy,
}
impl Default for PipelineOptions {
    fn default() -> Self {
        let pool = PoolOptions::default();
        Self {
            pool,
            resolve_concurrency: pool.concurrency,
            reconcile: false,
            staleness: None,
            since: None,
            commit_policy: CommitPolicy::default(),
        }
    }
}

/// Totals for one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub added: u64,
    pub already_warm: u64,
    pub invalidated: u64,
    pub not_cached: u64,
    pub failed: u64,
    /// Changes dropped because their metadata couldn't be resolved.
    pub skipped: u64,
    pub reconciled: Option<ReconcileReport>,
    /// Last checkpoint written during this run.
    pub committed: Option<u64>,
}
impl Summary {
    fn record(&mut self, completion: &Completion) {
        let counter = match completion.result {
            Ok(Outcome::Added) => &mut self.added,
            Ok(Outcome::AlreadyWarm) => &mut self.already_warm,
            Ok(Outcome::Invalidated) => &mut self.invalidated,
            Ok(Outcome::NotCached) => &mut self.not_cached,
            Err(_) => &mut self.failed,
        };
        *counter += 1;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps a cache store in sync with a change feed.
///
/// # Examples
///
/// ```no_run
/// use regsync_checkpoint::{CheckpointStore, StateHandle};
/// use regsync_registry::{FeedHandle, ResolverHandle};
/// use regsync_store::CacheHandle;
/// use regsync_sync::pipeline::{Pipeline, PipelineOptions};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example(
/// #     feed: FeedHandle,
/// #     resolver: ResolverHandle,
/// #     store: CacheHandle,
/// #     checkpoint: CheckpointStore,
/// #     state: StateHandle,
/// # ) -> regsync_sync::error::Result<()> {
/// let pipeline = Pipeline::new(feed, resolver, store, checkpoint, state, PipelineOptions::default());
/// let shutdown = CancellationToken::new();
/// tokio::spawn({
///     let shutdown = shutdown.clone();
///     async move {
///         tokio::time::sleep(std::time::Duration::from_secs(60)).await;
///         shutdown.cancel();
///     }
/// });
/// let summary = pipeline.run(shutdown).await?;
/// println!("added {} packages", summary.added);
/// # Ok(())
/// # }
/// ```
pub struct Pipeline {
    feed: FeedHandle,
    resolver: ResolverHandle,
    store: CacheHandle,
    checkpoint: CheckpointStore,
    state: StateHandle,
    filter: Arc<dyn OriginFilter>,
    options: PipelineOptions,
    status: watch::Sender<PipelineState>,
}
impl Pipeline {
    pub fn new(
        feed: FeedHandle,
        resolver: ResolverHandle,
        store: CacheHandle,
        checkpoint: CheckpointStore,
        state: StateHandle,
        options: PipelineOptions,
    ) -> Self {
        Self {
            feed,
            resolver,
            store,
            checkpoint,
            state,
            filter: Arc::new(|_: &ManifestEntry| true),
            options,
            status: watch::Sender::new(PipelineState::Idle),
        }
    }

    /// Restrict reconciliation to cache entries `filter` accepts. Without
    /// one, every cached package is reconciled.
    pub fn with_filter(mut self, filter: impl OriginFilter + 'static) -> Self {
        self.filter = Arc::new(filter);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.status.subscribe()
    }

    pub fn state(&self) -> PipelineState {
        *self.status.borrow()
    }

    fn transition(&self, state: PipelineState) {
        let previous = self.status.send_replace(state);
        tracing::debug!(from = %previous, to = %state, "Pipeline state changed");
    }

    /// Run until `shutdown` is cancelled or the feed ends.
    ///
    /// Errors only for problems that prevent starting at all; per-package
    /// failures are logged and counted in the [`Summary`].
    pub async fn run(&self, shutdown: CancellationToken) -> Result<Summary> {
        let result = match self.options.staleness {
            Some(value) => StalenessGuard::scope(&*self.store, &*self.state, value, self.sync(&shutdown)).await,
            None => self.sync(&shutdown).await,
        };
        self.transition(PipelineState::Stopped);
        result
    }

    async fn sync(&self, shutdown: &CancellationToken) -> Result<Summary> {
        let start = match self.options.since {
            Some(cursor) => cursor,
            None => self.checkpoint.get().await.or_raise(|| ErrorKind::Checkpoint)?,
        };
        let (pool, completions) = WorkerPool::new(self.store.clone(), self.options.pool);
        let tracker = Arc::new(Mutex::new(CursorTracker::new(self.options.commit_policy, start)));
        let committer = tokio::spawn(commit(completions, tracker.clone(), self.checkpoint.clone()));

        let mut reconciled = None;
        if self.options.reconcile && !shutdown.is_cancelled() {
            self.transition(PipelineState::Reconciling);
            let handle = pool.handle();
            let report = reconcile(
                &*self.store,
                &*self.resolver,
                &*self.filter,
                &handle,
                self.options.resolve_concurrency,
                shutdown,
            )
            .await;
            tracing::info!(
                listed = report.listed,
                foreign = report.foreign,
                submitted = report.submitted,
                unresolved = report.unresolved,
                "Reconciliation submitted; waiting for it to finish"
            );
            tokio::select! {
                _ = shutdown.cancelled() => {},
                _ = handle.wait_idle() => {},
            }
            reconciled = Some(report);
        }

        let mut skipped = 0;
        if !shutdown.is_cancelled() {
            self.transition(PipelineState::Following);
            skipped = self.follow(start, &pool, &tracker, shutdown).await;
        }

        self.transition(PipelineState::ShuttingDown);
        pool.drain().await;
        let mut summary = committer.await.map_err(|e| exn::Exn::from(ErrorKind::Panicked(e.to_string())))?;
        summary.skipped = skipped;
        summary.reconciled = reconciled;
        tracing::info!(
            added = summary.added,
            already_warm = summary.already_warm,
            invalidated = summary.invalidated,
            not_cached = summary.not_cached,
            failed = summary.failed,
            skipped = summary.skipped,
            committed = ?summary.committed,
            "Sync stopped"
        );
        Ok(summary)
    }

    /// Submit changes until shutdown or the end of the feed. Returns how many
    /// changes were skipped.
    async fn follow(
        &self,
        start: Cursor,
        pool: &WorkerPool,
        tracker: &Mutex<CursorTracker>,
        shutdown: &CancellationToken,
    ) -> u64 {
        let feed = self.feed.name();
        tracing::info!(feed, since = %start, "Following change feed");
        let resolver = &*self.resolver;
        let mut changes = pin!(
            self.feed
                .subscribe(start)
                .filter_map(|change| {
                    futures::future::ready(match change {
                        Ok(change) => Some(change),
                        Err(e) => {
                            tracing::warn!(feed, error = ?e, "Change feed error");
                            None
                        },
                    })
                })
                .map(|change| async move {
                    let resolved = resolver.resolve(&change.id).await;
                    (change, resolved)
                })
                .buffered(self.options.resolve_concurrency.max(1))
        );

        let mut skipped = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = changes.next() => next,
            };
            let Some((change, resolved)) = next else {
                tracing::info!(feed, "Change feed ended");
                break;
            };
            let metadata = match resolved {
                Ok(metadata) => metadata,
                Err(e) => {
                    skipped += 1;
                    tracing::warn!(seq = change.seq, package = %change.id, error = ?e, "Could not resolve package; skipping change");
                    continue;
                },
            };
            lock(tracker).register(change.seq);
            let item = WorkItem::from_metadata(Origin::Feed(change.seq), metadata);
            let submitted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                submitted = pool.submit(item) => Some(submitted),
            };
            if !matches!(submitted, Some(Ok(()))) {
                lock(tracker).abandon(change.seq);
                break;
            }
        }
        skipped
    }
}

/// Consume completions: log them, count them, and persist whatever
/// checkpoint the tracker releases.
async fn commit(
    mut completions: mpsc::Receiver<Completion>,
    tracker: Arc<Mutex<CursorTracker>>,
    checkpoint: CheckpointStore,
) -> Summary {
    let mut summary = Summary::default();
    // Advanced past by the tracker but not yet on disk.
    let mut unsaved = None;
    while let Some(completion) = completions.recv().await {
        log_activity(&completion);
        summary.record(&completion);
        let Origin::Feed(seq) = completion.item.origin else {
            continue;
        };
        let Some(next) = lock(&tracker).complete(seq) else {
            continue;
        };
        match checkpoint.set(next).await {
            Ok(()) => {
                tracing::debug!(seq = next, "Saved checkpoint");
                summary.committed = Some(next);
                unsaved = None;
            },
            Err(e) => {
                tracing::error!(seq = next, error = ?e, "Could not save checkpoint");
                unsaved = Some(next);
            },
        }
    }
    // The pool has drained, so nothing later will write this one.
    if let Some(seq) = unsaved {
        match checkpoint.set(seq).await {
            Ok(()) => {
                tracing::info!(seq, "Saved checkpoint on retry");
                summary.committed = Some(seq);
            },
            Err(e) => tracing::error!(seq, error = ?e, "Could not save final checkpoint; it will be replayed"),
        }
    }
    summary
}

fn log_activity(completion: &Completion) {
    let item = &completion.item;
    let version = item.version.as_deref().unwrap_or("*");
    match &completion.result {
        Ok(outcome) => tracing::info!(
            target: ACTIVITY_TARGET,
            seq = %item.origin,
            package = %item.name,
            version,
            outcome = %outcome,
            "{} {}@{} {}",
            item.origin,
            item.name,
            version,
            outcome
        ),
        Err(e) => tracing::warn!(
            seq = %item.origin,
            package = %item.name,
            version,
            error = ?e,
            "Cache update failed"
        ),
    }
}
