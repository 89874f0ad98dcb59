//! Startup reconciliation.
//!
//! The change feed only tells us about changes from now on. Anything that
//! went stale while the process wasn't running is caught by walking the
//! existing cache once at startup and re-checking every package against the
//! registry.

use crate::item::{Origin, WorkItem};
use crate::pool::{PoolHandle, Rejected};
use futures::StreamExt;
use regsync_registry::MetadataResolver;
use regsync_store::{CacheStore, ManifestEntry};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Decides which cached packages are ours to reconcile.
pub trait OriginFilter: Send + Sync {
    fn accepts(&self, entry: &ManifestEntry) -> bool;
}

impl<F> OriginFilter for F
where
    F: Fn(&ManifestEntry) -> bool + Send + Sync,
{
    fn accepts(&self, entry: &ManifestEntry) -> bool {
        self(entry)
    }
}

/// Accepts packages that were fetched from a particular registry.
#[derive(Debug, Clone)]
pub struct RegistryOrigin {
    prefix: String,
}
impl RegistryOrigin {
    pub fn new(registry: impl Into<String>) -> Self {
        Self { prefix: registry.into() }
    }
}
impl OriginFilter for RegistryOrigin {
    fn accepts(&self, entry: &ManifestEntry) -> bool {
        entry.resolved_from.as_deref().is_some_and(|url| url.starts_with(&self.prefix))
    }
}

/// What a reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Manifests read from the cache.
    pub listed: u64,
    /// Manifests that couldn't be read.
    pub unreadable: u64,
    /// Manifests the origin filter rejected.
    pub foreign: u64,
    /// Distinct packages handed to the worker pool.
    pub submitted: u64,
    /// Packages whose metadata couldn't be resolved.
    pub unresolved: u64,
}

/// Re-check every cached package from an accepted origin.
///
/// Submits one [`Origin::Reconcile`] item per distinct package name, and
/// returns as soon as the last one is submitted; it does not wait for the
/// work itself. Stops early, without error, on `shutdown`.
#[instrument(skip_all, fields(store = store.name()))]
pub async fn reconcile(
    store: &dyn CacheStore,
    resolver: &dyn MetadataResolver,
    filter: &dyn OriginFilter,
    pool: &PoolHandle,
    concurrency: usize,
    shutdown: &CancellationToken,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let mut names = Vec::new();
    let mut seen = HashSet::new();
    let mut manifests = store.manifests();
    while let Some(entry) = manifests.next().await {
        match entry {
            Ok(entry) => {
                report.listed += 1;
                if !filter.accepts(&entry) {
                    report.foreign += 1;
                } else if seen.insert(entry.name.clone()) {
                    names.push(entry.name);
                }
            },
            Err(e) => {
                report.unreadable += 1;
                tracing::warn!(error = ?e, "Skipping unreadable cache entry");
            },
        }
    }
    drop(manifests);
    tracing::debug!(listed = report.listed, packages = names.len(), "Listed cached packages");

    let mut resolved = futures::stream::iter(names)
        .map(|name| async move {
            let result = resolver.resolve(&name).await;
            (name, result)
        })
        .buffer_unordered(concurrency.max(1));
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            next = resolved.next() => next,
        };
        let Some((name, result)) = next else {
            break;
        };
        let metadata = match result {
            Ok(metadata) => metadata,
            Err(e) => {
                report.unresolved += 1;
                tracing::warn!(package = %name, error = ?e, "Could not resolve cached package");
                continue;
            },
        };
        let submitted = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            submitted = pool.submit(WorkItem::from_metadata(Origin::Reconcile, metadata)) => submitted,
        };
        match submitted {
            Ok(()) => report.submitted += 1,
            Err(Rejected(item)) => {
                tracing::debug!(package = %item.name, "Worker pool closed during reconciliation");
                break;
            },
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::Outcome;
    use crate::pool::{PoolOptions, WorkerPool};
    use regsync_registry::resolve::MockResolver;
    use regsync_store::backend::MockCacheStore;
    use std::sync::Arc;

    const NPM: &str = "https://registry.npmjs.org/";

    fn entry(name: &str, version: &str, from: Option<&str>) -> ManifestEntry {
        ManifestEntry {
            name: name.to_string(),
            version: version.to_string(),
            resolved_from: from.map(|prefix| format!("{prefix}{name}/-/{name}-{version}.tgz")),
        }
    }

    #[test]
    fn test_registry_origin() {
        let filter = RegistryOrigin::new(NPM);
        assert!(filter.accepts(&entry("foo", "1.0.0", Some(NPM))));
        assert!(!filter.accepts(&entry("foo", "1.0.0", Some("https://npm.internal/"))));
        assert!(!filter.accepts(&entry("foo", "1.0.0", None)));
    }

    #[test]
    fn test_closure_filter() {
        let filter = |entry: &ManifestEntry| entry.name.starts_with("@acme/");
        assert!(filter.accepts(&entry("@acme/widget", "1.0.0", None)));
        assert!(!filter.accepts(&entry("widget", "1.0.0", None)));
    }

    #[tokio::test]
    async fn test_reconcile() {
        let store = Arc::new(
            MockCacheStore::with_packages([("foo", "1.0.0"), ("gone", "0.1.0")]).with_manifests([
                entry("foo", "1.0.0", Some(NPM)),
                entry("foo", "0.9.0", Some(NPM)),
                entry("gone", "0.1.0", Some(NPM)),
                entry("private", "1.0.0", Some("https://npm.internal/")),
                entry("flaky", "1.0.0", Some(NPM)),
            ]),
        );
        let resolver = MockResolver::with_latest([("foo", "1.1.0")]).failing_on("flaky");
        let (pool, mut completions) = WorkerPool::new(store.clone(), PoolOptions::default());

        let report = reconcile(
            &*store,
            &resolver,
            &RegistryOrigin::new(NPM),
            &pool.handle(),
            4,
            &CancellationToken::new(),
        )
        .await;
        pool.drain().await;

        assert_eq!(report, ReconcileReport { listed: 5, unreadable: 0, foreign: 1, submitted: 2, unresolved: 1 });
        // One lookup per distinct package, foreign ones never looked up.
        let mut calls = resolver.calls();
        calls.sort();
        assert_eq!(calls, ["flaky", "foo", "gone"]);

        let mut outcomes = Vec::new();
        while let Some(completion) = completions.recv().await {
            assert_eq!(completion.item.origin, Origin::Reconcile);
            outcomes.push((completion.item.name, completion.result.unwrap()));
        }
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(outcomes, [("foo".to_string(), Outcome::Added), ("gone".to_string(), Outcome::Invalidated)]);
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let store = Arc::new(MockCacheStore::default().with_manifests([entry("foo", "1.0.0", Some(NPM))]));
        let resolver = MockResolver::with_latest([("foo", "1.1.0")]);
        let (pool, _completions) = WorkerPool::new(store.clone(), PoolOptions::default());
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let report = reconcile(&*store, &resolver, &|_: &ManifestEntry| true, &pool.handle(), 4, &shutdown).await;
        assert_eq!(report.listed, 1);
        assert_eq!(report.submitted, 0);
        pool.drain().await;
    }
}
