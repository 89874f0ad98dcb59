//! What a single worker does with a single item.

use super::keyed::KeyedLock;
use crate::error::{ErrorKind, Result, panic_message};
use crate::item::{Completion, Outcome, WorkItem};
use exn::ResultExt;
use futures::FutureExt;
use regsync_store::{CacheHandle, CacheStore};
use std::panic::AssertUnwindSafe;
use tracing::instrument;

/// Bring the cache in line with one item.
///
/// Deprecated items are invalidated only if something is cached; everything
/// else is added only if that exact version is missing.
#[instrument(skip_all, fields(package = %item.name, origin = %item.origin))]
pub(crate) async fn apply(store: &dyn CacheStore, item: &WorkItem) -> Result<Outcome> {
    match (&item.version, &item.tarball) {
        (Some(version), Some(tarball)) if !item.deprecated => {
            if store.exists(&item.name, Some(version)).await.or_raise(|| ErrorKind::Store)? {
                return Ok(Outcome::AlreadyWarm);
            }
            store.add(&item.name, version, tarball).await.or_raise(|| ErrorKind::Store)?;
            Ok(Outcome::Added)
        },
        _ => {
            if !store.exists(&item.name, None).await.or_raise(|| ErrorKind::Store)? {
                return Ok(Outcome::NotCached);
            }
            store.invalidate(&item.name, None).await.or_raise(|| ErrorKind::Store)?;
            Ok(Outcome::Invalidated)
        },
    }
}

/// Process `item` while holding its package lock, turning a panic into a
/// failed [`Completion`].
pub(crate) async fn process(store: CacheHandle, locks: KeyedLock, item: WorkItem) -> Completion {
    let result = {
        let _guard = locks.lock(&item.name).await;
        AssertUnwindSafe(apply(&*store, &item))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(exn::Exn::from(ErrorKind::Panicked(panic_message(&*payload)))))
    };
    Completion { item, result }
}
