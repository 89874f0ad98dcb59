//! Temporarily overriding the cache staleness threshold.
//!
//! While following the feed we want npm to treat every cached packument as
//! fresh, since the feed tells us exactly when something changes. The
//! setting is user-wide, so it has to be put back afterwards, and put back
//! correctly even if an earlier run crashed while holding the override.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use regsync_checkpoint::{STALENESS_KEY, StateStore};
use regsync_store::CacheStore;
use std::future::Future;

/// Holds the staleness override until [`restore()`](Self::restore) is called.
///
/// The value to restore is recorded in the state store before anything is
/// changed. If a record is already there, a previous run never got to
/// restore, and that record is the real prior value.
#[must_use = "the override stays in place until restore() is called"]
pub struct StalenessGuard<'a> {
    store: &'a dyn CacheStore,
    state: &'a dyn StateStore,
    prior: u64,
}

impl<'a> StalenessGuard<'a> {
    pub async fn acquire(store: &'a dyn CacheStore, state: &'a dyn StateStore, value: u64) -> Result<Self> {
        let recorded = state.load(STALENESS_KEY).await.or_raise(|| ErrorKind::Checkpoint)?;
        let prior = match recorded {
            Some(entry) => {
                let prior = u64::try_from(entry.value).or_raise(|| ErrorKind::Checkpoint)?;
                tracing::warn!(prior, "Found an unrestored cache-min from an earlier run");
                prior
            },
            None => {
                let current = store.staleness().await.or_raise(|| ErrorKind::Tuning)?;
                let value = i64::try_from(current).or_raise(|| ErrorKind::Tuning)?;
                state.save(STALENESS_KEY, value).await.or_raise(|| ErrorKind::Checkpoint)?;
                current
            },
        };
        if let Err(e) = store.set_staleness(value).await {
            // Nothing changed, so there's nothing to restore later.
            if let Err(e) = state.forget(STALENESS_KEY).await {
                tracing::warn!(error = ?e, "Could not clear recorded cache-min");
            }
            return Err(e).or_raise(|| ErrorKind::Tuning);
        }
        tracing::debug!(prior, value, "Overrode cache-min");
        Ok(Self { store, state, prior })
    }

    pub fn prior(&self) -> u64 {
        self.prior
    }

    /// Put the prior value back. Failures are logged, never returned: the
    /// record stays in the state store and the next run restores it.
    pub async fn restore(self) {
        if let Err(e) = self.store.set_staleness(self.prior).await {
            tracing::error!(prior = self.prior, error = ?e, "Could not restore cache-min");
            return;
        }
        if let Err(e) = self.state.forget(STALENESS_KEY).await {
            tracing::warn!(error = ?e, "Could not clear recorded cache-min");
        }
        tracing::debug!(prior = self.prior, "Restored cache-min");
    }

    /// Run `body` with the override in place, restoring it afterwards
    /// whether `body` succeeded or not.
    pub async fn scope<T, F>(store: &'a dyn CacheStore, state: &'a dyn StateStore, value: u64, body: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let guard = Self::acquire(store, state, value).await?;
        let result = body.await;
        guard.restore().await;
        result
    }
}
