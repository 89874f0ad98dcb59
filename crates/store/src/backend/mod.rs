//! Cache store trait and implementations.
//!
//! [`CacheStore`] is the only way the sync pipeline mutates the local cache.
//! Implementations are expected to be safe to call concurrently for distinct
//! packages; callers are responsible for never mutating the *same* package
//! from two tasks at once.

mod dry_run;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod npm;

pub use self::dry_run::DryRunStore;
#[cfg(any(test, feature = "mock"))]
pub use self::mock::{MockCacheStore, StoreCall};
pub use self::npm::NpmCacheStore;
use crate::error::Result;
use crate::models::ManifestEntry;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::pin::Pin;

pub type ManifestStream<'a> = Pin<Box<dyn Stream<Item = Result<ManifestEntry>> + Send + 'a>>;

/// Unified interface for local package caches.
///
/// # Examples
///
/// ```
/// use regsync_store::{CacheStore, error::Result};
///
/// async fn warm(store: &dyn CacheStore, name: &str, version: &str, tarball: &str) -> Result<bool> {
///     if store.exists(name, Some(version)).await? {
///         return Ok(false);
///     }
///     store.add(name, version, tarball).await?;
///     Ok(true)
/// }
/// ```
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Name of the store, used for logging only.
    fn name(&self) -> &str;

    /// Check whether a package is cached.
    ///
    /// With `version` set, only that exact version counts. Without it, any
    /// cached version of the package counts.
    async fn exists(&self, name: &str, version: Option<&str>) -> Result<bool>;

    /// Fetch `tarball` and store it as `name@version`.
    async fn add(&self, name: &str, version: &str, tarball: &str) -> Result<()>;

    /// Remove a package from the cache; all versions when `version` is `None`.
    async fn invalidate(&self, name: &str, version: Option<&str>) -> Result<()>;

    /// Stream every manifest currently stored in the cache.
    ///
    /// Entries that can't be read are yielded as errors; the stream carries on
    /// with the next entry afterwards.
    fn manifests(&self) -> ManifestStream<'_>;

    /// Collect [`manifests()`](Self::manifests) into a [`Vec`], failing on the
    /// first unreadable entry.
    async fn list_manifests(&self) -> Result<Vec<ManifestEntry>> {
        self.manifests().try_collect().await
    }

    /// Current cache staleness threshold in seconds (npm's `cache-min`).
    ///
    /// Entries younger than this are served from cache without revalidation.
    async fn staleness(&self) -> Result<u64>;

    /// Overwrite the cache staleness threshold.
    ///
    /// This is process-wide (and in npm's case, user-wide) configuration.
    async fn set_staleness(&self, seconds: u64) -> Result<()>;
}
