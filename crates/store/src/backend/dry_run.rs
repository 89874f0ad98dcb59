//! Dry-run cache store.
//!
//! Wraps another store and prevents mutations from executing, while still
//! indicating success on return. Reads pass straight through, so the pipeline
//! makes exactly the same decisions it would make for real.

use crate::backend::{CacheStore, ManifestStream};
use crate::error::Result;
use crate::CacheHandle;
use async_trait::async_trait;

/// Dry-run cache store.
///
/// Silently drops all mutations, logging an [`info event`](tracing::Event)
/// for each one instead.
#[derive(Clone)]
pub struct DryRunStore {
    inner: CacheHandle,
}
impl DryRunStore {
    pub fn new(inner: CacheHandle) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl CacheStore for DryRunStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn exists(&self, name: &str, version: Option<&str>) -> Result<bool> {
        self.inner.exists(name, version).await
    }

    async fn add(&self, name: &str, version: &str, _tarball: &str) -> Result<()> {
        tracing::info!(name, version, "Skipping cache add during dry run");
        Ok(())
    }

    async fn invalidate(&self, name: &str, version: Option<&str>) -> Result<()> {
        tracing::info!(name, version, "Skipping cache invalidation during dry run");
        Ok(())
    }

    fn manifests(&self) -> ManifestStream<'_> {
        self.inner.manifests()
    }

    async fn staleness(&self) -> Result<u64> {
        self.inner.staleness().await
    }

    async fn set_staleness(&self, seconds: u64) -> Result<()> {
        tracing::info!(seconds, "Skipping cache staleness change during dry run");
        Ok(())
    }
}
