//! Scripted metadata resolver for testing.

use super::MetadataResolver;
use crate::error::{ErrorKind, Result};
use crate::models::PackageMetadata;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted metadata resolver for testing.
///
/// Names without scripted metadata resolve as deprecated, the same way the
/// registry answers for a package it has never heard of.
#[derive(Default)]
pub struct MockResolver {
    packages: HashMap<String, PackageMetadata>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}
impl MockResolver {
    pub fn with_metadata(packages: impl IntoIterator<Item = PackageMetadata>) -> Self {
        Self { packages: packages.into_iter().map(|m| (m.name.clone(), m)).collect(), ..Self::default() }
    }

    /// Script `(name, latest)` pairs with a tarball URL shaped like the
    /// public registry's.
    pub fn with_latest<'a>(packages: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self::with_metadata(packages.into_iter().map(|(name, version)| {
            let file = name.rsplit('/').next().unwrap_or(name);
            PackageMetadata::published(name, version, format!("https://registry.npmjs.org/{name}/-/{file}-{version}.tgz"))
        }))
    }

    /// Make resolving `name` fail with a retryable error.
    pub fn failing_on(self, name: impl Into<String>) -> Self {
        lock(&self.failing).insert(name.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every name resolved so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// Highest number of resolutions that were ever running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataResolver for MockResolver {
    async fn resolve(&self, name: &str) -> Result<PackageMetadata> {
        lock(&self.calls).push(name.to_string());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if lock(&self.failing).contains(name) {
            exn::bail!(ErrorKind::Simulated(name.to_string()));
        }
        Ok(self.packages.get(name).cloned().unwrap_or_else(|| PackageMetadata::deprecated(name)))
    }
}
