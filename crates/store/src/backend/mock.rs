//! In-memory cache store for testing.

use crate::backend::{CacheStore, ManifestStream};
use crate::error::{ErrorKind, Result};
use crate::models::ManifestEntry;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

/// Every call made against a [`MockCacheStore`], in the order it was made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Exists { name: String, version: Option<String> },
    Add { name: String, version: String, tarball: String },
    Invalidate { name: String, version: Option<String> },
    SetStaleness(u64),
}

/// In-memory cache store for testing.
///
/// Besides holding packages, it records every call, tracks how many mutations
/// are in flight at once, and can be scripted to fail, slow down, or block
/// individual packages until a test releases them.
pub struct MockCacheStore {
    name: String,
    packages: Mutex<BTreeMap<String, BTreeSet<String>>>,
    manifests: Vec<ManifestEntry>,
    staleness: Mutex<u64>,
    calls: Mutex<Vec<StoreCall>>,
    failing: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    holds: Mutex<HashMap<String, watch::Sender<bool>>>,
    fail_staleness: AtomicBool,
    delay: Option<Duration>,
    in_flight: watch::Sender<usize>,
    peak: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking test thread shouldn't cascade into every other assertion.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counts a mutation as in flight for as long as it is alive.
struct InFlight<'a>(&'a watch::Sender<usize>);
impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n -= 1);
    }
}

impl MockCacheStore {
    /// Create a mock store pre-populated with `(name, version)` pairs.
    pub fn with_packages<'a>(packages: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut map: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for (name, version) in packages {
            map.entry(name.to_string()).or_default().insert(version.to_string());
        }
        Self {
            name: "mock".to_string(),
            packages: Mutex::new(map),
            manifests: Vec::new(),
            staleness: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            panicking: Mutex::new(HashSet::new()),
            holds: Mutex::new(HashMap::new()),
            fail_staleness: AtomicBool::new(false),
            delay: None,
            in_flight: watch::Sender::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Change the name of the mock store.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Manifests returned by [`CacheStore::manifests`]. Independent of the
    /// packages used for existence checks.
    pub fn with_manifests(mut self, manifests: impl IntoIterator<Item = ManifestEntry>) -> Self {
        self.manifests = manifests.into_iter().collect();
        self
    }

    pub fn with_staleness(self, seconds: u64) -> Self {
        *lock(&self.staleness) = seconds;
        self
    }

    /// Sleep for `delay` inside every mutation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make every mutation of `name` fail.
    pub fn failing_on(self, name: impl Into<String>) -> Self {
        lock(&self.failing).insert(name.into());
        self
    }

    /// Make every mutation of `name` panic.
    pub fn panicking_on(self, name: impl Into<String>) -> Self {
        lock(&self.panicking).insert(name.into());
        self
    }

    /// Make staleness reads and writes fail.
    pub fn failing_staleness(self) -> Self {
        self.fail_staleness.store(true, Ordering::SeqCst);
        self
    }

    /// Block mutations of `name` until [`release()`](Self::release) is called.
    pub fn hold(&self, name: impl Into<String>) {
        lock(&self.holds).insert(name.into(), watch::Sender::new(false));
    }

    /// Let mutations of `name` proceed, including ones already waiting.
    pub fn release(&self, name: &str) {
        if let Some(hold) = lock(&self.holds).get(name) {
            hold.send_replace(true);
        }
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        lock(&self.calls).clone()
    }

    pub fn adds(&self) -> Vec<(String, String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::Add { name, version, tarball } => Some((name, version, tarball)),
                _ => None,
            })
            .collect()
    }

    pub fn invalidations(&self) -> Vec<(String, Option<String>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::Invalidate { name, version } => Some((name, version)),
                _ => None,
            })
            .collect()
    }

    /// Number of add and invalidate calls made so far.
    pub fn mutation_count(&self) -> usize {
        lock(&self.calls).iter().filter(|c| matches!(c, StoreCall::Add { .. } | StoreCall::Invalidate { .. })).count()
    }

    /// Highest number of mutations that were ever in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Wait until at least `count` mutations are in flight.
    pub async fn wait_in_flight(&self, count: usize) {
        let mut rx = self.in_flight.subscribe();
        // The sender lives as long as `self`, so this can't observe a close.
        _ = rx.wait_for(|n| *n >= count).await;
    }

    pub fn cached_versions(&self, name: &str) -> Vec<String> {
        lock(&self.packages).get(name).map(|v| v.iter().cloned().collect()).unwrap_or_default()
    }

    pub fn current_staleness(&self) -> u64 {
        *lock(&self.staleness)
    }

    fn record(&self, call: StoreCall) {
        lock(&self.calls).push(call);
    }

    /// Shared prologue of every mutation: count it, then apply scripted
    /// delays, holds, panics and failures.
    async fn enter(&self, name: &str) -> Result<InFlight<'_>> {
        let mut current = 0;
        self.in_flight.send_modify(|n| {
            *n += 1;
            current = *n;
        });
        let guard = InFlight(&self.in_flight);
        self.peak.fetch_max(current, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let hold = lock(&self.holds).get(name).map(watch::Sender::subscribe);
        if let Some(mut hold) = hold {
            _ = hold.wait_for(|released| *released).await;
        }
        if lock(&self.panicking).contains(name) {
            // DELIBERATE: exercises panic containment in callers.
            panic!("MockCacheStore: scripted panic for {name}");
        }
        if lock(&self.failing).contains(name) {
            exn::bail!(ErrorKind::Simulated(name.to_string()));
        }
        Ok(guard)
    }
}
impl Default for MockCacheStore {
    fn default() -> Self {
        let packages: [(&str, &str); 0] = [];
        Self::with_packages(packages)
    }
}

#[async_trait]
impl CacheStore for MockCacheStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, name: &str, version: Option<&str>) -> Result<bool> {
        self.record(StoreCall::Exists { name: name.to_string(), version: version.map(str::to_string) });
        let packages = lock(&self.packages);
        Ok(match (packages.get(name), version) {
            (Some(versions), Some(version)) => versions.contains(version),
            (Some(versions), None) => !versions.is_empty(),
            (None, _) => false,
        })
    }

    async fn add(&self, name: &str, version: &str, tarball: &str) -> Result<()> {
        self.record(StoreCall::Add {
            name: name.to_string(),
            version: version.to_string(),
            tarball: tarball.to_string(),
        });
        let _in_flight = self.enter(name).await?;
        lock(&self.packages).entry(name.to_string()).or_default().insert(version.to_string());
        Ok(())
    }

    async fn invalidate(&self, name: &str, version: Option<&str>) -> Result<()> {
        self.record(StoreCall::Invalidate { name: name.to_string(), version: version.map(str::to_string) });
        let _in_flight = self.enter(name).await?;
        let mut packages = lock(&self.packages);
        match version {
            Some(version) => {
                if let Some(versions) = packages.get_mut(name) {
                    versions.remove(version);
                }
            },
            None => {
                packages.remove(name);
            },
        }
        Ok(())
    }

    fn manifests(&self) -> ManifestStream<'_> {
        Box::pin(futures::stream::iter(self.manifests.clone().into_iter().map(Ok)))
    }

    async fn staleness(&self) -> Result<u64> {
        if self.fail_staleness.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Simulated("staleness".to_string()));
        }
        Ok(*lock(&self.staleness))
    }

    async fn set_staleness(&self, seconds: u64) -> Result<()> {
        self.record(StoreCall::SetStaleness(seconds));
        if self.fail_staleness.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Simulated("staleness".to_string()));
        }
        *lock(&self.staleness) = seconds;
        Ok(())
    }
}
