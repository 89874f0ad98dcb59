//! Units of work and their results.

use crate::error::Result;
use derive_more::Display;
use regsync_registry::PackageMetadata;
use std::fmt;

/// Where a [`WorkItem`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// A change feed record at this sequence.
    Feed(u64),
    /// Injected by the startup reconciliation pass. Never checkpointed.
    Reconcile,
}
impl Origin {
    pub fn seq(&self) -> Option<u64> {
        match self {
            Self::Feed(seq) => Some(*seq),
            Self::Reconcile => None,
        }
    }
}
impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Feed(seq) => write!(f, "{seq}"),
            Self::Reconcile => f.write_str("reconcile"),
        }
    }
}

/// One package to bring in line with the registry.
///
/// Not `Clone`: an item moves into exactly one worker and comes back out
/// inside exactly one [`Completion`].
#[derive(Debug, PartialEq, Eq)]
pub struct WorkItem {
    pub name: String,
    pub origin: Origin,
    pub version: Option<String>,
    pub tarball: Option<String>,
    pub deprecated: bool,
}
impl WorkItem {
    /// Anything without both a version and a tarball has nothing to install,
    /// and is treated as deprecated.
    pub fn from_metadata(origin: Origin, metadata: PackageMetadata) -> Self {
        let deprecated = metadata.deprecated || metadata.latest_version.is_none() || metadata.tarball.is_none();
        Self {
            name: metadata.name,
            origin,
            version: metadata.latest_version,
            tarball: metadata.tarball,
            deprecated,
        }
    }
}

/// What a worker did to the cache.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    #[display("added")]
    Added,
    #[display("already cached")]
    AlreadyWarm,
    #[display("invalidated")]
    Invalidated,
    #[display("not cached")]
    NotCached,
}

/// The result of processing one [`WorkItem`].
#[derive(Debug)]
pub struct Completion {
    pub item: WorkItem,
    pub result: Result<Outcome>,
}
