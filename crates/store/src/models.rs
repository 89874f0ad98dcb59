//! Store models.

use serde::Deserialize;

/// A package manifest found in the on-disk cache.
///
/// Produced by [`CacheStore::manifests`](crate::CacheStore::manifests) and
/// consumed by the startup reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub name: String,
    pub version: String,
    /// Where the cached tarball was originally fetched from (npm's
    /// `_resolved` field). Entries added from a local tarball or git remote
    /// may not carry one.
    pub resolved_from: Option<String>,
}

/// The subset of a cached `package.json` that we care about.
#[derive(Debug, Deserialize)]
pub(crate) struct RawManifest {
    pub name: Option<String>,
    pub version: Option<String>,
    #[serde(rename = "_resolved")]
    pub resolved: Option<String>,
}
