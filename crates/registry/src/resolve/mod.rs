//! Package metadata resolution.

#[cfg(any(test, feature = "mock"))]
mod mock;
mod npm;

#[cfg(any(test, feature = "mock"))]
pub use self::mock::MockResolver;
pub use self::npm::RegistryResolver;
use crate::error::Result;
use crate::models::PackageMetadata;
use async_trait::async_trait;
use std::sync::Arc;

pub type ResolverHandle = Arc<dyn MetadataResolver + Send + Sync>;

/// Looks up what the registry currently publishes for a package.
///
/// Implementations must be safe to call concurrently for distinct names.
/// Resolution is idempotent, so callers are free to retry or to simply drop a
/// failed lookup and pick the package up again later.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    /// Resolve `name` to its latest installable version.
    ///
    /// A package that no longer has anything installable (deprecated,
    /// unpublished, or gone entirely) resolves successfully with
    /// [`deprecated`](PackageMetadata::deprecated) set. Errors are reserved
    /// for "we couldn't find out".
    async fn resolve(&self, name: &str) -> Result<PackageMetadata>;
}
