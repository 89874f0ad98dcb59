//! Everything that talks to the remote registry.
//!
//! Two capabilities live here:
//! - [`feed`]: an endless, resumable stream of [`ChangeRecord`]s.
//! - [`resolve`]: turning a package name into its current
//!   [`PackageMetadata`].
//!
//! Both are traits with an HTTP implementation for the npm registry and
//! scriptable doubles behind the `mock` feature.

pub mod error;
pub mod feed;
mod models;
pub mod resolve;

pub use crate::feed::{ChangeFeed, FeedHandle};
pub use crate::models::{ChangeRecord, Cursor, PackageMetadata};
pub use crate::resolve::{MetadataResolver, ResolverHandle};

/// Public npm registry.
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org/";
/// CouchDB replica that publishes the npm change feed.
pub const DEFAULT_FEED: &str = "https://skimdb.npmjs.com/registry";
