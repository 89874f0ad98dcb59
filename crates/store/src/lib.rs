//! Access to the local package cache.
//!
//! The sync pipeline never touches the cache directly; it goes through the
//! [`CacheStore`] trait so that the npm-backed implementation can be swapped
//! for a dry-run decorator or an in-memory mock.

pub mod backend;
pub mod error;
mod models;
mod name;

pub use crate::backend::CacheStore;
pub use crate::models::ManifestEntry;
pub use crate::name::{validate_name, validate_version};
use std::sync::Arc;

pub type CacheHandle = Arc<dyn CacheStore + Send + Sync>;
