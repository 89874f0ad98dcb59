//! Durable sync state.
//!
//! A tiny SQLite key/value table holds the two things that must survive a
//! restart: the change feed cursor, and the cache staleness setting that was
//! in effect before the sync process overrode it.

mod checkpoint;
mod db;
pub mod error;
#[cfg(any(test, feature = "mock"))]
mod memory;
mod models;
mod repo;
mod state;

pub use crate::checkpoint::CheckpointStore;
pub use crate::db::Database;
#[cfg(any(test, feature = "mock"))]
pub use crate::memory::MemoryState;
pub use crate::models::StateEntry;
pub use crate::repo::Repository;
pub use crate::state::{StateHandle, StateStore};

/// State key of the last committed change feed sequence.
pub const CURSOR_KEY: &str = "since";
/// State key of the staleness value to restore on exit.
pub const STALENESS_KEY: &str = "cache-min";
