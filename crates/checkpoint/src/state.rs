//! Key/value state storage.

use crate::error::Result;
use crate::models::StateEntry;
use async_trait::async_trait;
use std::sync::Arc;

pub type StateHandle = Arc<dyn StateStore + Send + Sync>;

/// Durable storage for a handful of named integers.
///
/// Each [`save()`](Self::save) must be durable by the time it returns; the
/// sync pipeline relies on that to resume where it left off.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<StateEntry>>;

    async fn save(&self, key: &str, value: i64) -> Result<()>;

    /// Remove `key`. Forgetting a key that was never saved is not an error.
    async fn forget(&self, key: &str) -> Result<()>;
}
