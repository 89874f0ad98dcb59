//! Change feed cursor persistence.

use crate::CURSOR_KEY;
use crate::error::{ErrorKind, Result};
use crate::state::StateHandle;
use exn::ResultExt;
use regsync_registry::Cursor;

/// Durable home of the change feed [`Cursor`].
///
/// No ordering is enforced here: [`set()`](Self::set) persists whatever it is
/// given. Deciding which sequence is safe to commit is the caller's job.
#[derive(Clone)]
pub struct CheckpointStore {
    state: StateHandle,
    initial: Cursor,
}
impl CheckpointStore {
    /// `initial` is returned by [`get()`](Self::get) until the first
    /// [`set()`](Self::set).
    pub fn new(state: StateHandle, initial: Cursor) -> Self {
        Self { state, initial }
    }

    pub async fn get(&self) -> Result<Cursor> {
        let Some(entry) = self.state.load(CURSOR_KEY).await? else {
            tracing::debug!(initial = %self.initial, "No checkpoint recorded; using initial cursor");
            return Ok(self.initial);
        };
        let seq = u64::try_from(entry.value).or_raise(|| ErrorKind::InvalidData("checkpoint sequence"))?;
        tracing::debug!(seq, updated_at = ?entry.updated_at, "Loaded checkpoint");
        Ok(Cursor::Seq(seq))
    }

    pub async fn set(&self, seq: u64) -> Result<()> {
        let value = i64::try_from(seq).or_raise(|| ErrorKind::InvalidData("checkpoint sequence"))?;
        self.state.save(CURSOR_KEY, value).await
    }
}
