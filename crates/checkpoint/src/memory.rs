//! In-memory state store for testing.

use crate::error::{ErrorKind, Result};
use crate::models::StateEntry;
use crate::state::StateStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use time::UtcDateTime;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory state store that remembers every write.
#[derive(Default)]
pub struct MemoryState {
    values: Mutex<HashMap<String, StateEntry>>,
    history: Mutex<Vec<(String, Option<i64>)>>,
    failing_writes: AtomicBool,
    failing_saves: AtomicUsize,
}
impl MemoryState {
    pub fn with_values<'a>(values: impl IntoIterator<Item = (&'a str, i64)>) -> Self {
        let now = UtcDateTime::now();
        let values = values
            .into_iter()
            .map(|(key, value)| (key.to_string(), StateEntry { key: key.to_string(), value, updated_at: now }))
            .collect();
        Self { values: Mutex::new(values), ..Self::default() }
    }

    /// Make every save and forget fail.
    pub fn failing_writes(self) -> Self {
        self.failing_writes.store(true, Ordering::SeqCst);
        self
    }

    /// Make the next `count` saves fail, then succeed again.
    pub fn failing_saves(self, count: usize) -> Self {
        self.failing_saves.store(count, Ordering::SeqCst);
        self
    }

    pub fn value(&self, key: &str) -> Option<i64> {
        lock(&self.values).get(key).map(|e| e.value)
    }

    /// Values saved under `key`, oldest first. Forgets are not included.
    pub fn saves(&self, key: &str) -> Vec<i64> {
        lock(&self.history).iter().filter(|(k, _)| k == key).filter_map(|(_, v)| *v).collect()
    }

    /// Every write in order: `Some(value)` for a save, `None` for a forget.
    pub fn history(&self) -> Vec<(String, Option<i64>)> {
        lock(&self.history).clone()
    }

    fn check_writable(&self) -> Result<()> {
        if self.failing_writes.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Database);
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryState {
    async fn load(&self, key: &str) -> Result<Option<StateEntry>> {
        Ok(lock(&self.values).get(key).cloned())
    }

    async fn save(&self, key: &str, value: i64) -> Result<()> {
        self.check_writable()?;
        let failing = self.failing_saves.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            exn::bail!(ErrorKind::Database);
        }
        let entry = StateEntry { key: key.to_string(), value, updated_at: UtcDateTime::now() };
        lock(&self.values).insert(key.to_string(), entry);
        lock(&self.history).push((key.to_string(), Some(value)));
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<()> {
        self.check_writable()?;
        lock(&self.values).remove(key);
        lock(&self.history).push((key.to_string(), None));
        Ok(())
    }
}
