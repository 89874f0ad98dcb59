//! SQLite-backed state repository.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{StateEntry, StateRow};
use crate::state::StateStore;
use async_trait::async_trait;
use exn::ResultExt;
use sqlx::SqlitePool;
use time::UtcDateTime;
use tracing::instrument;

/// Persists state in the `state` table.
///
/// In dry-run mode, reads hit the database as usual but writes are logged and
/// discarded.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
    dry_run: bool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone(), dry_run: false }
    }
}
impl Repository {
    pub fn new(pool: SqlitePool, dry_run: bool) -> Self {
        Self { pool, dry_run }
    }
}

#[async_trait]
impl StateStore for Repository {
    async fn load(&self, key: &str) -> Result<Option<StateEntry>> {
        let row: Option<StateRow> = sqlx::query_as(include_str!("../queries/load.sql"))
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(StateEntry::try_from).transpose()
    }

    #[instrument(skip(self), fields(dry_run = self.dry_run))]
    async fn save(&self, key: &str, value: i64) -> Result<()> {
        if self.dry_run {
            tracing::debug!("Not persisting state in dry-run mode");
            return Ok(());
        }
        sqlx::query(include_str!("../queries/save.sql"))
            .bind(key)
            .bind(value)
            .bind(UtcDateTime::now().unix_timestamp())
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    #[instrument(skip(self), fields(dry_run = self.dry_run))]
    async fn forget(&self, key: &str) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        sqlx::query(include_str!("../queries/forget.sql"))
            .bind(key)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }
}
