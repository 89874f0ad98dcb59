use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use time::UtcDateTime;

/// A single persisted value and when it was last written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateEntry {
    pub key: String,
    pub value: i64,
    pub updated_at: UtcDateTime,
}

#[derive(sqlx::FromRow)]
pub(crate) struct StateRow {
    key: String,
    value: i64,
    updated_at: i64,
}
impl TryFrom<StateRow> for StateEntry {
    type Error = Error;
    fn try_from(row: StateRow) -> Result<Self, Self::Error> {
        Ok(Self {
            key: row.key,
            value: row.value,
            updated_at: UtcDateTime::from_unix_timestamp(row.updated_at)
                .or_raise(|| ErrorKind::InvalidData("update timestamp"))?,
        })
    }
}
