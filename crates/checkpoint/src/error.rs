//! Checkpoint Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// A checkpoint error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for checkpoint operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// A stored or supplied value doesn't fit the expected type.
    #[display("invalid state data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // Most likely SQLITE_BUSY from another process holding the file.
        matches!(self, Self::Database)
    }
}
