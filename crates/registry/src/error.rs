//! Registry Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// A registry error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A configured URL could not be parsed or used as a base.
    #[display("invalid URL: {_0}")]
    InvalidUrl(#[error(not(source))] String),
    /// Connection could not be established or was dropped.
    #[display("network error")]
    Network,
    /// The request outlived its deadline.
    #[display("request timed out")]
    Timeout,
    /// The registry answered with an unexpected HTTP status.
    #[display("unexpected HTTP status {_0}")]
    Status(#[error(not(source))] u16),
    /// The response body was not what we expected.
    #[display("malformed response")]
    Decode,
    /// A change feed sequence value could not be interpreted.
    #[display("invalid sequence value: {_0}")]
    InvalidSeq(#[error(not(source))] String),
    /// Scripted failure from a test double.
    #[display("simulated failure: {_0}")]
    Simulated(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network | Self::Timeout | Self::Simulated(_) => true,
            Self::Status(status) => *status == 429 || *status >= 500,
            Self::InvalidUrl(_) | Self::Decode | Self::InvalidSeq(_) => false,
        }
    }
}
