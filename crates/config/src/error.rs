//! Config Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration loading.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// An explicitly requested config file does not exist.
    #[display("config file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// The config file extension doesn't map to a known format.
    #[display("unsupported config format: {}", _0.display())]
    UnsupportedFormat(#[error(not(source))] PathBuf),
    /// One of the configuration sources could not be parsed.
    #[display("could not parse configuration")]
    Parse,
    /// Configuration parsed, but a value is out of range.
    #[display("invalid value for {_0}: {_1}")]
    Invalid(#[error(not(source))] &'static str, String),
    /// No home directory to derive default paths from.
    #[display("could not determine platform directories")]
    NoHome,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
