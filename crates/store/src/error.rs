//! Store Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A cache store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The `npm` executable could not be located on `PATH`.
    #[display("npm executable not found")]
    NpmNotFound,
    /// The child process could not be started at all.
    #[display("failed to spawn `{_0}`")]
    Spawn(#[error(not(source))] String),
    /// The child process ran but reported failure.
    #[display("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        #[error(not(source))]
        command: String,
        #[error(not(source))]
        status: String,
        #[error(not(source))]
        stderr: String,
    },
    /// Package name would escape the cache root or is not a valid npm name.
    #[display("invalid package name: {_0}")]
    InvalidName(#[error(not(source))] String),
    /// Version string would escape the cache root.
    #[display("invalid package version: {_0}")]
    InvalidVersion(#[error(not(source))] String),
    /// Cache root is not an absolute directory.
    #[display("invalid cache root: {}", _0.display())]
    InvalidRoot(#[error(not(source))] PathBuf),
    /// An on-disk manifest could not be parsed.
    #[display("invalid manifest: {}", _0.display())]
    InvalidManifest(#[error(not(source))] PathBuf),
    /// A cache configuration value could not be interpreted.
    #[display("invalid cache setting {_0}: {_1:?}")]
    InvalidSetting(#[error(not(source))] &'static str, #[error(not(source))] String),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Scripted failure from a test double.
    #[display("simulated failure: {_0}")]
    Simulated(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::CommandFailed { .. } | Self::Simulated(_))
    }
}
