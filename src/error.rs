//! Binary Error Types

use derive_more::{Display, Error};

/// A top-level error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for the binary.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can stop regsync from starting, by the component at fault.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("invalid configuration")]
    Config,
    #[display("could not set up logging: {_0}")]
    Logging(#[error(not(source))] String),
    #[display("could not open sync state")]
    State,
    #[display("could not open the package cache")]
    Store,
    #[display("could not connect to the registry")]
    Registry,
    #[display("sync failed")]
    Sync,
}
