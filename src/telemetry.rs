//! Logging setup.

use crate::error::{ErrorKind, Result};
use regsync_sync::ACTIVITY_TARGET;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    pub verbose: bool,
    pub silent: bool,
    pub json: bool,
}

/// Crates whose debug output `--verbose` turns on. Dependencies stay at info.
const OWN_CRATES: [&str; 6] =
    ["regsync", "regsync_checkpoint", "regsync_config", "regsync_registry", "regsync_store", "regsync_sync"];

/// Default filter directives for the given flags. `RUST_LOG` replaces them
/// entirely when set.
fn directives(options: LogOptions) -> String {
    let mut directives = vec!["info".to_string()];
    if options.verbose {
        directives.extend(OWN_CRATES.iter().map(|krate| format!("{krate}=debug")));
    }
    if options.silent {
        directives.push(format!("{ACTIVITY_TARGET}=off"));
    }
    directives.join(",")
}

/// Install the global tracing subscriber. Can only succeed once per process.
pub fn init_tracing(options: LogOptions) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(options)));
    let result = match options.json {
        true => fmt().json().with_env_filter(filter).with_target(true).try_init(),
        false => fmt().compact().with_env_filter(filter).with_target(false).try_init(),
    };
    result.map_err(|e| exn::Exn::from(ErrorKind::Logging(e.to_string())))
}
