//! Package name and version validation.
//!
//! Names and versions arrive from the change feed and the registry, and both
//! end up as directory components under the cache root. Anything that could
//! walk out of the root is rejected before it gets near the filesystem.

use crate::error::{ErrorKind, Result};
use std::path::PathBuf;

/// npm's own limit on package name length.
const MAX_NAME_LENGTH: usize = 214;

fn is_valid_component(component: &str) -> bool {
    !component.is_empty()
        && component != "."
        && component != ".."
        && !component.starts_with('.')
        && !component.starts_with('_')
        && !component.chars().any(|c| c == '/' || c == '\\' || c == '\0' || c.is_whitespace())
}

/// Validates an npm package name and returns its relative cache path.
///
/// Scoped names (`@scope/name`) map to two directory levels; everything
/// else maps to one.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use regsync_store::validate_name;
/// assert_eq!(validate_name("left-pad").unwrap(), Path::new("left-pad"));
/// assert_eq!(validate_name("@types/node").unwrap(), Path::new("@types/node"));
/// assert!(validate_name("../etc").is_err());
/// assert!(validate_name("_design/app").is_err());
/// ```
pub fn validate_name(name: &str) -> Result<PathBuf> {
    if name.is_empty() || name.len() > MAX_NAME_LENGTH {
        exn::bail!(ErrorKind::InvalidName(name.to_string()));
    }
    let valid = match name.strip_prefix('@') {
        Some(scoped) => match scoped.split_once('/') {
            Some((scope, package)) => is_valid_component(scope) && is_valid_component(package),
            None => false,
        },
        None => is_valid_component(name),
    };
    match valid {
        true => Ok(PathBuf::from(name)),
        false => exn::bail!(ErrorKind::InvalidName(name.to_string())),
    }
}

/// Validates a version string for use as a single directory component.
pub fn validate_version(version: &str) -> Result<&str> {
    // Versions may legitimately start with a digit or `v`, never with a dot.
    if !is_valid_component(version) {
        exn::bail!(ErrorKind::InvalidVersion(version.to_string()));
    }
    Ok(version)
}
