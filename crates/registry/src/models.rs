//! Registry models.

use crate::error::{ErrorKind, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A single entry from the change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// Package name that changed.
    pub id: String,
    /// Position in the feed. Non-decreasing across the feed's lifetime, but
    /// not necessarily unique.
    pub seq: u64,
}
impl ChangeRecord {
    pub fn new(id: impl Into<String>, seq: u64) -> Self {
        Self { id: id.into(), seq }
    }
}

/// Position to follow the change feed from.
///
/// `Seq(n)` means every change up to and including `n` has been applied, so
/// following resumes *after* `n`. `Live` ignores history entirely and starts
/// at the feed's current tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cursor {
    Live,
    Seq(u64),
}
impl Cursor {
    pub fn seq(&self) -> Option<u64> {
        match self {
            Self::Live => None,
            Self::Seq(seq) => Some(*seq),
        }
    }
}
impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => f.write_str("now"),
            Self::Seq(seq) => write!(f, "{seq}"),
        }
    }
}
impl FromStr for Cursor {
    type Err = crate::error::Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "now" => Ok(Self::Live),
            other => other.parse().map(Self::Seq).map_err(|_| exn::Exn::from(ErrorKind::InvalidSeq(s.to_string()))),
        }
    }
}
impl Serialize for Cursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Live => serializer.serialize_str("now"),
            Self::Seq(seq) => serializer.serialize_u64(*seq),
        }
    }
}
impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(seq) => Ok(Self::Seq(seq)),
            Raw::Text(text) => text.parse().map_err(|_| serde::de::Error::custom(format!("invalid cursor: {text}"))),
        }
    }
}

/// What the registry currently says about a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageMetadata {
    pub name: String,
    pub latest_version: Option<String>,
    pub tarball: Option<String>,
    /// No installable version exists: deprecated, unpublished, or removed.
    pub deprecated: bool,
}
impl PackageMetadata {
    /// Metadata for a package with an installable latest version.
    pub fn published(name: impl Into<String>, version: impl Into<String>, tarball: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            latest_version: Some(version.into()),
            tarball: Some(tarball.into()),
            deprecated: false,
        }
    }

    /// Metadata for a package that has nothing left to install.
    pub fn deprecated(name: impl Into<String>) -> Self {
        Self { name: name.into(), latest_version: None, tarball: None, deprecated: true }
    }
}
