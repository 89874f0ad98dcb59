//! Layered configuration for regsync.
//!
//! Sources, lowest precedence first:
//! 1. built-in defaults;
//! 2. a TOML, YAML or JSON file (`--config`, else `regsync.toml` in the
//!    platform config directory, if present);
//! 3. `REGSYNC_*` environment variables;
//! 4. command-line overrides.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::{OptionExt, ResultExt};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use regsync_registry::{Cursor, DEFAULT_FEED, DEFAULT_REGISTRY};
use regsync_sync::CommitPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "REGSYNC_";
const CONFIG_FILE: &str = "regsync.toml";
const STATE_FILE: &str = "state.sqlite";
/// Large enough that npm never considers a cached packument stale.
pub const DEFAULT_CACHE_MIN: u64 = 999_999_999;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the registry packuments are resolved against.
    pub registry: String,
    /// CouchDB database whose `_changes` feed is followed.
    pub feed: String,
    /// Maximum number of cache mutations in flight.
    pub concurrency: usize,
    /// Work items queued ahead of the workers before submission blocks.
    pub buffer: usize,
    /// Maximum metadata lookups in flight; defaults to `concurrency`.
    pub resolve_concurrency: Option<usize>,
    /// Cross-check the existing cache against the registry on startup.
    pub reconcile: bool,
    /// Pin the cache staleness threshold while running.
    pub cache_min: bool,
    pub cache_min_value: u64,
    /// Where to start following when nothing has been checkpointed yet.
    pub initial_since: Cursor,
    /// State database location; defaults to the platform data directory.
    pub state_path: Option<PathBuf>,
    /// npm cache root; asks npm when unset.
    pub npm_cache: Option<PathBuf>,
    /// Seconds a change feed long-poll may stay silent before reconnecting.
    pub inactivity_secs: u64,
    pub commit_policy: CommitPolicy,
    /// Resolve and log everything, but leave the cache and state untouched.
    pub dry_run: bool,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            registry: DEFAULT_REGISTRY.to_string(),
            feed: DEFAULT_FEED.to_string(),
            concurrency: 20,
            buffer: 16,
            resolve_concurrency: None,
            reconcile: true,
            cache_min: true,
            cache_min_value: DEFAULT_CACHE_MIN,
            initial_since: Cursor::Live,
            state_path: None,
            npm_cache: None,
            inactivity_secs: 60 * 60,
            commit_policy: CommitPolicy::default(),
            dry_run: false,
        }
    }
}

/// Command-line values that take precedence over every other source.
///
/// Unset fields leave lower layers alone.
#[derive(Debug, Default, Serialize)]
pub struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_min: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub npm_cache: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("", "", "regsync").ok_or_raise(|| ErrorKind::NoHome)
}

/// Pick a provider based on the file extension.
fn file_provider(path: &Path) -> Result<Figment> {
    let ext = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
    let figment = Figment::new();
    Ok(match ext.as_deref() {
        Some("toml") => figment.merge(Toml::file_exact(path)),
        Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
        Some("json") => figment.merge(Json::file_exact(path)),
        _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
    })
}

impl Config {
    /// Load and validate configuration from every source.
    pub fn load(file: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let file = match file {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            // The default location is optional, and so is having a home.
            None => project_dirs().ok().map(|d| d.config_dir().join(CONFIG_FILE)).filter(|p| p.is_file()),
        };
        extract(Self::figment(file.as_deref(), overrides)?)
    }

    /// Assemble the provider stack without extracting it.
    pub fn figment(file: Option<&Path>, overrides: Overrides) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = file {
            tracing::debug!(path = %path.display(), "Loading config file");
            figment = figment.merge(file_provider(path)?);
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX)).merge(Serialized::defaults(overrides)))
    }

    pub fn validate(&self) -> Result<()> {
        for (key, url) in [("registry", &self.registry), ("feed", &self.feed)] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                exn::bail!(ErrorKind::Invalid(key, url.clone()));
            }
        }
        for (key, value) in [
            ("concurrency", Some(self.concurrency)),
            ("buffer", Some(self.buffer)),
            ("resolve_concurrency", self.resolve_concurrency),
        ] {
            if value == Some(0) {
                exn::bail!(ErrorKind::Invalid(key, "must be at least 1".to_string()));
            }
        }
        if self.inactivity_secs == 0 {
            exn::bail!(ErrorKind::Invalid("inactivity_secs", "must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn resolve_concurrency(&self) -> usize {
        self.resolve_concurrency.unwrap_or(self.concurrency)
    }

    /// Configured state database path, or the platform default.
    pub fn state_path(&self) -> Result<PathBuf> {
        match &self.state_path {
            Some(path) => Ok(path.clone()),
            None => Ok(project_dirs()?.data_dir().join(STATE_FILE)),
        }
    }
}

fn extract(figment: Figment) -> Result<Config> {
    let config: Config = figment.extract().or_raise(|| ErrorKind::Parse)?;
    config.validate()?;
    Ok(config)
}
