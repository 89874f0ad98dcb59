//! npm-backed cache store.
//!
//! Mutations shell out to the `npm` executable so that npm's own locking and
//! index bookkeeping stay authoritative. Reads go straight to the on-disk
//! layout (`{root}/{name}/{version}/package.tgz`), which avoids paying a Node
//! start-up for every existence check.

use crate::backend::{CacheStore, ManifestStream};
use crate::error::{ErrorKind, Result};
use crate::models::{ManifestEntry, RawManifest};
use crate::name::{validate_name, validate_version};
use async_stream::stream;
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;
use tokio::process::Command;
use tracing::instrument;

const TARBALL: &str = "package.tgz";
const MANIFEST: &str = "package/package.json";
const STALENESS_KEY: &str = "cache-min";

enum WalkEntry {
    Manifest(PathBuf),
    Descend(PathBuf),
    Skip,
}

/// Cache store driving a locally installed `npm`.
///
/// # Examples
///
/// ```no_run
/// use regsync_store::backend::NpmCacheStore;
///
/// # async fn example() -> regsync_store::error::Result<()> {
/// // Ask npm where its cache lives.
/// let store = NpmCacheStore::discover(None).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct NpmCacheStore {
    name: String,
    npm: PathBuf,
    /// Root directory of the npm cache
    root: PathBuf,
}
impl NpmCacheStore {
    /// Create a store from an explicit `npm` executable and cache root.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache root is not absolute or exists but is
    /// not a directory.
    pub fn new(npm: impl Into<PathBuf>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() || (root.exists() && !root.is_dir()) {
            exn::bail!(ErrorKind::InvalidRoot(root));
        }
        Ok(Self { name: "npm".to_string(), npm: npm.into(), root })
    }

    /// Locate `npm` on `PATH` and, unless `root` is given, ask it where its
    /// cache lives.
    pub async fn discover(root: Option<PathBuf>) -> Result<Self> {
        let npm = which::which("npm").or_raise(|| ErrorKind::NpmNotFound)?;
        let root = match root {
            Some(root) => root,
            None => PathBuf::from(capture(&npm, &["config", "get", "cache"]).await?.trim()),
        };
        tracing::debug!(npm = %npm.display(), root = %root.display(), "Using npm cache");
        Self::new(npm, root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn package_dir(&self, name: &str) -> Result<PathBuf> {
        Ok(self.root.join(validate_name(name)?))
    }

    async fn run(&self, args: &[&str]) -> Result<()> {
        run(&self.npm, args).await
    }

    /// Classify a directory entry found while walking the cache root.
    ///
    /// The cache layout is `{name}/{version}/package/package.json`, with
    /// scoped packages nested one level deeper under `@scope/`. `depth` is
    /// the number of name components already consumed.
    async fn process_entry(path: PathBuf, file_name: &str, depth: usize) -> Result<WalkEntry> {
        // npm keeps its own bookkeeping (`_locks`, `_git-remotes`, `_cacache`)
        // next to the packages.
        if file_name.starts_with('_') || file_name.starts_with('.') {
            return Ok(WalkEntry::Skip);
        }
        let metadata = fs::metadata(&path).await.map_err(ErrorKind::Io)?;
        if !metadata.is_dir() {
            return Ok(WalkEntry::Skip);
        }
        match depth {
            0 if file_name.starts_with('@') => Ok(WalkEntry::Descend(path)),
            // A version directory: only interesting if it holds a manifest.
            _ if fs::try_exists(path.join(MANIFEST)).await.map_err(ErrorKind::Io)? => {
                Ok(WalkEntry::Manifest(path.join(MANIFEST)))
            },
            _ => Ok(WalkEntry::Descend(path)),
        }
    }

    async fn read_manifest(path: &Path) -> Result<ManifestEntry> {
        let bytes = fs::read(path).await.map_err(ErrorKind::Io)?;
        let raw: RawManifest =
            serde_json::from_slice(&bytes).or_raise(|| ErrorKind::InvalidManifest(path.to_path_buf()))?;
        // package/package.json -> {version}/ -> {name}/
        let version_dir = path.parent().and_then(Path::parent);
        let version = raw
            .version
            .or_else(|| version_dir.and_then(Path::file_name).map(|v| v.to_string_lossy().into_owned()))
            .ok_or_raise(|| ErrorKind::InvalidManifest(path.to_path_buf()))?;
        let name = raw.name.ok_or_raise(|| ErrorKind::InvalidManifest(path.to_path_buf()))?;
        Ok(ManifestEntry { name, version, resolved_from: raw.resolved })
    }
}

async fn output(npm: &Path, args: &[&str]) -> Result<std::process::Output> {
    let command = format!("npm {}", args.join(" "));
    let output = Command::new(npm)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .or_raise(|| ErrorKind::Spawn(command.clone()))?;
    if !output.status.success() {
        exn::bail!(ErrorKind::CommandFailed {
            command,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

async fn run(npm: &Path, args: &[&str]) -> Result<()> {
    output(npm, args).await.map(|_| ())
}

async fn capture(npm: &Path, args: &[&str]) -> Result<String> {
    let output = output(npm, args).await?;
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn parse_staleness(raw: &str) -> Result<u64> {
    let raw = raw.trim();
    raw.parse::<u64>().or_raise(|| ErrorKind::InvalidSetting(STALENESS_KEY, raw.to_string()))
}

#[async_trait]
impl CacheStore for NpmCacheStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, name: &str, version: Option<&str>) -> Result<bool> {
        let dir = self.package_dir(name)?;
        let path = match version {
            Some(version) => dir.join(validate_version(version)?).join(TARBALL),
            None => dir,
        };
        Ok(fs::try_exists(&path).await.map_err(ErrorKind::Io)?)
    }

    #[instrument(skip(self, tarball))]
    async fn add(&self, name: &str, version: &str, tarball: &str) -> Result<()> {
        validate_name(name)?;
        validate_version(version)?;
        self.run(&["cache", "add", tarball, "--silent"]).await
    }

    #[instrument(skip(self))]
    async fn invalidate(&self, name: &str, version: Option<&str>) -> Result<()> {
        validate_name(name)?;
        let target = match version {
            Some(version) => format!("{name}@{}", validate_version(version)?),
            None => name.to_string(),
        };
        self.run(&["cache", "clean", &target, "--silent"]).await
    }

    fn manifests(&self) -> ManifestStream<'_> {
        let mut stack = vec![(self.root.clone(), 0usize)];
        Box::pin(stream! {
            'dirs: while let Some((current, depth)) = stack.pop() {
                let mut entries = match fs::read_dir(&current).await {
                    Ok(entries) => entries,
                    // An empty (or not yet created) cache has no manifests.
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue 'dirs,
                    Err(err) => {
                        yield Err(exn::Exn::from(ErrorKind::Io(err)));
                        continue 'dirs;
                    },
                };
                'entries: loop {
                    let entry = match entries.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => break 'entries,
                        Err(err) => { yield Err(exn::Exn::from(ErrorKind::Io(err))); continue 'entries; },
                    };
                    let file_name = entry.file_name().to_string_lossy().into_owned();
                    match Self::process_entry(entry.path(), &file_name, depth).await {
                        Ok(WalkEntry::Manifest(path)) => yield Self::read_manifest(&path).await,
                        // Never deeper than @scope/name/version.
                        Ok(WalkEntry::Descend(dir)) if depth < 2 => stack.push((dir, depth + 1)),
                        Ok(WalkEntry::Descend(_)) | Ok(WalkEntry::Skip) => {},
                        Err(e) => yield Err(e),
                    }
                }
            }
        })
    }

    async fn staleness(&self) -> Result<u64> {
        parse_staleness(&capture(&self.npm, &["config", "get", STALENESS_KEY]).await?)
    }

    #[instrument(skip(self))]
    async fn set_staleness(&self, seconds: u64) -> Result<()> {
        self.run(&["--silent", "config", "set", STALENESS_KEY, &seconds.to_string()]).await
    }
}
