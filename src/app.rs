//! Building the pipeline from configuration.

use crate::cli::Args;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use regsync_checkpoint::{CheckpointStore, Database, Repository, StateHandle};
use regsync_config::Config;
use regsync_registry::feed::CouchFeed;
use regsync_registry::resolve::RegistryResolver;
use regsync_registry::{FeedHandle, ResolverHandle};
use regsync_store::CacheHandle;
use regsync_store::backend::{DryRunStore, NpmCacheStore};
use regsync_sync::pool::PoolOptions;
use regsync_sync::{Pipeline, PipelineOptions, RegistryOrigin, Summary};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn pipeline_options(config: &Config, args: &Args) -> PipelineOptions {
    PipelineOptions {
        pool: PoolOptions { concurrency: config.concurrency, buffer: config.buffer },
        resolve_concurrency: config.resolve_concurrency(),
        reconcile: config.reconcile,
        staleness: config.cache_min.then_some(config.cache_min_value),
        since: args.since,
        commit_policy: config.commit_policy,
    }
}

async fn open_state(config: &Config) -> Result<(Database, StateHandle)> {
    let path = config.state_path().or_raise(|| ErrorKind::Config)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::State)?;
    }
    tracing::debug!(path = %path.display(), "Opening state database");
    let db = Database::connect(&path).await.or_raise(|| ErrorKind::State)?;
    let repo = Repository::new(db.pool().clone(), config.dry_run);
    Ok((db, Arc::new(repo)))
}

async fn open_store(config: &Config) -> Result<CacheHandle> {
    let npm = NpmCacheStore::discover(config.npm_cache.clone()).await.or_raise(|| ErrorKind::Store)?;
    tracing::debug!(root = %npm.root().display(), "Using npm cache");
    let store: CacheHandle = Arc::new(npm);
    Ok(match config.dry_run {
        true => Arc::new(DryRunStore::new(store)),
        false => store,
    })
}

/// Load configuration, connect everything, and sync until `shutdown`.
pub async fn run(args: Args, shutdown: CancellationToken) -> Result<Summary> {
    let config = Config::load(args.config.as_deref(), args.overrides()).or_raise(|| ErrorKind::Config)?;
    tracing::debug!(?config, "Loaded configuration");
    if config.dry_run {
        tracing::warn!("Dry run: the cache and saved state will not be modified");
    }

    let (db, state) = open_state(&config).await?;
    let store = open_store(&config).await?;
    let feed: FeedHandle = Arc::new(
        CouchFeed::new(&config.feed)
            .or_raise(|| ErrorKind::Registry)?
            .with_inactivity(Duration::from_secs(config.inactivity_secs)),
    );
    let resolver: ResolverHandle = Arc::new(RegistryResolver::new(&config.registry).or_raise(|| ErrorKind::Registry)?);
    let checkpoint = CheckpointStore::new(state.clone(), config.initial_since);

    let pipeline = Pipeline::new(feed, resolver, store, checkpoint, state, pipeline_options(&config, &args))
        .with_filter(RegistryOrigin::new(config.registry.clone()));
    let result = pipeline.run(shutdown).await.or_raise(|| ErrorKind::Sync);
    db.close().await;
    result
}
