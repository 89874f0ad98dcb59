use super::*;
use regsync_checkpoint::{CURSOR_KEY, MemoryState, STALENESS_KEY};
use regsync_registry::feed::{FeedEvent, MockFeed};
use regsync_registry::resolve::MockResolver;
use regsync_registry::{ChangeRecord, PackageMetadata};
use regsync_store::backend::{MockCacheStore, StoreCall};
use std::time::Duration;

const OVERRIDE: u64 = 999_999_999;

struct Harness {
    feed: Arc<MockFeed>,
    resolver: Arc<MockResolver>,
    store: Arc<MockCacheStore>,
    state: Arc<MemoryState>,
}
impl Harness {
    fn new(feed: MockFeed, resolver: MockResolver, store: MockCacheStore) -> Self {
        Self {
            feed: Arc::new(feed),
            resolver: Arc::new(resolver),
            store: Arc::new(store),
            state: Arc::new(MemoryState::default()),
        }
    }

    fn with_state(mut self, state: MemoryState) -> Self {
        self.state = Arc::new(state);
        self
    }

    fn pipeline(&self, options: PipelineOptions) -> Pipeline {
        Pipeline::new(
            self.feed.clone(),
            self.resolver.clone(),
            self.store.clone(),
            CheckpointStore::new(self.state.clone(), Cursor::Live),
            self.state.clone(),
            options,
        )
    }

    async fn run(&self, options: PipelineOptions) -> Result<Summary> {
        self.pipeline(options).run(CancellationToken::new()).await
    }

    fn cursor(&self) -> Option<i64> {
        self.state.value(CURSOR_KEY)
    }
}

fn quiet_feed() -> MockFeed {
    MockFeed::with_events(Vec::<FeedEvent>::new())
}

fn tarball(name: &str, version: &str) -> String {
    format!("https://registry.npmjs.org/{name}/-/{name}-{version}.tgz")
}

/// Poll `condition` until it holds, failing the test after a few seconds.
async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}

#[tokio::test]
async fn test_warms_changed_package() {
    let harness = Harness::new(
        MockFeed::with_changes([("foo", 10)]),
        MockResolver::with_latest([("foo", "1.2.0")]),
        MockCacheStore::default(),
    );
    let summary = harness.run(PipelineOptions::default()).await.unwrap();
    assert_eq!(harness.store.adds(), [("foo".to_string(), "1.2.0".to_string(), tarball("foo", "1.2.0"))]);
    assert_eq!(harness.cursor(), Some(10));
    assert_eq!(summary.added, 1);
    assert_eq!(summary.committed, Some(10));
}

#[tokio::test]
async fn test_invalidates_deprecated_package() {
    let harness = Harness::new(
        MockFeed::with_changes([("bar", 11)]),
        MockResolver::with_metadata([PackageMetadata::deprecated("bar")]),
        MockCacheStore::with_packages([("bar", "0.3.0")]),
    );
    let summary = harness.run(PipelineOptions::default()).await.unwrap();
    assert_eq!(harness.store.invalidations(), [("bar".to_string(), None)]);
    assert_eq!(harness.store.mutation_count(), 1);
    assert_eq!(harness.cursor(), Some(11));
    assert_eq!(summary.invalidated, 1);
}

#[tokio::test]
async fn test_cached_version_is_not_added_again() {
    let harness = Harness::new(
        MockFeed::with_changes([("foo", 3)]),
        MockResolver::with_latest([("foo", "1.2.0")]),
        MockCacheStore::with_packages([("foo", "1.2.0")]),
    );
    let summary = harness.run(PipelineOptions::default()).await.unwrap();
    assert_eq!(harness.store.mutation_count(), 0);
    assert_eq!(summary.already_warm, 1);
    assert_eq!(harness.cursor(), Some(3));
}

#[tokio::test]
async fn test_uncached_deprecated_package_is_left_alone() {
    let harness =
        Harness::new(MockFeed::with_changes([("gone", 4)]), MockResolver::default(), MockCacheStore::default());
    let summary = harness.run(PipelineOptions::default()).await.unwrap();
    assert!(harness.store.invalidations().is_empty());
    assert_eq!(summary.not_cached, 1);
    assert_eq!(harness.cursor(), Some(4));
}

#[tokio::test]
async fn test_failed_update_still_advances_checkpoint() {
    let harness = Harness::new(
        MockFeed::with_changes([("foo", 10), ("bar", 11)]),
        MockResolver::with_latest([("foo", "1.0.0"), ("bar", "1.0.0")]),
        MockCacheStore::default().failing_on("foo"),
    );
    let summary = harness.run(PipelineOptions::default()).await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.added, 1);
    assert_eq!(harness.cursor(), Some(11));
}

#[tokio::test]
async fn test_unresolvable_change_is_skipped() {
    let harness = Harness::new(
        MockFeed::with_changes([("a", 1), ("flaky", 2), ("c", 3)]),
        MockResolver::with_latest([("a", "1.0.0"), ("c", "1.0.0")]).failing_on("flaky"),
        MockCacheStore::default(),
    );
    let summary = harness.run(PipelineOptions::default()).await.unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.added, 2);
    assert!(harness.store.adds().iter().all(|(name, _, _)| name != "flaky"));
    // The skipped sequence never blocks later commits.
    assert_eq!(harness.cursor(), Some(3));
    let saves = harness.state.saves(CURSOR_KEY);
    assert!(!saves.contains(&2));
    assert!(saves.windows(2).all(|w| w[0] < w[1]), "checkpoint moved backwards: {saves:?}");
}

#[tokio::test]
async fn test_feed_errors_do_not_stop_following() {
    let harness = Harness::new(
        MockFeed::with_events([
            FeedEvent::Change(ChangeRecord::new("a", 1)),
            FeedEvent::Disconnect,
            FeedEvent::Change(ChangeRecord::new("b", 2)),
        ]),
        MockResolver::with_latest([("a", "1.0.0"), ("b", "1.0.0")]),
        MockCacheStore::default(),
    );
    let summary = harness.run(PipelineOptions::default()).await.unwrap();
    assert_eq!(summary.added, 2);
    assert_eq!(harness.cursor(), Some(2));
}

#[tokio::test]
async fn test_reconciliation_never_moves_checkpoint() {
    let harness = Harness::new(
        quiet_feed(),
        MockResolver::with_latest([("foo", "2.0.0")]),
        MockCacheStore::with_packages([("foo", "1.0.0")]).with_manifests([regsync_store::ManifestEntry {
            name: "foo".to_string(),
            version: "1.0.0".to_string(),
            resolved_from: Some(tarball("foo", "1.0.0")),
        }]),
    )
    .with_state(MemoryState::with_values([(CURSOR_KEY, 5)]));
    let options = PipelineOptions { reconcile: true, ..PipelineOptions::default() };
    let summary = harness.run(options).await.unwrap();
    assert_eq!(summary.reconciled.map(|r| r.submitted), Some(1));
    assert_eq!(summary.added, 1);
    assert_eq!(harness.store.cached_versions("foo"), ["1.0.0", "2.0.0"]);
    assert_eq!(harness.cursor(), Some(5));
    assert!(harness.state.saves(CURSOR_KEY).is_empty());
}

#[tokio::test]
async fn test_reconciliation_respects_filter() {
    let harness = Harness::new(
        quiet_feed(),
        MockResolver::with_latest([("foo", "2.0.0"), ("private", "2.0.0")]),
        MockCacheStore::default().with_manifests([
            regsync_store::ManifestEntry {
                name: "foo".to_string(),
                version: "1.0.0".to_string(),
                resolved_from: Some(tarball("foo", "1.0.0")),
            },
            regsync_store::ManifestEntry {
                name: "private".to_string(),
                version: "1.0.0".to_string(),
                resolved_from: Some("https://npm.internal/private/-/private-1.0.0.tgz".to_string()),
            },
        ]),
    );
    let options = PipelineOptions { reconcile: true, ..PipelineOptions::default() };
    let pipeline =
        harness.pipeline(options).with_filter(crate::reconcile::RegistryOrigin::new("https://registry.npmjs.org/"));
    let summary = pipeline.run(CancellationToken::new()).await.unwrap();
    let reconciled = summary.reconciled.unwrap();
    assert_eq!((reconciled.submitted, reconciled.foreign), (1, 1));
    assert_eq!(harness.resolver.calls(), ["foo"]);
}

#[tokio::test]
async fn test_resumes_from_checkpoint() {
    let harness = Harness::new(
        MockFeed::with_changes([("old", 9), ("same", 10), ("new", 11)]),
        MockResolver::with_latest([("old", "1.0.0"), ("same", "1.0.0"), ("new", "1.0.0")]),
        MockCacheStore::default(),
    )
    .with_state(MemoryState::with_values([(CURSOR_KEY, 10)]));
    harness.run(PipelineOptions::default()).await.unwrap();
    assert_eq!(harness.feed.subscriptions(), [Cursor::Seq(10)]);
    assert_eq!(harness.resolver.calls(), ["new"]);
    assert_eq!(harness.cursor(), Some(11));
}

#[tokio::test]
async fn test_since_overrides_checkpoint() {
    let harness = Harness::new(quiet_feed(), MockResolver::default(), MockCacheStore::default())
        .with_state(MemoryState::with_values([(CURSOR_KEY, 10)]));
    let options = PipelineOptions { since: Some(Cursor::Live), ..PipelineOptions::default() };
    harness.run(options).await.unwrap();
    assert_eq!(harness.feed.subscriptions(), [Cursor::Live]);
}

#[tokio::test]
async fn test_staleness_overridden_while_running() {
    let harness = Harness::new(
        MockFeed::with_changes([("foo", 1)]),
        MockResolver::with_latest([("foo", "1.0.0")]),
        MockCacheStore::default().with_staleness(10),
    );
    let options = PipelineOptions { staleness: Some(OVERRIDE), ..PipelineOptions::default() };
    harness.run(options).await.unwrap();
    let settings: Vec<_> =
        harness.store.calls().into_iter().filter(|c| matches!(c, StoreCall::SetStaleness(_))).collect();
    assert_eq!(settings, [StoreCall::SetStaleness(OVERRIDE), StoreCall::SetStaleness(10)]);
    assert_eq!(harness.state.value(STALENESS_KEY), None);
}

#[tokio::test]
async fn test_staleness_restored_when_startup_fails() {
    let harness = Harness::new(
        quiet_feed(),
        MockResolver::default(),
        MockCacheStore::default().with_staleness(10),
    )
    .with_state(MemoryState::with_values([(CURSOR_KEY, -1)]));
    let options = PipelineOptions { staleness: Some(OVERRIDE), ..PipelineOptions::default() };
    let pipeline = harness.pipeline(options);
    let err = pipeline.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::Checkpoint));
    assert_eq!(harness.store.current_staleness(), 10);
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[tokio::test]
async fn test_staleness_failure_is_fatal() {
    let harness = Harness::new(
        MockFeed::with_changes([("foo", 1)]),
        MockResolver::with_latest([("foo", "1.0.0")]),
        MockCacheStore::default().failing_staleness(),
    );
    let options = PipelineOptions { staleness: Some(OVERRIDE), ..PipelineOptions::default() };
    let err = harness.run(options).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::Tuning));
    assert!(harness.feed.subscriptions().is_empty());
}

#[tokio::test]
async fn test_shutdown_finishes_accepted_work() {
    let harness = Arc::new(Harness::new(
        MockFeed::with_changes([("slow", 1)]).pending(),
        MockResolver::with_latest([("slow", "1.0.0")]),
        MockCacheStore::default(),
    ));
    harness.store.hold("slow");
    let pipeline = Arc::new(harness.pipeline(PipelineOptions::default()));
    let mut status = pipeline.subscribe();
    let shutdown = CancellationToken::new();
    let running = tokio::spawn({
        let pipeline = pipeline.clone();
        let shutdown = shutdown.clone();
        async move { pipeline.run(shutdown).await }
    });

    harness.store.wait_in_flight(1).await;
    shutdown.cancel();
    status.wait_for(|s| *s == PipelineState::ShuttingDown).await.unwrap();
    assert!(harness.store.cached_versions("slow").is_empty());

    harness.store.release("slow");
    let summary = running.await.unwrap().unwrap();
    assert_eq!(summary.added, 1);
    assert_eq!(harness.cursor(), Some(1));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[rstest::rstest]
#[case(CommitPolicy::Ordered, None)]
#[case(CommitPolicy::MaxSeen, Some(2))]
#[tokio::test]
async fn test_commit_policy_with_out_of_order_completion(
    #[case] commit_policy: CommitPolicy,
    #[case] while_held: Option<i64>,
) {
    let harness = Arc::new(Harness::new(
        MockFeed::with_changes([("a", 1), ("b", 2)]).pending(),
        MockResolver::with_latest([("a", "1.0.0"), ("b", "1.0.0")]),
        MockCacheStore::default(),
    ));
    harness.store.hold("a");
    let pipeline = Arc::new(harness.pipeline(PipelineOptions { commit_policy, ..PipelineOptions::default() }));
    let shutdown = CancellationToken::new();
    let running = tokio::spawn({
        let pipeline = pipeline.clone();
        let shutdown = shutdown.clone();
        async move { pipeline.run(shutdown).await }
    });

    // "b" finishes while "a" is still stuck.
    eventually(|| !harness.store.cached_versions("b").is_empty()).await;
    match while_held {
        Some(expected) => eventually(|| harness.cursor() == Some(expected)).await,
        None => {
            tokio::time::sleep(Duration::from_millis(50)).await;
            assert_eq!(harness.cursor(), None);
        },
    }

    harness.store.release("a");
    eventually(|| harness.cursor() == Some(2)).await;
    shutdown.cancel();
    running.await.unwrap().unwrap();
    assert_eq!(harness.state.saves(CURSOR_KEY), [2]);
}

#[tokio::test]
async fn test_state_transitions() {
    let harness = Arc::new(Harness::new(
        quiet_feed().pending(),
        MockResolver::default(),
        MockCacheStore::default(),
    ));
    let pipeline = Arc::new(harness.pipeline(PipelineOptions { reconcile: true, ..PipelineOptions::default() }));
    assert_eq!(pipeline.state(), PipelineState::Idle);
    let mut status = pipeline.subscribe();
    let shutdown = CancellationToken::new();
    let running = tokio::spawn({
        let pipeline = pipeline.clone();
        let shutdown = shutdown.clone();
        async move { pipeline.run(shutdown).await }
    });
    status.wait_for(|s| *s == PipelineState::Following).await.unwrap();
    shutdown.cancel();
    let summary = running.await.unwrap().unwrap();
    assert_eq!(summary.reconciled, Some(ReconcileReport::default()));
    assert_eq!(pipeline.state(), PipelineState::Stopped);
}

#[tokio::test]
async fn test_checkpoint_write_failure_is_not_fatal() {
    let harness = Harness::new(
        MockFeed::with_changes([("foo", 1)]),
        MockResolver::with_latest([("foo", "1.0.0")]),
        MockCacheStore::default(),
    )
    .with_state(MemoryState::default().failing_writes());
    let summary = harness.run(PipelineOptions::default()).await.unwrap();
    assert_eq!(summary.added, 1);
    assert_eq!(summary.committed, None);
}

#[tokio::test]
async fn test_failed_checkpoint_is_saved_on_shutdown() {
    let harness = Harness::new(
        MockFeed::with_changes([("foo", 7)]),
        MockResolver::with_latest([("foo", "1.0.0")]),
        MockCacheStore::default(),
    )
    .with_state(MemoryState::default().failing_saves(1));
    let summary = harness.run(PipelineOptions::default()).await.unwrap();
    assert_eq!(summary.added, 1);
    assert_eq!(summary.committed, Some(7));
    assert_eq!(harness.cursor(), Some(7));
    assert_eq!(harness.state.saves(CURSOR_KEY), [7]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_burst_stays_within_bounds() {
    let changes: Vec<(String, u64)> = (1..=200).map(|seq| (format!("pkg-{seq}"), seq)).collect();
    let latest: Vec<(String, String)> = changes.iter().map(|(name, _)| (name.clone(), "1.0.0".to_string())).collect();
    let harness = Harness::new(
        MockFeed::with_changes(changes.iter().map(|(name, seq)| (name.as_str(), *seq))),
        MockResolver::with_latest(latest.iter().map(|(n, v)| (n.as_str(), v.as_str())))
            .with_delay(Duration::from_millis(1)),
        MockCacheStore::default().with_delay(Duration::from_millis(2)),
    );
    let options = PipelineOptions {
        pool: PoolOptions { concurrency: 5, buffer: 3 },
        resolve_concurrency: 4,
        ..PipelineOptions::default()
    };
    let summary = harness.run(options).await.unwrap();
    assert_eq!(summary.added, 200);
    assert!(harness.store.peak_in_flight() <= 5);
    assert!(harness.resolver.peak_in_flight() <= 4);
    assert_eq!(harness.cursor(), Some(200));
    let saves = harness.state.saves(CURSOR_KEY);
    assert!(saves.windows(2).all(|w| w[0] < w[1]));
}
