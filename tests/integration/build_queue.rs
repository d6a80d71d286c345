//! Build queue timing, coalescing and recovery

use crate::integration::test_utils::{create_test_db, idle_feed, RecordingBuilder};
use feedbuild::build::BuildOptions;
use feedbuild::clock::Clock;
use feedbuild::error::FeedError;
use feedbuild::feed::FeedRegistry;
use feedbuild::scheduler::BuildQueue;
use feedbuild::store::{FeedDb, QueuedBuild};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const LATENCY: Duration = Duration::from_secs(60);

fn setup(feeds: &[&str], builder: Arc<RecordingBuilder>, db: FeedDb, clock: Clock) -> (BuildQueue, TempDir) {
    let input = TempDir::new().unwrap();
    let registry = Arc::new(FeedRegistry::with_feeds(
        feeds.iter().map(|id| idle_feed(id, input.path())).collect(),
    ));
    let queue = BuildQueue::new(registry, builder, db, LATENCY, clock);
    (queue, input)
}

async fn advance(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn test_repeated_requests_coalesce_into_one_build() {
    let clock = Clock::starting_at(0);
    let builder = Arc::new(RecordingBuilder::new(clock));
    let (queue, _input) = setup(&["F1"], builder.clone(), create_test_db(), clock);

    queue.enqueue("F1", BuildOptions::default()).unwrap();
    advance(10).await;
    queue.enqueue("F1", BuildOptions::default()).unwrap();
    advance(10).await;
    queue.enqueue("F1", BuildOptions::default()).unwrap();
    assert_eq!(queue.len(), 1);

    advance(59).await;
    assert!(builder.builds().is_empty(), "built before the window closed");

    advance(2).await;
    let builds = builder.builds();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].feed, "F1");
    assert_eq!(builds[0].at_ms, 80_000);
    assert!(queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_different_options_are_separate_requests() {
    let clock = Clock::starting_at(0);
    let builder = Arc::new(RecordingBuilder::new(clock));
    let (queue, _input) = setup(&["F1"], builder.clone(), create_test_db(), clock);

    let preview = BuildOptions::dry_run();
    queue.enqueue("F1", BuildOptions::default()).unwrap();
    queue.enqueue("F1", preview.clone()).unwrap();
    assert_eq!(queue.len(), 2);

    advance(61).await;
    let builds = builder.builds();
    assert_eq!(builds.len(), 2);
    assert_eq!(builds[0].opts, BuildOptions::default());
    assert_eq!(builds[1].opts, preview);
}

#[tokio::test(start_paused = true)]
async fn test_only_the_head_builds_at_a_time() {
    let clock = Clock::starting_at(0);
    let builder = Arc::new(RecordingBuilder::new(clock).taking(Duration::from_secs(30)));
    let (queue, _input) = setup(&["F1", "F2"], builder.clone(), create_test_db(), clock);

    queue.enqueue("F1", BuildOptions::default()).unwrap();
    queue.enqueue("F2", BuildOptions::default()).unwrap();

    advance(61).await;
    assert_eq!(builder.builds().len(), 1);
    assert!(queue.snapshot()[0].building);

    advance(30).await;
    let builds = builder.builds();
    assert_eq!(builds.len(), 2);
    assert_eq!(builds[1].feed, "F2");
    assert_eq!(builds[1].at_ms, 90_000);
}

#[tokio::test(start_paused = true)]
async fn test_a_request_during_a_build_waits_for_it() {
    let clock = Clock::starting_at(0);
    let builder = Arc::new(RecordingBuilder::new(clock).taking(Duration::from_secs(120)));
    let (queue, _input) = setup(&["F1"], builder.clone(), create_test_db(), clock);

    queue.enqueue("F1", BuildOptions::default()).unwrap();
    advance(61).await;
    queue.enqueue("F1", BuildOptions::default()).unwrap();
    assert_eq!(queue.len(), 2, "a building entry is never replaced");

    advance(120).await;
    let builds = builder.builds();
    assert_eq!(builds.len(), 2);
    assert_eq!(builds[1].at_ms, 180_000);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_feed_is_rejected() {
    let clock = Clock::starting_at(0);
    let builder = Arc::new(RecordingBuilder::new(clock));
    let (queue, _input) = setup(&["F1"], builder, create_test_db(), clock);

    let err = queue.enqueue("missing", BuildOptions::default()).unwrap_err();
    assert!(matches!(err, FeedError::FeedNotFound(id) if id == "missing"));
    assert!(queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_queue_is_persisted_on_every_change() {
    let clock = Clock::starting_at(0);
    let db = create_test_db();
    let builder = Arc::new(RecordingBuilder::new(clock));
    let (queue, _input) = setup(&["F1"], builder, db.clone(), clock);

    queue.enqueue("F1", BuildOptions::default()).unwrap();
    let persisted = db.load_build_queue().unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].feed, "F1");
    assert_eq!(persisted[0].time, 60_000);

    advance(61).await;
    assert!(db.load_build_queue().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_recovery_drops_unknown_feeds_and_runs_due_builds() {
    let clock = Clock::starting_at(100_000);
    let db = create_test_db();
    let mut extra = serde_json::Map::new();
    extra.insert("since".to_string(), json!("b1"));
    db.save_build_queue(&[
        QueuedBuild {
            feed: "gone".into(),
            opts: BuildOptions::default(),
            time: 0,
        },
        QueuedBuild {
            feed: "F1".into(),
            opts: BuildOptions {
                extra,
                ..BuildOptions::default()
            },
            time: 50_000,
        },
    ])
    .unwrap();

    let builder = Arc::new(RecordingBuilder::new(clock));
    let (queue, _input) = setup(&["F1"], builder.clone(), db.clone(), clock);
    queue.start().unwrap();

    let persisted = db.load_build_queue().unwrap();
    assert!(persisted.iter().all(|q| q.feed != "gone"));

    advance(1).await;
    let builds = builder.builds();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].feed, "F1");
    assert_eq!(builds[0].opts.extra.get("since"), Some(&json!("b1")));
    assert!(db.load_build_queue().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_recovery_keeps_future_due_times() {
    let clock = Clock::starting_at(0);
    let db = create_test_db();
    db.save_build_queue(&[QueuedBuild {
        feed: "F1".into(),
        opts: BuildOptions::default(),
        time: 30_000,
    }])
    .unwrap();

    let builder = Arc::new(RecordingBuilder::new(clock));
    let (queue, _input) = setup(&["F1"], builder.clone(), db, clock);
    queue.start().unwrap();

    advance(29).await;
    assert!(builder.builds().is_empty());
    advance(2).await;
    assert_eq!(builder.builds()[0].at_ms, 30_000);
}

fn since(build: &str) -> BuildOptions {
    let mut extra = serde_json::Map::new();
    extra.insert("since".to_string(), json!(build));
    BuildOptions {
        extra,
        ..BuildOptions::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_coalescing_compares_extra_options() {
    let clock = Clock::starting_at(0);
    let builder = Arc::new(RecordingBuilder::new(clock));
    let (queue, _input) = setup(&["F1"], builder.clone(), create_test_db(), clock);

    queue.enqueue("F1", since("b1")).unwrap();
    queue.enqueue("F1", since("b2")).unwrap();
    advance(10).await;
    queue.enqueue("F1", since("b1")).unwrap();
    assert_eq!(queue.len(), 2);

    advance(61).await;
    let builds = builder.builds();
    assert_eq!(builds.len(), 2);
    assert_eq!(builds[0].opts, since("b2"));
    assert_eq!(builds[0].at_ms, 60_000);
    assert_eq!(builds[1].opts, since("b1"), "the repeated request keeps its options");
    assert_eq!(builds[1].at_ms, 70_000, "and restarts its window");
}

#[tokio::test(start_paused = true)]
async fn test_failed_build_does_not_block_the_queue() {
    let clock = Clock::starting_at(0);
    let db = create_test_db();
    let builder = Arc::new(RecordingBuilder::new(clock).failing_for("bad"));
    let (queue, _input) = setup(&["bad", "good"], builder.clone(), db.clone(), clock);

    queue.enqueue("bad", BuildOptions::default()).unwrap();
    queue.enqueue("good", BuildOptions::default()).unwrap();

    advance(61).await;
    let feeds: Vec<String> = builder.builds().into_iter().map(|b| b.feed).collect();
    assert_eq!(feeds, vec!["bad", "good"]);
    assert!(queue.is_empty());
    assert!(db.load_build_queue().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_panicking_build_does_not_block_the_queue() {
    let clock = Clock::starting_at(0);
    let db = create_test_db();
    let builder = Arc::new(RecordingBuilder::new(clock).panicking_for("bad"));
    let (queue, _input) = setup(&["bad", "good"], builder.clone(), db.clone(), clock);

    queue.enqueue("bad", BuildOptions::default()).unwrap();
    queue.enqueue("good", BuildOptions::default()).unwrap();

    advance(600).await;
    let feeds: Vec<String> = builder.builds().into_iter().map(|b| b.feed).collect();
    assert_eq!(feeds, vec!["bad", "good"]);
    assert!(queue.is_empty(), "left behind: {:?}", queue.snapshot());
    assert!(db.load_build_queue().unwrap().is_empty());

    queue.enqueue("bad", BuildOptions::default()).unwrap();
    advance(61).await;
    assert_eq!(builder.builds().len(), 3, "later requests still run");
}
