//! End-to-end builds: record, publish layout, change detection and packaging

use crate::integration::test_utils::{create_test_db, create_test_tree, FakeHttp, FakeImageService};
use feedbuild::build::{BuildOptions, Builder, FeedBuilder, MANIFEST_FILE};
use feedbuild::clock::Clock;
use feedbuild::config::DirsConfig;
use feedbuild::context::{BuildContext, DownloadContext};
use feedbuild::error::BuildError;
use feedbuild::feed::Feed;
use feedbuild::store::FeedDb;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    db: FeedDb,
    builder: Builder,
    feed: Feed,
    _input: TempDir,
    output: TempDir,
    publish: TempDir,
}

fn fixture() -> Fixture {
    let input = create_test_tree(&[("style.css", "body { margin: 0; }")]);
    let output = TempDir::new().unwrap();
    let publish = TempDir::new().unwrap();
    let db = create_test_db();

    let dirs = DirsConfig {
        output: output.path().to_path_buf(),
        publish: publish.path().to_path_buf(),
    };
    let builder = Builder::new(db.clone(), dirs, Arc::new(FakeHttp::new()), Clock::new())
        .with_image_service(Arc::new(FakeImageService::new()));

    let feed = Feed::new(
        "news",
        input.path(),
        |_: &DownloadContext| Ok::<_, BuildError>(()),
        |cx: &BuildContext| {
            cx.cp("style.css", "")?;
            let posts = cx.data()["posts"].clone();
            cx.json_to(&posts, "posts.json", true)?;
            Ok::<_, BuildError>(json!({"count": posts.as_array().map(|p| p.len())}))
        },
    );

    Fixture {
        db,
        builder,
        feed,
        _input: input,
        output,
        publish,
    }
}

fn add_post(db: &FeedDb, id: u64, title: &str) {
    db.upsert_post(
        "news",
        json!({"$feedID": "news", "$id": id, "title": title})
            .as_object()
            .cloned()
            .unwrap(),
    )
    .unwrap();
}

#[tokio::test]
async fn test_first_build_is_recorded_and_published() {
    let fx = fixture();
    add_post(&fx.db, 1, "hello");

    let outcome = fx.builder.build_feed(&fx.feed, &BuildOptions::default()).await.unwrap();
    assert!(outcome.new_content);
    let build_id = outcome.build_id.expect("saved build");
    assert_eq!(
        outcome.files.keys().cloned().collect::<Vec<_>>(),
        vec!["posts.json".to_string(), "style.css".to_string()]
    );

    let root = fx.publish.path().join("news").join(&build_id);
    assert!(root.join("content/style.css").exists());
    assert!(root.join("content.zip").exists());
    let manifest: Value =
        serde_json::from_slice(&std::fs::read(root.join("content").join(MANIFEST_FILE)).unwrap()).unwrap();
    assert_eq!(manifest["buildid"], json!(build_id));
    assert_eq!(manifest["feedid"], json!("news"));
    assert_eq!(manifest["files"], json!(["posts.json", "style.css"]));

    let builds = fx.db.get_feed_builds("news").unwrap();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].seq, 1);
    assert_eq!(builds[0].meta, json!({"count": 1}));
    assert!(!fx.output.path().join("news").exists(), "output moved to publish");
}

#[tokio::test]
async fn test_identical_rebuild_has_no_new_content() {
    let fx = fixture();
    add_post(&fx.db, 1, "hello");

    let first = fx.builder.build_feed(&fx.feed, &BuildOptions::default()).await.unwrap();
    let second = fx.builder.build_feed(&fx.feed, &BuildOptions::default()).await.unwrap();

    assert!(first.new_content);
    assert!(!second.new_content);
    assert!(second.build_id.is_none());
    assert_eq!(first.files, second.files);
    assert_eq!(fx.db.get_feed_builds("news").unwrap().len(), 1);
}

#[tokio::test]
async fn test_changed_posts_produce_the_next_build() {
    let fx = fixture();
    add_post(&fx.db, 1, "hello");
    let first = fx.builder.build_feed(&fx.feed, &BuildOptions::default()).await.unwrap();

    add_post(&fx.db, 2, "again");
    let second = fx.builder.build_feed(&fx.feed, &BuildOptions::default()).await.unwrap();
    assert!(second.new_content);
    assert_ne!(first.build_id, second.build_id);

    let builds = fx.db.get_feed_builds("news").unwrap();
    assert_eq!(builds.iter().map(|b| b.seq).collect::<Vec<_>>(), vec![2, 1]);
}

#[tokio::test]
async fn test_dry_run_writes_manifest_without_saving() {
    let fx = fixture();
    add_post(&fx.db, 1, "hello");

    let outcome = fx.builder.build_feed(&fx.feed, &BuildOptions::dry_run()).await.unwrap();
    assert!(outcome.new_content);
    assert!(outcome.build_id.is_none());
    assert!(fx.db.get_feed_builds("news").unwrap().is_empty());

    let out = fx.output.path().join("news");
    assert!(out.join("style.css").exists());
    assert!(out.join(MANIFEST_FILE).exists());
}

#[tokio::test]
async fn test_script_failure_fails_the_build() {
    let fx = fixture();
    let broken = Feed::new(
        "news",
        fx.feed.in_path(),
        |_: &DownloadContext| Ok::<_, BuildError>(()),
        |cx: &BuildContext| {
            cx.file("missing.css")?;
            Ok::<_, BuildError>(Value::Null)
        },
    );

    let err = fx.builder.build_feed(&broken, &BuildOptions::default()).await.unwrap_err();
    assert!(err.to_string().contains("missing.css"), "{}", err);
    assert!(fx.db.get_feed_builds("news").unwrap().is_empty());
}

#[tokio::test]
async fn test_changes_since_a_build_are_packaged() {
    let fx = fixture();
    add_post(&fx.db, 1, "hello");
    let first = fx.builder.build_feed(&fx.feed, &BuildOptions::default()).await.unwrap();
    add_post(&fx.db, 2, "again");
    let second = fx.builder.build_feed(&fx.feed, &BuildOptions::default()).await.unwrap();

    let since = first.build_id.unwrap();
    let zip_path = fx.builder.package_since(&fx.feed, &since).await.unwrap();

    let latest = second.build_id.unwrap();
    assert_eq!(
        zip_path,
        fx.publish
            .path()
            .join("news")
            .join(&latest)
            .join(format!("{}-content.zip", since))
    );
    let archive = zip::ZipArchive::new(std::fs::File::open(&zip_path).unwrap()).unwrap();
    let names: Vec<&str> = archive.file_names().collect();
    assert!(names.contains(&"posts.json"));
    assert!(!names.contains(&"style.css"), "unchanged files are left out");
}

#[tokio::test]
async fn test_failed_publish_leaves_no_build_record() {
    let fx = fixture();
    add_post(&fx.db, 1, "hello");
    // A file where the feed's publish directory belongs
    std::fs::write(fx.publish.path().join("news"), b"in the way").unwrap();

    let result = fx.builder.build_feed(&fx.feed, &BuildOptions::default()).await;
    assert!(result.is_err());
    assert!(fx.db.get_feed_builds("news").unwrap().is_empty());

    std::fs::remove_file(fx.publish.path().join("news")).unwrap();
    let retry = fx.builder.build_feed(&fx.feed, &BuildOptions::default()).await.unwrap();
    assert!(retry.new_content, "the same tree is new again after a failed publish");
    let build_id = retry.build_id.expect("saved build");
    assert!(fx.publish.path().join("news").join(&build_id).join("content.zip").exists());

    let builds = fx.db.get_feed_builds("news").unwrap();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].seq, 1);
}
