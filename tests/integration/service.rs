//! Service wiring: downloads feeding the build queue, post updates and schedules

use crate::integration::test_utils::{create_test_db, FakeHttp, RecordingBuilder};
use feedbuild::clock::Clock;
use feedbuild::config::FeedbuildConfig;
use feedbuild::context::{BuildContext, DownloadContext};
use feedbuild::error::BuildError;
use feedbuild::feed::{Feed, FeedRegistry, Schedule};
use feedbuild::service::{PostStatus, PostUpdate, Service};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const FEED_URL: &str = "https://feeds.test/news.json";

fn news_feed() -> Feed {
    Feed::new(
        "news",
        "in",
        |cx: &DownloadContext| {
            let url = cx.url().unwrap_or(FEED_URL).to_string();
            let posts = cx.get(&url).posts("items");
            cx.write(&posts);
            Ok::<_, BuildError>(())
        },
        |_: &BuildContext| Ok::<_, BuildError>(Value::Null),
    )
}

fn service(feeds: Vec<Feed>, http: Arc<FakeHttp>, clock: Clock) -> (Arc<Service>, Arc<RecordingBuilder>) {
    let mut config = FeedbuildConfig::default();
    config.build.queue_latency_ms = 1_000;
    let builder = Arc::new(RecordingBuilder::new(clock));
    let service = Service::new(
        Arc::new(FeedRegistry::with_feeds(feeds)),
        create_test_db(),
        http,
        builder.clone(),
        &config,
        clock,
    );
    (Arc::new(service), builder)
}

fn update(url: &str, status: &str) -> PostUpdate {
    serde_json::from_value(json!({"url": url, "status": status})).unwrap()
}

#[test]
fn test_unknown_statuses_decode_as_other() {
    let draft = update("https://feeds.test/p/1", "draft");
    assert_eq!(draft.status, PostStatus::Other);
    assert!(!draft.triggers_download());
    assert!(update("https://feeds.test/p/1", "trash").triggers_download());
}

#[tokio::test(start_paused = true)]
async fn test_dirty_download_requests_a_build() {
    let http = Arc::new(FakeHttp::new());
    http.respond(FEED_URL, json!({"items": [{"id": 1}]}));
    let (service, builder) = service(vec![news_feed()], http, Clock::starting_at(0));

    assert!(service.process_feed("news").await.unwrap());
    assert_eq!(service.build_queue().len(), 1);
    assert!(!service.process_feed("news").await.unwrap());

    tokio::time::sleep(Duration::from_secs(2)).await;
    let builds = builder.builds();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].feed, "news");
    assert_eq!(service.db().get_feed_posts("news").unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_post_updates_download_the_post_url() {
    let http = Arc::new(FakeHttp::new());
    let post_url = "https://feeds.test/posts/9.json";
    http.respond(post_url, json!({"items": [{"id": 9, "title": "single"}]}));
    let (service, _) = service(vec![news_feed()], http.clone(), Clock::starting_at(0));

    let ignored = service
        .handle_post_update("news", update(post_url, "draft"))
        .await
        .unwrap();
    assert_eq!(ignored, None);
    assert_eq!(http.calls(), 0);

    let handled = service
        .handle_post_update("news", update(post_url, "publish"))
        .await
        .unwrap();
    assert_eq!(handled, Some(true));
    assert!(service.db().get_feed_post("news", &json!(9)).unwrap().is_some());
    assert_eq!(service.build_queue().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_updates_for_one_url_download_once() {
    let http = Arc::new(FakeHttp::with_delay(Duration::from_secs(5)));
    let post_url = "https://feeds.test/posts/3.json";
    http.respond(post_url, json!({"items": [{"id": 3}]}));
    let (service, _) = service(vec![news_feed()], http.clone(), Clock::starting_at(0));

    let (first, second) = tokio::join!(
        service.handle_post_update("news", update(post_url, "publish")),
        service.handle_post_update("news", update(post_url, "publish")),
    );
    let mut results = vec![first.unwrap(), second.unwrap()];
    results.sort();
    assert_eq!(results, vec![None, Some(true)]);
    assert_eq!(http.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_update_releases_its_url() {
    let http = Arc::new(FakeHttp::with_delay(Duration::from_secs(5)));
    let post_url = "https://feeds.test/posts/4.json";
    http.respond(post_url, json!({"items": [{"id": 4}]}));
    let (service, _) = service(vec![news_feed()], http.clone(), Clock::starting_at(0));

    let gave_up = tokio::time::timeout(
        Duration::from_secs(1),
        service.handle_post_update("news", update(post_url, "publish")),
    )
    .await;
    assert!(gave_up.is_err());

    let retried = service
        .handle_post_update("news", update(post_url, "publish"))
        .await
        .unwrap();
    assert!(retried.is_some(), "a later update for the URL is not ignored");
    assert_eq!(http.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_feeds_download_every_period() {
    let http = Arc::new(FakeHttp::new());
    http.respond(FEED_URL, json!({"items": []}));
    let scheduled = news_feed().with_schedule(Schedule::Every(Duration::from_secs(600)));
    let (service, _) = service(vec![scheduled], http.clone(), Clock::starting_at(0));

    service.start().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(http.calls(), 1);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(http.calls(), 2);

    service.stop();
    tokio::time::sleep(Duration::from_secs(1200)).await;
    assert_eq!(http.calls(), 2);
}

#[tokio::test]
async fn test_unknown_feed_is_reported() {
    let (service, _) = service(vec![], Arc::new(FakeHttp::new()), Clock::new());
    assert!(service.process_feed("missing").await.is_err());
}
