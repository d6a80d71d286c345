//! Per-feed download serialization and change detection

use crate::integration::test_utils::{create_test_db, FakeHttp};
use feedbuild::clock::Clock;
use feedbuild::context::{BuildContext, DownloadContext, RecordValue};
use feedbuild::download::DownloadQueue;
use feedbuild::error::{BuildError, FeedError};
use feedbuild::feed::Feed;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const NEWS_URL: &str = "https://feeds.test/news.json";
const SPORT_URL: &str = "https://feeds.test/sport.json";

fn fetching_feed(id: &str, url: &'static str) -> Arc<Feed> {
    Arc::new(Feed::new(
        id,
        "in",
        move |cx: &DownloadContext| {
            let data = cx.get(url);
            let posts = data.posts("items");
            cx.write(&posts);
            cx.record("title", RecordValue::Value(json!("Latest")));
            Ok::<_, BuildError>(())
        },
        |_: &BuildContext| Ok::<_, BuildError>(Value::Null),
    ))
}

fn items(ids: &[u64]) -> Value {
    json!({ "items": ids.iter().map(|id| json!({"id": id, "title": format!("post {}", id)})).collect::<Vec<_>>() })
}

#[tokio::test(start_paused = true)]
async fn test_same_feed_downloads_run_one_at_a_time() {
    let http = Arc::new(FakeHttp::with_delay(Duration::from_secs(5)));
    http.respond(NEWS_URL, items(&[1]));
    let queue = DownloadQueue::new(create_test_db(), http.clone(), Clock::starting_at(0));
    let feed = fetching_feed("news", NEWS_URL);

    let first = queue.download_feed(feed.clone(), None);
    let second = queue.download_feed(feed, None);
    let (first, second) = tokio::join!(first, second);

    assert!(first.unwrap());
    assert!(!second.unwrap(), "second download saw the first one's writes");
    assert_eq!(http.calls(), 2);
    assert_eq!(http.max_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_different_feeds_download_independently() {
    let http = Arc::new(FakeHttp::with_delay(Duration::from_secs(5)));
    http.respond(NEWS_URL, items(&[1]));
    http.respond(SPORT_URL, items(&[7]));
    let queue = DownloadQueue::new(create_test_db(), http.clone(), Clock::starting_at(0));

    let news = queue.download_feed(fetching_feed("news", NEWS_URL), None);
    let sport = queue.download_feed(fetching_feed("sport", SPORT_URL), None);
    let (news, sport) = tokio::join!(news, sport);

    assert!(news.unwrap());
    assert!(sport.unwrap());
    assert_eq!(http.max_in_flight(), 2);
}

#[tokio::test]
async fn test_posts_are_stored_under_their_feed() {
    let http = Arc::new(FakeHttp::new());
    http.respond(NEWS_URL, items(&[1, 2]));
    let db = create_test_db();
    let queue = DownloadQueue::new(db.clone(), http, Clock::new());

    assert!(queue.download_feed(fetching_feed("news", NEWS_URL), None).await.unwrap());

    let posts = db.get_feed_posts("news").unwrap();
    assert_eq!(posts.len(), 2);
    let first = db.get_feed_post("news", &json!(1)).unwrap().unwrap();
    assert_eq!(first.get("title"), Some(&json!("post 1")));
    assert_eq!(first.get("$feedID"), Some(&json!("news")));

    let record = db.get_feed_record("news").unwrap();
    assert_eq!(record.get("title"), Some(&json!("Latest")));
    assert!(record.get("$lastDownload").is_some());
}

#[tokio::test]
async fn test_changed_posts_make_the_download_dirty_again() {
    let http = Arc::new(FakeHttp::new());
    http.respond(NEWS_URL, items(&[1]));
    let db = create_test_db();
    let queue = DownloadQueue::new(db.clone(), http.clone(), Clock::new());
    let feed = fetching_feed("news", NEWS_URL);

    assert!(queue.download_feed(feed.clone(), None).await.unwrap());
    assert!(!queue.download_feed(feed.clone(), None).await.unwrap());

    http.respond(NEWS_URL, items(&[1, 2]));
    assert!(queue.download_feed(feed, None).await.unwrap());
    assert_eq!(db.get_feed_posts("news").unwrap().len(), 2);
}

#[tokio::test]
async fn test_failed_fetch_fails_only_that_download() {
    let http = Arc::new(FakeHttp::new());
    http.respond(NEWS_URL, items(&[1]));
    let queue = DownloadQueue::new(create_test_db(), http, Clock::new());

    let broken = queue.download_feed(fetching_feed("broken", "https://feeds.test/missing.json"), None);
    let news = queue.download_feed(fetching_feed("news", NEWS_URL), None);
    let (broken, news) = tokio::join!(broken, news);

    assert!(matches!(broken, Err(FeedError::Build(_))));
    assert!(news.unwrap());
    assert!(queue.active_feeds().is_empty());
}

#[tokio::test]
async fn test_failed_download_lets_the_next_one_for_the_feed_run() {
    let http = Arc::new(FakeHttp::new());
    http.respond(NEWS_URL, items(&[1]));
    let queue = DownloadQueue::new(create_test_db(), http, Clock::new());

    let broken = queue.download_feed(fetching_feed("news", "https://feeds.test/missing.json"), None);
    let next = queue.download_feed(fetching_feed("news", NEWS_URL), None);

    assert!(matches!(broken.await, Err(FeedError::Build(_))));
    assert!(next.await.unwrap());
    assert!(queue.active_feeds().is_empty());
}

#[tokio::test]
async fn test_panicking_script_lets_the_next_one_for_the_feed_run() {
    let http = Arc::new(FakeHttp::new());
    http.respond(NEWS_URL, items(&[1]));
    let queue = DownloadQueue::new(create_test_db(), http, Clock::new());
    let exploding = Arc::new(Feed::new(
        "news",
        "in",
        |_: &DownloadContext| -> Result<(), BuildError> { panic!("script bug") },
        |_: &BuildContext| Ok::<_, BuildError>(Value::Null),
    ));

    let first = queue.download_feed(exploding, None);
    let second = queue.download_feed(fetching_feed("news", NEWS_URL), None);

    let err = first.await.unwrap_err();
    assert!(
        matches!(&err, FeedError::Build(BuildError::Panicked { message, .. }) if message == "script bug"),
        "unexpected error: {}",
        err
    );
    let second = tokio::time::timeout(Duration::from_secs(2), second)
        .await
        .expect("next download for the feed ran");
    assert!(second.unwrap());
    assert!(queue.active_feeds().is_empty());
}

#[tokio::test]
async fn test_clean_removes_posts_the_script_rejects() {
    let http = Arc::new(FakeHttp::new());
    http.respond(NEWS_URL, items(&[1, 2, 3]));
    let db = create_test_db();
    let queue = DownloadQueue::new(db.clone(), http, Clock::new());
    queue.download_feed(fetching_feed("news", NEWS_URL), None).await.unwrap();

    let pruning = Arc::new(Feed::new(
        "news",
        "in",
        |cx: &DownloadContext| {
            cx.clean(|post| post.get("$id") != Some(&json!(2)));
            Ok::<_, BuildError>(())
        },
        |_: &BuildContext| Ok::<_, BuildError>(Value::Null),
    ));
    assert!(queue.download_feed(pruning, None).await.unwrap());
    assert!(db.get_feed_post("news", &json!(2)).unwrap().is_none());
    assert_eq!(db.get_feed_posts("news").unwrap().len(), 2);
}
