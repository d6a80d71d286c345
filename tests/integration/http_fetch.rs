//! HTTP fetching against a local mock server

use feedbuild::config::HttpConfig;
use feedbuild::error::FetchError;
use feedbuild::http::{FetchBody, HttpFetch, ReqwestFetcher};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher(retries: u32) -> ReqwestFetcher {
    ReqwestFetcher::new(&HttpConfig {
        retries,
        retry_delay_ms: 10,
        connect_timeout_secs: 1,
        request_timeout_secs: 1,
    })
    .unwrap()
}

#[tokio::test]
async fn test_json_body_with_bom_is_parsed() {
    let server = MockServer::start().await;
    let mut body = vec![0xEF, 0xBB, 0xBF];
    body.extend_from_slice(br#"{"items":[{"id":1}]}"#);
    Mock::given(method("GET"))
        .and(path("/feed.json"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "application/json"))
        .expect(1)
        .mount(&server)
        .await;

    let body = fetcher(0)
        .get(&format!("{}/feed.json", server.uri()), Some("application/json"))
        .await
        .unwrap();
    assert_eq!(body, FetchBody::Json(json!({"items": [{"id": 1}]})));
}

#[tokio::test]
async fn test_non_json_body_is_returned_raw() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/logo.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![1u8, 2, 3], "image/png"))
        .mount(&server)
        .await;

    let body = fetcher(0).get(&format!("{}/logo.png", server.uri()), None).await.unwrap();
    assert_eq!(body, FetchBody::Bytes(vec![1, 2, 3]));
}

#[tokio::test]
async fn test_error_status_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let err = fetcher(3)
        .get(&format!("{}/feed.json", server.uri()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 503, .. }), "{}", err);
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_timed_out_request_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"slow": true}))
                .set_delay(Duration::from_secs(3)),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"slow": false})))
        .expect(1)
        .mount(&server)
        .await;

    let body = fetcher(2)
        .get(&format!("{}/feed.json", server.uri()), None)
        .await
        .unwrap();
    assert_eq!(body, FetchBody::Json(json!({"slow": false})));
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .expect(2)
        .mount(&server)
        .await;

    let err = fetcher(1)
        .get(&format!("{}/feed.json", server.uri()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Timeout { .. }), "{}", err);
}
