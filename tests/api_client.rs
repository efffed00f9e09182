//! Integration tests for the remote API client against a mock server.
//!
//! Each test starts its own wiremock server speaking the JSON envelope
//! `{"seq": 0, "status": 0|1, "content": ...}`.

use feedsync::api::{
    ApiClient, ApiError, ApiSettings, ArticleFilter, HeadlineQuery, IdUpdatedFilter, ViewMode,
};
use feedsync::scope::ScopeId;
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use url::Url;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn settings(server: &MockServer) -> ApiSettings {
    ApiSettings {
        endpoint: Url::parse(&format!("{}/api/", server.uri())).unwrap(),
        username: "reader".to_string(),
        password: SecretString::from("secret".to_string()),
        http_auth: None,
        connect_timeout: Duration::from_secs(5),
        read_timeout: Duration::from_secs(5),
        max_response_bytes: 4 * 1024 * 1024,
    }
}

fn ok(content: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "seq": 0, "status": 0, "content": content }))
}

fn api_error(code: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_json(json!({ "seq": 0, "status": 1, "content": { "error": code } }))
}

fn headline(id: i64, updated: i64, unread: bool) -> Value {
    json!({
        "id": id,
        "feed_id": "3",
        "title": format!("Article {id}"),
        "unread": unread,
        "updated": updated,
        "content": "<p>body</p>",
        "link": format!("https://example.com/{id}"),
        "marked": false,
        "published": false,
    })
}

async fn mount_login(server: &MockServer, sid: &str, api_level: i64) {
    Mock::given(method("POST"))
        .and(path("/api/"))
        .and(body_partial_json(json!({ "op": "login" })))
        .respond_with(ok(json!({ "session_id": sid, "api_level": api_level })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_expired_session_relogs_in_once() {
    let server = MockServer::start().await;

    // First login hands out a session the server later rejects
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "op": "login" })))
        .respond_with(ok(json!({ "session_id": "stale", "api_level": 8 })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "op": "login" })))
        .respond_with(ok(json!({ "session_id": "fresh", "api_level": 8 })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "op": "getCategories", "sid": "stale" })))
        .respond_with(api_error("NOT_LOGGED_IN"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "op": "getCategories", "sid": "fresh" })))
        .respond_with(ok(json!([
            { "id": "4", "title": "News", "unread": 2 },
            { "id": -1, "title": "Special", "unread": 0 },
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(settings(&server)).unwrap();
    let categories = client.fetch_categories().await.unwrap();

    assert_eq!(categories.len(), 1);
    assert_eq!(categories[0].id, 4);
    assert_eq!(categories[0].unread, 2);
}

#[tokio::test]
async fn test_second_rejection_reports_login_failure() {
    let server = MockServer::start().await;
    mount_login(&server, "s", 8).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "op": "getFeeds" })))
        .respond_with(api_error("NOT_LOGGED_IN"))
        .expect(2)
        .mount(&server)
        .await;

    let client = ApiClient::new(settings(&server)).unwrap();
    let result = client.fetch_feeds().await;
    assert!(matches!(result, Err(ApiError::LoginFailed(_))), "{result:?}");
}

#[tokio::test]
async fn test_logout_ends_server_session_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "op": "login" })))
        .respond_with(ok(json!({ "session_id": "s", "api_level": 8 })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "op": "logout", "sid": "s" })))
        .respond_with(ok(json!({ "status": "OK" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "op": "getCategories" })))
        .respond_with(ok(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(settings(&server)).unwrap();
    client.login().await.unwrap();
    client.logout().await;
    // No session left, nothing to send
    client.logout().await;

    // The next call logs in again
    assert!(client.fetch_categories().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_credentials_are_not_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "op": "login" })))
        .respond_with(api_error("LOGIN_ERROR"))
        .mount(&server)
        .await;

    let client = ApiClient::new(settings(&server)).unwrap();
    let err = client.login().await.unwrap_err();
    assert!(matches!(err, ApiError::LoginFailed(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_headlines_page_until_short_page() {
    let server = MockServer::start().await;
    // Level below 6 pages by 60
    mount_login(&server, "s", 5).await;

    let first: Vec<Value> = (1..=60).map(|id| headline(id, 100, true)).collect();
    let second: Vec<Value> = (61..=70).map(|id| headline(id, 100, true)).collect();
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "op": "getHeadlines", "skip": 0, "limit": 60 })))
        .respond_with(ok(Value::Array(first)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "op": "getHeadlines", "skip": 60 })))
        .respond_with(ok(Value::Array(second)))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(settings(&server)).unwrap();
    client.login().await.unwrap();
    assert_eq!(client.page_size(), 60);

    let mut into = HashMap::new();
    let query = HeadlineQuery::new(ScopeId::Feed(3), 500, ViewMode::Unread);
    let consumed = client.fetch_headlines(&query, None, &mut into).await.unwrap();

    assert_eq!(consumed, 70);
    assert_eq!(into.len(), 70);
    assert_eq!(into[&61].feed_id, 3);
}

#[tokio::test]
async fn test_headlines_request_no_more_than_the_limit() {
    let server = MockServer::start().await;
    mount_login(&server, "s", 5).await;

    let first: Vec<Value> = (1..=60).map(|id| headline(id, 100, true)).collect();
    let second: Vec<Value> = (61..=70).map(|id| headline(id, 100, true)).collect();
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "op": "getHeadlines", "skip": 0, "limit": 60 })))
        .respond_with(ok(Value::Array(first)))
        .expect(1)
        .mount(&server)
        .await;
    // The last page only asks for what is still missing
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "op": "getHeadlines", "skip": 60, "limit": 10 })))
        .respond_with(ok(Value::Array(second)))
        .expect(1)
        .mount(&server)
        .await;

    let client = ApiClient::new(settings(&server)).unwrap();
    let mut into = HashMap::new();
    let query = HeadlineQuery::new(ScopeId::Feed(3), 70, ViewMode::Unread);
    let consumed = client.fetch_headlines(&query, None, &mut into).await.unwrap();
    assert_eq!(consumed, 70);
    assert_eq!(into.len(), 70);

    // A limit below the page size shrinks the single request
    let small: Vec<Value> = (1..=25).map(|id| headline(id, 100, true)).collect();
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "op": "getHeadlines", "feed_id": 9, "limit": 25 })))
        .respond_with(ok(Value::Array(small)))
        .expect(1)
        .mount(&server)
        .await;

    let mut into = HashMap::new();
    let query = HeadlineQuery::new(ScopeId::Feed(9), 25, ViewMode::Unread);
    assert_eq!(client.fetch_headlines(&query, None, &mut into).await.unwrap(), 25);
}

#[tokio::test]
async fn test_headlines_since_id_and_filter() {
    let server = MockServer::start().await;
    mount_login(&server, "s", 8).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "op": "getHeadlines",
            "since_id": 40,
            "view_mode": "all_articles",
            "feed_id": -4,
        })))
        .respond_with(ok(json!([
            headline(41, 100, false),
            headline(42, 300, false),
            headline(43, 50, true),
        ])))
        .expect(2)
        .mount(&server)
        .await;

    let client = ApiClient::new(settings(&server)).unwrap();
    let query = HeadlineQuery::new(ScopeId::AllArticles, 100, ViewMode::All).since(40);

    let mut filter = IdUpdatedFilter::new(HashMap::from([(41, 100), (42, 200)]));
    let mut into = HashMap::new();
    let consumed = client
        .fetch_headlines(&query, Some(&mut filter), &mut into)
        .await
        .unwrap();
    assert_eq!(consumed, 3);
    assert_eq!(
        into.keys().copied().collect::<BTreeSet<i64>>(),
        BTreeSet::from([42, 43])
    );
    assert!(filter.omitted_ids().contains(&41));

    // Decoding the same page again omits the same ids
    let mut again = HashMap::new();
    client
        .fetch_headlines(&query, Some(&mut filter), &mut again)
        .await
        .unwrap();
    assert_eq!(filter.omitted_ids().len(), 1);
}

#[tokio::test]
async fn test_mark_splits_requests_by_hundred_ids() {
    let server = MockServer::start().await;
    mount_login(&server, "s", 8).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "op": "updateArticle", "field": 2, "mode": 0 })))
        .respond_with(ok(json!({ "status": "OK", "updated": 100 })))
        .expect(3)
        .mount(&server)
        .await;

    let client = ApiClient::new(settings(&server)).unwrap();
    let ids: Vec<i64> = (1..=250).collect();
    assert!(client.mark_read(&ids, true).await);
}

#[tokio::test]
async fn test_mark_reports_failure() {
    let server = MockServer::start().await;
    mount_login(&server, "s", 8).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "op": "updateArticle" })))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = ApiClient::new(settings(&server)).unwrap();
    assert!(!client.mark_starred(&[1, 2], true).await);
}

#[tokio::test]
async fn test_feeds_split_out_labels() {
    let server = MockServer::start().await;
    mount_login(&server, "s", 8).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "op": "getFeeds", "cat_id": -4 })))
        .respond_with(ok(json!([
            { "id": 7, "cat_id": 4, "title": "Blog", "feed_url": "https://blog.example.com/rss", "unread": 3 },
            { "id": -12, "cat_id": -2, "title": "work", "unread": 1 },
            { "id": -3, "cat_id": -1, "title": "Fresh", "unread": 9 },
        ])))
        .mount(&server)
        .await;

    let client = ApiClient::new(settings(&server)).unwrap();
    let listing = client.fetch_feeds().await.unwrap();

    assert_eq!(listing.feeds.len(), 1);
    assert_eq!(listing.feeds[0].category_id, 4);
    assert_eq!(listing.labels.len(), 1);
    assert_eq!(listing.labels[0].id, 1);
    assert_eq!(listing.labels[0].caption, "work");
}

#[tokio::test]
async fn test_oversized_response_is_rejected() {
    let server = MockServer::start().await;
    mount_login(&server, "s", 8).await;
    let big: Vec<Value> = (1..=200).map(|id| headline(id, 1, true)).collect();
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "op": "getHeadlines" })))
        .respond_with(ok(Value::Array(big)))
        .mount(&server)
        .await;

    let mut small = settings(&server);
    small.max_response_bytes = 2048;
    let client = ApiClient::new(small).unwrap();
    let mut into = HashMap::new();
    let query = HeadlineQuery::new(ScopeId::Fresh, 10, ViewMode::Unread);
    let err = client.fetch_headlines(&query, None, &mut into).await.unwrap_err();
    assert!(matches!(err, ApiError::ResponseTooLarge));
}
