//! End-to-end cache runs against a mock server that serves both the API and
//! the images referenced by articles.

use feedsync::api::{ApiClient, ApiSettings};
use feedsync::cache::{CacheEngine, CachePhase, CacheSettings};
use feedsync::context::Context;
use feedsync::events::{Event, Notifier};
use feedsync::network::{ManualNetwork, NetworkClass, NetworkMonitor};
use feedsync::storage::Database;
use feedsync::sync::{SyncSettings, Synchronizer};
use feedsync::util::HostPolicy;
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;
use wiremock::matchers::{body_partial_json, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const IMAGE_BYTES: usize = 3000;

fn ok(content: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "seq": 0, "status": 0, "content": content }))
}

fn cache_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("feedsync-cache-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

/// Mount the API calls of the metadata phase, listing `articles` unread ids.
async fn mount_server(server: &MockServer, articles: &[i64]) {
    let headlines: Vec<Value> = articles
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "feed_id": 3,
                "title": format!("Article {id}"),
                "unread": true,
                "updated": 1000 + id,
                "content": format!(r#"<p><img src="{}/img/{id}.png"></p>"#, server.uri()),
            })
        })
        .collect();

    for (op, content) in [
        ("login", json!({ "session_id": "s", "api_level": 8 })),
        ("getCategories", json!([{ "id": 4, "title": "News", "unread": 0 }])),
        (
            "getFeeds",
            json!([{ "id": 3, "cat_id": 4, "title": "Blog", "feed_url": "https://blog.example.com/rss" }]),
        ),
        ("getPref", json!({ "value": "24" })),
    ] {
        Mock::given(method("POST"))
            .and(path("/api/"))
            .and(body_partial_json(json!({ "op": op })))
            .respond_with(ok(content))
            .mount(server)
            .await;
    }
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "op": "getHeadlines", "view_mode": "unread" })))
        .respond_with(ok(Value::Array(headlines)))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "op": "getHeadlines", "view_mode": "all_articles" })))
        .respond_with(ok(json!([])))
        .mount(server)
        .await;
}

struct Harness {
    engine: CacheEngine,
    network: Arc<ManualNetwork>,
    db: Database,
    events: mpsc::Receiver<Event>,
}

async fn harness(server: &MockServer, dir: PathBuf, max_size: u64) -> Harness {
    harness_with(server, dir, max_size, |_| {}).await
}

async fn harness_with(
    server: &MockServer,
    dir: PathBuf,
    max_size: u64,
    configure: impl FnOnce(&mut CacheSettings),
) -> Harness {
    let db = Database::open(":memory:").await.unwrap();
    let api = ApiClient::new(ApiSettings {
        endpoint: Url::parse(&format!("{}/api/", server.uri())).unwrap(),
        username: "reader".to_string(),
        password: SecretString::from("secret".to_string()),
        http_auth: None,
        connect_timeout: Duration::from_secs(5),
        read_timeout: Duration::from_secs(5),
        max_response_bytes: 4 * 1024 * 1024,
    })
    .unwrap();
    let network = Arc::new(ManualNetwork::new(NetworkClass::Unmetered));
    let (tx, events) = mpsc::channel(256);
    let ctx = Context::new(db.clone(), Arc::new(api), network.clone(), Notifier::new(tx));
    let sync = Arc::new(Synchronizer::new(ctx, SyncSettings::default()));

    let mut settings = CacheSettings::new(dir);
    settings.max_size = max_size;
    settings.workers = 1;
    settings.hosts = HostPolicy::AllowPrivate;
    configure(&mut settings);
    let engine = CacheEngine::new(sync, settings).unwrap();

    Harness {
        engine,
        network,
        db,
        events,
    }
}

fn drain(events: &mut mpsc::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn test_full_run_downloads_then_purges_to_budget() {
    let server = MockServer::start().await;
    mount_server(&server, &[1, 2, 3]).await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/img/\d+\.png$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9u8; IMAGE_BYTES]))
        .expect(3)
        .mount(&server)
        .await;

    let dir = cache_dir("full");
    let mut h = harness(&server, dir.clone(), 7000).await;
    let report = h.engine.run(false).await.unwrap();

    assert_eq!(report.phase, CachePhase::End);
    assert_eq!(report.articles_scanned, 3);
    assert_eq!(report.files_downloaded, 3);
    assert_eq!(report.bytes_downloaded, 3 * IMAGE_BYTES as u64);
    assert_eq!(report.files_evicted, 1);
    assert_eq!(report.bytes_evicted, IMAGE_BYTES as u64);

    assert_eq!(h.db.cached_files_size().await.unwrap(), 2 * IMAGE_BYTES as i64);
    assert_eq!(std::fs::read_dir(&dir).unwrap().count(), 2);
    // Every article was processed and is not scanned again
    assert!(h.db.articles_for_image_cache(100).await.unwrap().is_empty());

    let events = drain(&mut h.events);
    assert_eq!(events.first(), Some(&Event::CacheStarted));
    assert!(events.contains(&Event::CacheProgress { done: 3, total: 3 }));
    assert_eq!(events.last(), Some(&Event::CacheFinished(report)));

    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn test_only_articles_skips_downloads() {
    let server = MockServer::start().await;
    mount_server(&server, &[1, 2]).await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/img/"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9u8; IMAGE_BYTES]))
        .expect(0)
        .mount(&server)
        .await;

    let h = harness(&server, cache_dir("only-articles"), 1 << 20).await;
    let report = h.engine.run(true).await.unwrap();

    assert_eq!(report.phase, CachePhase::End);
    assert_eq!(report.files_downloaded, 0);
    assert_eq!(h.db.articles_for_image_cache(100).await.unwrap().len(), 2);
    assert_eq!(h.db.get_categories().await.unwrap().iter().filter(|c| c.id == 4).count(), 1);
}

#[tokio::test]
async fn test_metadata_phase_fetches_missing_feed_icons() {
    let server = MockServer::start().await;
    mount_server(&server, &[1]).await;
    Mock::given(method("GET"))
        .and(path("/feed-icons/3.ico"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![5u8; 64]))
        .expect(1)
        .mount(&server)
        .await;

    let icons = Url::parse(&format!("{}/feed-icons/", server.uri())).unwrap();
    let h = harness_with(&server, cache_dir("icons"), 1 << 20, |settings| {
        settings.icons_url = Some(icons);
    })
    .await;

    h.engine.run(true).await.unwrap();
    let feeds = h.db.get_feeds().await.unwrap();
    assert_eq!(feeds[0].icon.as_deref(), Some(&[5u8; 64][..]));

    // Stored icons are not requested again
    h.engine.run(true).await.unwrap();
    assert!(h.db.feeds_without_icon().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_offline_run_is_interrupted_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ok(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    let mut h = harness(&server, cache_dir("offline"), 1 << 20).await;
    h.network.set(NetworkClass::Offline);

    let report = h.engine.run(false).await.unwrap();
    assert_eq!(report.phase, CachePhase::Interrupted);
    assert_eq!(
        drain(&mut h.events),
        vec![Event::CacheStarted, Event::CacheInterrupted(report)]
    );
}

#[tokio::test]
async fn test_cancel_before_run_interrupts_only_that_run() {
    let server = MockServer::start().await;
    mount_server(&server, &[1]).await;

    let h = harness(&server, cache_dir("early-cancel"), 1 << 20).await;
    h.engine.cancel_flag().cancel();

    let report = h.engine.run(true).await.unwrap();
    assert_eq!(report.phase, CachePhase::Interrupted);
    assert!(server.received_requests().await.unwrap_or_default().is_empty());

    // The request was consumed by the interrupted run
    let report = h.engine.run(true).await.unwrap();
    assert_eq!(report.phase, CachePhase::End);
}

#[tokio::test]
async fn test_network_downgrade_stops_scheduling_downloads() {
    let server = MockServer::start().await;
    mount_server(&server, &[1, 2, 3]).await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/img/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![9u8; IMAGE_BYTES])
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let dir = cache_dir("downgrade");
    let h = harness(&server, dir.clone(), 1 << 20).await;

    // Drop to a metered network once the first image request is in flight
    let watch = async {
        loop {
            let requests = server.received_requests().await.unwrap_or_default();
            if requests.iter().any(|r| r.url.path().starts_with("/img/")) {
                h.network.set(NetworkClass::Metered);
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    let (report, _) = tokio::join!(
        h.engine.run(false),
        tokio::time::timeout(Duration::from_secs(10), watch)
    );
    let report = report.unwrap();

    assert_eq!(report.phase, CachePhase::Interrupted);
    assert!(report.files_downloaded <= 1, "{report:?}");
    assert!(h.network.current() < NetworkClass::Unmetered);
    // Unprocessed articles are picked up by the next run
    assert!(h.db.articles_for_image_cache(100).await.unwrap().len() >= 2);

    std::fs::remove_dir_all(&dir).ok();
}
