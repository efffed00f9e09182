//! Integration tests for the local store: counters, pending queue, remote files.
//!
//! Each test creates its own in-memory SQLite database for isolation.

use feedsync::model::{Article, Category, Feed, Label, MarkKind};
use feedsync::scope::ScopeId;
use feedsync::storage::Database;
use pretty_assertions::assert_eq;
use std::collections::{HashMap, HashSet};

const MIB: u64 = 1024 * 1024;

async fn test_db() -> Database {
    Database::open(":memory:").await.unwrap()
}

fn feed(id: i64, category_id: i64) -> Feed {
    Feed {
        id,
        category_id,
        title: format!("Feed {id}"),
        url: format!("https://feed{id}.example.com/rss"),
        unread: 0,
        icon: None,
    }
}

fn article(id: i64, feed_id: i64, unread: bool, updated: i64) -> Article {
    Article {
        id,
        feed_id,
        title: format!("Article {id}"),
        content: String::new(),
        url: None,
        comment_url: None,
        attachments: Vec::new(),
        unread,
        starred: false,
        published: false,
        note: None,
        updated,
        score: None,
        labels: Vec::new(),
    }
}

async fn seeded() -> Database {
    let db = test_db().await;
    db.replace_categories(&[Category {
        id: 5,
        title: "News".to_string(),
        unread: 0,
    }])
    .await
    .unwrap();
    db.replace_feeds(&[feed(1, 5), feed(2, 5), feed(3, 0)]).await.unwrap();
    db.replace_labels(&[Label::new(1, "work")]).await.unwrap();
    db
}

#[tokio::test]
async fn test_counters_follow_unread_transitions() {
    let db = seeded().await;
    let mut labelled = article(10, 1, true, 100);
    labelled.labels = vec![(1, "work".to_string())];
    db.insert_articles(&[labelled, article(11, 2, true, 100), article(12, 3, true, 100)])
        .await
        .unwrap();

    assert_eq!(db.unread_count(ScopeId::Feed(1)).await.unwrap(), 1);
    assert_eq!(db.unread_count(ScopeId::Category(5)).await.unwrap(), 2);
    assert_eq!(db.unread_count(ScopeId::Uncategorized).await.unwrap(), 1);
    assert_eq!(db.unread_count(ScopeId::Label(1)).await.unwrap(), 1);
    assert_eq!(db.unread_count(ScopeId::AllArticles).await.unwrap(), 3);

    // Marking twice must not count twice
    for _ in 0..2 {
        db.set_articles_flag(&[10], MarkKind::Read, true).await.unwrap();
    }
    assert_eq!(db.unread_count(ScopeId::Feed(1)).await.unwrap(), 0);
    assert_eq!(db.unread_count(ScopeId::Category(5)).await.unwrap(), 1);
    assert_eq!(db.unread_count(ScopeId::Label(1)).await.unwrap(), 0);

    let changed = db.mark_scope_read(ScopeId::Category(5)).await.unwrap();
    assert_eq!(changed, vec![11]);
    assert_eq!(db.unread_count(ScopeId::Category(5)).await.unwrap(), 0);
    assert_eq!(db.unread_count(ScopeId::Uncategorized).await.unwrap(), 1);
}

#[tokio::test]
async fn test_batch_mark_across_feeds_is_counted_once() {
    let db = seeded().await;
    db.insert_articles(&[
        article(30, 1, true, 100),
        article(31, 1, true, 100),
        article(32, 2, true, 100),
        article(33, 2, true, 100),
        article(34, 2, true, 100),
    ])
    .await
    .unwrap();
    assert_eq!(db.unread_count(ScopeId::Category(5)).await.unwrap(), 5);

    // The same batch applied again, as when a write is retried
    for _ in 0..2 {
        db.set_articles_flag(&[30, 32, 33, 31], MarkKind::Read, true)
            .await
            .unwrap();
    }
    assert_eq!(db.unread_count(ScopeId::Feed(1)).await.unwrap(), 0);
    assert_eq!(db.unread_count(ScopeId::Feed(2)).await.unwrap(), 1);
    assert_eq!(db.unread_count(ScopeId::Category(5)).await.unwrap(), 1);

    for _ in 0..2 {
        db.set_articles_flag(&[30, 32, 33], MarkKind::Read, false)
            .await
            .unwrap();
    }
    assert_eq!(db.unread_count(ScopeId::Feed(1)).await.unwrap(), 1);
    assert_eq!(db.unread_count(ScopeId::Feed(2)).await.unwrap(), 3);
    assert_eq!(db.unread_count(ScopeId::Category(5)).await.unwrap(), 4);

    let deltas = db.unread_count(ScopeId::Category(5)).await.unwrap();
    db.recalculate_counters().await.unwrap();
    assert_eq!(db.unread_count(ScopeId::Category(5)).await.unwrap(), deltas);
}

#[tokio::test]
async fn test_reinserting_unread_article_does_not_double_count() {
    let db = seeded().await;
    db.insert_articles(&[article(20, 1, true, 100)]).await.unwrap();
    db.insert_articles(&[article(20, 1, true, 200)]).await.unwrap();
    assert_eq!(db.unread_count(ScopeId::Feed(1)).await.unwrap(), 1);

    // The server reports it read now
    db.insert_articles(&[article(20, 1, false, 300)]).await.unwrap();
    assert_eq!(db.unread_count(ScopeId::Feed(1)).await.unwrap(), 0);
    assert_eq!(db.article_updated(20).await.unwrap(), Some(300));
}

#[tokio::test]
async fn test_recalculated_counters_match_deltas() {
    let db = seeded().await;
    db.insert_articles(&[
        article(1, 1, true, 10),
        article(2, 1, false, 10),
        article(3, 2, true, 10),
    ])
    .await
    .unwrap();
    db.set_articles_flag(&[3], MarkKind::Read, true).await.unwrap();

    let before = (
        db.unread_count(ScopeId::Feed(1)).await.unwrap(),
        db.unread_count(ScopeId::Feed(2)).await.unwrap(),
        db.unread_count(ScopeId::Category(5)).await.unwrap(),
    );
    db.recalculate_counters().await.unwrap();
    let after = (
        db.unread_count(ScopeId::Feed(1)).await.unwrap(),
        db.unread_count(ScopeId::Feed(2)).await.unwrap(),
        db.unread_count(ScopeId::Category(5)).await.unwrap(),
    );
    assert_eq!(before, (1, 0, 1));
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_replace_unread_set_is_exact() {
    let db = seeded().await;
    db.insert_articles(&[
        article(1, 1, true, 10),
        article(2, 1, true, 10),
        article(3, 2, false, 10),
    ])
    .await
    .unwrap();

    db.replace_unread_set(&HashSet::from([2, 3])).await.unwrap();

    let unread: HashSet<i64> = db
        .article_snapshot(ScopeId::AllArticles, true)
        .await
        .unwrap()
        .into_keys()
        .collect();
    assert_eq!(unread, HashSet::from([2, 3]));
    assert_eq!(db.unread_count(ScopeId::Feed(2)).await.unwrap(), 1);
}

#[tokio::test]
async fn test_pending_queue_coalesces_and_clears_by_value() {
    let db = test_db().await;
    db.queue_pending(&[1, 2], MarkKind::Read, true).await.unwrap();
    db.queue_pending(&[2], MarkKind::Read, false).await.unwrap();
    db.queue_pending(&[2], MarkKind::Starred, true).await.unwrap();
    db.queue_pending_note(3, "remember").await.unwrap();

    assert_eq!(db.pending_marks(MarkKind::Read, true).await.unwrap(), vec![1]);
    assert_eq!(db.pending_marks(MarkKind::Read, false).await.unwrap(), vec![2]);
    assert_eq!(db.pending_count().await.unwrap(), 4);

    // A replay of the stale value leaves the newer entry alone
    assert_eq!(db.clear_pending(&[2], MarkKind::Read, true).await.unwrap(), 0);
    assert_eq!(db.clear_pending(&[1], MarkKind::Read, true).await.unwrap(), 1);
    assert!(db.clear_pending_note(3, "remember").await.unwrap());
    assert_eq!(db.pending_count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_eviction_frees_least_recently_used_first() {
    let db = seeded().await;
    db.insert_articles(&[article(1, 1, true, 10)]).await.unwrap();

    let files: HashMap<String, u64> = (0..5)
        .map(|i| (format!("https://img.example.com/{i}.jpg"), 3 * MIB))
        .collect();
    // Record one file at a time so access times differ
    for i in 0..5 {
        let url = format!("https://img.example.com/{i}.jpg");
        let one = HashMap::from([(url.clone(), files[&url])]);
        db.record_cached_files(&one, &HashMap::from([(1, vec![url])]), 1_000 + i)
            .await
            .unwrap();
    }
    assert_eq!(db.cached_files_size().await.unwrap(), 15 * MIB as i64);

    let budget = 10 * MIB as i64;
    let excess = db.cached_files_size().await.unwrap() - budget;
    let victims = db.eviction_candidates(excess).await.unwrap();
    let urls: Vec<&str> = victims.iter().map(|f| f.url.as_str()).collect();
    assert_eq!(
        urls,
        vec!["https://img.example.com/0.jpg", "https://img.example.com/1.jpg"]
    );

    let ids: Vec<i64> = victims.iter().map(|f| f.id).collect();
    db.mark_files_uncached(&ids).await.unwrap();
    assert_eq!(db.cached_files_size().await.unwrap(), 9 * MIB as i64);
    assert_eq!(db.cached_file_index().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_touching_article_protects_its_files() {
    let db = seeded().await;
    db.insert_articles(&[article(1, 1, true, 10), article(2, 1, true, 10)])
        .await
        .unwrap();
    db.record_cached_files(
        &HashMap::from([("https://a/1".to_string(), MIB)]),
        &HashMap::from([(1, vec!["https://a/1".to_string()])]),
        100,
    )
    .await
    .unwrap();
    db.record_cached_files(
        &HashMap::from([("https://a/2".to_string(), MIB)]),
        &HashMap::from([(2, vec!["https://a/2".to_string()])]),
        200,
    )
    .await
    .unwrap();

    db.touch_article_files(1, 300).await.unwrap();

    let victims = db.eviction_candidates(1).await.unwrap();
    assert_eq!(victims.len(), 1);
    assert_eq!(victims[0].url, "https://a/2");
}

#[tokio::test]
async fn test_article_limit_purge_spares_marked() {
    let db = seeded().await;
    let mut starred = article(1, 1, false, 1);
    starred.starred = true;
    db.insert_articles(&[starred, article(2, 1, true, 2), article(3, 1, true, 3)])
        .await
        .unwrap();

    assert_eq!(db.purge_old_articles(1).await.unwrap(), 1);
    assert!(db.get_article(1).await.unwrap().is_some());
    assert!(db.get_article(2).await.unwrap().is_none());
    assert_eq!(db.unread_count(ScopeId::Feed(1)).await.unwrap(), 1);
}
