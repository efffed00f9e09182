use anyhow::{bail, Result};
use sqlx::{QueryBuilder, Sqlite};
use std::collections::{HashMap, HashSet};

use super::counters::{labels_of, recalculate, UnreadDeltas};
use super::schema::Database;
use super::types::{encode_attachments, ArticleDbRow, ARTICLE_COLUMNS};
use super::BATCH_SIZE;
use crate::model::{Article, MarkKind};
use crate::scope::ScopeId;

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Maximum number of articles to return from any single read view (OOM protection)
const MAX_ARTICLES: i64 = 2000;

/// Push a boolean SQL expression selecting the articles of `scope`.
///
/// `fresh_cutoff` is the oldest `updated` timestamp still counted as fresh.
pub(crate) fn push_scope(builder: &mut QueryBuilder<'_, Sqlite>, scope: ScopeId, fresh_cutoff: i64) {
    match scope {
        ScopeId::AllArticles => {
            builder.push("1 = 1");
        }
        ScopeId::Fresh => {
            builder.push("updated > ").push_bind(fresh_cutoff);
        }
        ScopeId::Starred => {
            builder.push("starred = 1");
        }
        ScopeId::Published => {
            builder.push("published = 1");
        }
        ScopeId::Uncategorized => {
            builder.push("feed_id IN (SELECT id FROM feeds WHERE category_id = 0)");
        }
        ScopeId::Category(id) => {
            builder
                .push("feed_id IN (SELECT id FROM feeds WHERE category_id = ")
                .push_bind(id)
                .push(")");
        }
        ScopeId::Feed(id) => {
            builder.push("feed_id = ").push_bind(id);
        }
        ScopeId::Label(id) => {
            builder
                .push("id IN (SELECT article_id FROM article_labels WHERE label_id = ")
                .push_bind(id)
                .push(")");
        }
    }
}

fn push_id_list(builder: &mut QueryBuilder<'_, Sqlite>, ids: &[i64]) {
    builder.push("(");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
}

/// Column backing a boolean mark kind.
fn flag_column(kind: MarkKind) -> Result<&'static str> {
    match kind {
        MarkKind::Read => Ok("unread"),
        MarkKind::Starred => Ok("starred"),
        MarkKind::Published => Ok("published"),
        MarkKind::Note => bail!("notes are not a boolean flag"),
    }
}

impl Database {
    // ========================================================================
    // Article Upsert
    // ========================================================================

    /// Upsert fetched articles, returns the number of previously unknown ones.
    ///
    /// Unread transitions are applied to feed, category and label counters in
    /// the same transaction. A record whose `updated` changed is queued for the
    /// image cache again.
    pub async fn insert_articles(&self, articles: &[Article]) -> Result<usize> {
        if articles.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut deltas = UnreadDeltas::default();
        let mut inserted = 0;

        for chunk in articles.chunks(BATCH_SIZE) {
            let ids: Vec<i64> = chunk.iter().map(|a| a.id).collect();

            // Previous state, to turn the upsert into unread transitions
            let mut select: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT id, feed_id, unread FROM articles WHERE id IN ");
            push_id_list(&mut select, &ids);
            let previous: Vec<(i64, i64, bool)> =
                select.build_query_as().fetch_all(&mut *tx).await?;
            let old_labels = labels_of(&mut *tx, &ids).await?;

            for (id, feed_id, unread) in &previous {
                if *unread {
                    let labels = old_labels.get(id).map(Vec::as_slice).unwrap_or(&[]);
                    deltas.add(*feed_id, labels, -1);
                }
            }
            inserted += chunk.len().saturating_sub(previous.len());

            let mut upsert: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO articles (id, feed_id, title, content, url, comment_url, attachments, \
                 unread, starred, published, note, updated, score) ",
            );
            upsert.push_values(chunk, |mut b, article| {
                b.push_bind(article.id)
                    .push_bind(article.feed_id)
                    .push_bind(&article.title)
                    .push_bind(&article.content)
                    .push_bind(&article.url)
                    .push_bind(&article.comment_url)
                    .push_bind(encode_attachments(&article.attachments))
                    .push_bind(article.unread)
                    .push_bind(article.starred)
                    .push_bind(article.published)
                    .push_bind(&article.note)
                    .push_bind(article.updated)
                    .push_bind(article.score);
            });
            upsert.push(
                " ON CONFLICT(id) DO UPDATE SET \
                 feed_id = excluded.feed_id, title = excluded.title, content = excluded.content, \
                 url = excluded.url, comment_url = excluded.comment_url, \
                 attachments = excluded.attachments, unread = excluded.unread, \
                 starred = excluded.starred, published = excluded.published, \
                 note = excluded.note, score = excluded.score, \
                 cached_images = CASE WHEN excluded.updated != articles.updated \
                     THEN NULL ELSE articles.cached_images END, \
                 updated = excluded.updated",
            );
            upsert.build().execute(&mut *tx).await?;

            // Replace label assignments with the ones just fetched
            let mut clear: QueryBuilder<Sqlite> =
                QueryBuilder::new("DELETE FROM article_labels WHERE article_id IN ");
            push_id_list(&mut clear, &ids);
            clear.build().execute(&mut *tx).await?;

            let assignments: Vec<(i64, i64, &str)> = chunk
                .iter()
                .flat_map(|a| {
                    a.labels
                        .iter()
                        .map(move |(label, caption)| (a.id, *label, caption.as_str()))
                })
                .collect();
            for batch in assignments.chunks(BATCH_SIZE) {
                let mut labels: QueryBuilder<Sqlite> =
                    QueryBuilder::new("INSERT INTO labels (id, caption) ");
                labels.push_values(batch, |mut b, (_, label, caption)| {
                    b.push_bind(*label).push_bind(*caption);
                });
                labels.push(" ON CONFLICT(id) DO UPDATE SET caption = excluded.caption");
                labels.build().execute(&mut *tx).await?;

                let mut links: QueryBuilder<Sqlite> =
                    QueryBuilder::new("INSERT OR IGNORE INTO article_labels (article_id, label_id) ");
                links.push_values(batch, |mut b, (article, label, _)| {
                    b.push_bind(*article).push_bind(*label);
                });
                links.build().execute(&mut *tx).await?;
            }

            for article in chunk.iter().filter(|a| a.unread) {
                let labels: Vec<i64> = article.labels.iter().map(|(id, _)| *id).collect();
                deltas.add(article.feed_id, &labels, 1);
            }
        }

        deltas.apply(&mut *tx).await?;
        tx.commit().await?;

        tracing::debug!(
            articles = articles.len(),
            inserted = inserted,
            "Articles stored"
        );
        Ok(inserted)
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    /// Map of article id to stored `updated` timestamp within `scope`.
    ///
    /// Seeds the id/updated omission filter.
    pub async fn article_snapshot(
        &self,
        scope: ScopeId,
        only_unread: bool,
    ) -> Result<HashMap<i64, i64>> {
        let cutoff = self.fresh_cutoff().await?;
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id, updated FROM articles WHERE ");
        push_scope(&mut builder, scope, cutoff);
        if only_unread {
            builder.push(" AND unread = 1");
        }

        let rows: Vec<(i64, i64)> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().collect())
    }

    /// Read view over a scope for the presentation layer.
    pub async fn get_articles(
        &self,
        scope: ScopeId,
        only_unread: bool,
        newest_first: bool,
        limit: Option<i64>,
    ) -> Result<Vec<Article>> {
        let limit = limit.unwrap_or(500).clamp(0, MAX_ARTICLES);
        let cutoff = self.fresh_cutoff().await?;

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT ");
        builder.push(ARTICLE_COLUMNS).push(" FROM articles WHERE ");
        push_scope(&mut builder, scope, cutoff);
        if only_unread {
            builder.push(" AND unread = 1");
        }
        builder.push(if newest_first {
            " ORDER BY updated DESC, id DESC"
        } else {
            " ORDER BY updated ASC, id ASC"
        });
        builder.push(" LIMIT ").push_bind(limit);

        let rows: Vec<ArticleDbRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        let mut articles: Vec<Article> = rows.into_iter().map(ArticleDbRow::into_article).collect();
        self.attach_labels(&mut articles).await?;
        Ok(articles)
    }

    /// Get a single article by its ID, labels included.
    pub async fn get_article(&self, id: i64) -> Result<Option<Article>> {
        let row: Option<ArticleDbRow> =
            sqlx::query_as(&format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        let Some(article) = row.map(ArticleDbRow::into_article) else {
            return Ok(None);
        };
        let mut articles = vec![article];
        self.attach_labels(&mut articles).await?;
        Ok(articles.pop())
    }

    async fn attach_labels(&self, articles: &mut [Article]) -> Result<()> {
        let ids: Vec<i64> = articles.iter().map(|a| a.id).collect();
        let mut by_article: HashMap<i64, Vec<(i64, String)>> = HashMap::new();

        for chunk in ids.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT al.article_id, l.id, l.caption FROM article_labels al \
                 JOIN labels l ON l.id = al.label_id WHERE al.article_id IN ",
            );
            push_id_list(&mut builder, chunk);
            builder.push(" ORDER BY l.caption");

            let rows: Vec<(i64, i64, String)> =
                builder.build_query_as().fetch_all(&self.pool).await?;
            for (article_id, label_id, caption) in rows {
                by_article.entry(article_id).or_default().push((label_id, caption));
            }
        }

        for article in articles.iter_mut() {
            article.labels = by_article.remove(&article.id).unwrap_or_default();
        }
        Ok(())
    }

    /// Unread articles in `scope`.
    ///
    /// Feeds, categories and labels read their delta-maintained counters;
    /// virtual scopes are counted from article flags.
    pub async fn unread_count(&self, scope: ScopeId) -> Result<i64> {
        let stored: Option<(i64,)> = match scope {
            ScopeId::Feed(id) => {
                sqlx::query_as("SELECT unread FROM feeds WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            ScopeId::Category(id) => {
                sqlx::query_as("SELECT unread FROM categories WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            ScopeId::Uncategorized => {
                sqlx::query_as("SELECT unread FROM categories WHERE id = 0")
                    .fetch_optional(&self.pool)
                    .await?
            }
            ScopeId::Label(id) => {
                sqlx::query_as("SELECT unread FROM labels WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            ScopeId::AllArticles | ScopeId::Fresh | ScopeId::Starred | ScopeId::Published => {
                let cutoff = self.fresh_cutoff().await?;
                let mut builder: QueryBuilder<Sqlite> =
                    QueryBuilder::new("SELECT COUNT(*) FROM articles WHERE unread = 1 AND ");
                push_scope(&mut builder, scope, cutoff);
                Some(builder.build_query_as().fetch_one(&self.pool).await?)
            }
        };
        Ok(stored.map(|(n,)| n).unwrap_or(0))
    }

    /// Stored `updated` timestamp of one article.
    pub async fn article_updated(&self, id: i64) -> Result<Option<i64>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT updated FROM articles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(updated,)| updated))
    }

    // ========================================================================
    // Local Marks
    // ========================================================================

    /// Set the unread flag, returns the ids that actually changed.
    ///
    /// Only transitioning rows touch the counters, so repeating a call is a no-op.
    pub async fn mark_articles_unread(&self, ids: &[i64], unread: bool) -> Result<Vec<i64>> {
        let mut tx = self.pool.begin().await?;
        let mut deltas = UnreadDeltas::default();
        let mut changed = Vec::new();

        for chunk in ids.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE articles SET unread = ");
            builder
                .push_bind(unread)
                .push(" WHERE unread != ")
                .push_bind(unread)
                .push(" AND id IN ");
            push_id_list(&mut builder, chunk);
            builder.push(" RETURNING id, feed_id");

            let rows: Vec<(i64, i64)> = builder.build_query_as().fetch_all(&mut *tx).await?;
            let row_ids: Vec<i64> = rows.iter().map(|(id, _)| *id).collect();
            let labels = labels_of(&mut *tx, &row_ids).await?;

            let delta = if unread { 1 } else { -1 };
            for (id, feed_id) in rows {
                deltas.add(feed_id, labels.get(&id).map(Vec::as_slice).unwrap_or(&[]), delta);
                changed.push(id);
            }
        }

        deltas.apply(&mut *tx).await?;
        tx.commit().await?;
        Ok(changed)
    }

    /// Mark every unread article of `scope` read, returns the changed ids.
    pub async fn mark_scope_read(&self, scope: ScopeId) -> Result<Vec<i64>> {
        let cutoff = self.fresh_cutoff().await?;
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id FROM articles WHERE unread = 1 AND ");
        push_scope(&mut builder, scope, cutoff);
        let ids: Vec<(i64,)> = builder.build_query_as().fetch_all(&self.pool).await?;
        let ids: Vec<i64> = ids.into_iter().map(|(id,)| id).collect();

        self.mark_articles_unread(&ids, false).await
    }

    /// Set a boolean mark, returns the ids that actually changed.
    ///
    /// For [`MarkKind::Read`], `on == true` marks the articles read.
    pub async fn set_articles_flag(&self, ids: &[i64], kind: MarkKind, on: bool) -> Result<Vec<i64>> {
        let column = flag_column(kind)?;
        if kind == MarkKind::Read {
            return self.mark_articles_unread(ids, !on).await;
        }

        let mut tx = self.pool.begin().await?;
        let mut changed = Vec::new();
        for chunk in ids.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE articles SET ");
            builder
                .push(column)
                .push(" = ")
                .push_bind(on)
                .push(" WHERE ")
                .push(column)
                .push(" != ")
                .push_bind(on)
                .push(" AND id IN ");
            push_id_list(&mut builder, chunk);
            builder.push(" RETURNING id");

            let rows: Vec<(i64,)> = builder.build_query_as().fetch_all(&mut *tx).await?;
            changed.extend(rows.into_iter().map(|(id,)| id));
        }
        tx.commit().await?;
        Ok(changed)
    }

    /// Store a note; an empty note clears it. Returns false for unknown articles.
    pub async fn set_article_note(&self, id: i64, note: &str) -> Result<bool> {
        let note = Some(note).filter(|n| !n.is_empty());
        let result = sqlx::query("UPDATE articles SET note = ? WHERE id = ?")
            .bind(note)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Make `unread_ids` the exact set of unread articles and recompute counters.
    ///
    /// Clearing, re-applying and recounting happen in one transaction, so no
    /// reader observes counters that disagree with the flags.
    pub async fn replace_unread_set(&self, unread_ids: &HashSet<i64>) -> Result<()> {
        let ids: Vec<i64> = unread_ids.iter().copied().collect();
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE articles SET unread = 0 WHERE unread = 1")
            .execute(&mut *tx)
            .await?;
        for chunk in ids.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("UPDATE articles SET unread = 1 WHERE id IN ");
            push_id_list(&mut builder, chunk);
            builder.build().execute(&mut *tx).await?;
        }
        recalculate(&mut *tx).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Clear a starred/published flag on every article not in `keep`.
    ///
    /// Used after a complete refresh of the matching virtual scope.
    pub async fn purge_unlisted_marks(&self, kind: MarkKind, keep: &HashSet<i64>) -> Result<u64> {
        let column = match kind {
            MarkKind::Starred | MarkKind::Published => flag_column(kind)?,
            MarkKind::Read | MarkKind::Note => bail!("only starred and published marks are purged"),
        };

        let marked: Vec<(i64,)> = sqlx::query_as(&format!("SELECT id FROM articles WHERE {column} = 1"))
            .fetch_all(&self.pool)
            .await?;
        let unlisted: Vec<i64> = marked
            .into_iter()
            .map(|(id,)| id)
            .filter(|id| !keep.contains(id))
            .collect();
        if unlisted.is_empty() {
            return Ok(0);
        }

        let cleared = self.set_articles_flag(&unlisted, kind, false).await?;
        tracing::debug!(kind = kind.as_str(), cleared = cleared.len(), "Unlisted marks cleared");
        Ok(cleared.len() as u64)
    }

    // ========================================================================
    // Purging
    // ========================================================================

    /// Keep only the `keep` newest articles that are neither starred nor published.
    pub async fn purge_old_articles(&self, keep: usize) -> Result<u64> {
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            DELETE FROM articles
            WHERE starred = 0 AND published = 0
              AND id NOT IN (
                  SELECT id FROM articles
                  WHERE starred = 0 AND published = 0
                  ORDER BY updated DESC, id DESC
                  LIMIT ?
              )
        "#,
        )
        .bind(keep)
        .execute(&mut *tx)
        .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            recalculate(&mut *tx).await?;
        }
        tx.commit().await?;

        if deleted > 0 {
            tracing::info!(deleted = deleted, keep = keep, "Old articles purged");
        }
        Ok(deleted)
    }

    /// Delete articles whose feed is no longer listed.
    ///
    /// Starred and published articles survive. Nothing is deleted while the
    /// feed list is empty (never fetched).
    pub async fn purge_orphaned_articles(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let (feeds,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM feeds")
            .fetch_one(&mut *tx)
            .await?;
        if feeds == 0 {
            return Ok(0);
        }

        let result = sqlx::query(
            "DELETE FROM articles WHERE starred = 0 AND published = 0 \
             AND feed_id NOT IN (SELECT id FROM feeds)",
        )
        .execute(&mut *tx)
        .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            recalculate(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(deleted)
    }

    // ========================================================================
    // Image Cache Bookkeeping
    // ========================================================================

    /// Unread articles the image cache has not processed yet, newest first.
    pub async fn articles_for_image_cache(&self, limit: i64) -> Result<Vec<Article>> {
        let rows: Vec<ArticleDbRow> = sqlx::query_as(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles \
             WHERE unread = 1 AND cached_images IS NULL \
             ORDER BY updated DESC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    /// Mark articles as processed by the image cache.
    pub async fn set_images_processed(&self, ids: &[i64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in ids.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("UPDATE articles SET cached_images = 1 WHERE id IN ");
            push_id_list(&mut builder, chunk);
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Feed;
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    pub(crate) fn article(id: i64, feed_id: i64, updated: i64, unread: bool) -> Article {
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

    fn feed(id: i64, category_id: i64) -> Feed {
        Feed {
            id,
            category_id,
            title: format!("Feed {id}"),
            url: format!("https://example.com/{id}.xml"),
            unread: 0,
            icon: None,
        }
    }

    #[tokio::test]
    async fn test_insert_counts_new_articles() {
        let db = test_db().await;
        db.replace_feeds(&[feed(1, 0)]).await.unwrap();

        let first = db
            .insert_articles(&[article(1, 1, 10, true), article(2, 1, 10, false)])
            .await
            .unwrap();
        assert_eq!(first, 2);

        let second = db
            .insert_articles(&[article(2, 1, 20, true), article(3, 1, 10, true)])
            .await
            .unwrap();
        assert_eq!(second, 1);
        assert_eq!(db.unread_count(ScopeId::Feed(1)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_reinsert_same_state_keeps_counters() {
        let db = test_db().await;
        db.replace_feeds(&[feed(1, 0)]).await.unwrap();
        let batch = [article(1, 1, 10, true)];

        db.insert_articles(&batch).await.unwrap();
        db.insert_articles(&batch).await.unwrap();

        assert_eq!(db.unread_count(ScopeId::Feed(1)).await.unwrap(), 1);
        assert_eq!(db.unread_count(ScopeId::Uncategorized).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_scoped_and_unread() {
        let db = test_db().await;
        db.replace_feeds(&[feed(1, 0), feed(2, 0)]).await.unwrap();
        db.insert_articles(&[
            article(1, 1, 10, true),
            article(2, 1, 20, false),
            article(3, 2, 30, true),
        ])
        .await
        .unwrap();

        let all = db.article_snapshot(ScopeId::AllArticles, false).await.unwrap();
        assert_eq!(all.len(), 3);
        let feed1 = db.article_snapshot(ScopeId::Feed(1), false).await.unwrap();
        assert_eq!(feed1, HashMap::from([(1, 10), (2, 20)]));
        let unread = db.article_snapshot(ScopeId::AllArticles, true).await.unwrap();
        assert_eq!(unread, HashMap::from([(1, 10), (3, 30)]));
    }

    #[tokio::test]
    async fn test_labels_are_replaced_and_counted() {
        let db = test_db().await;
        db.replace_feeds(&[feed(1, 0)]).await.unwrap();

        let mut a = article(1, 1, 10, true);
        a.labels = vec![(4, "work".to_string())];
        db.insert_articles(&[a.clone()]).await.unwrap();
        assert_eq!(db.unread_count(ScopeId::Label(4)).await.unwrap(), 1);

        a.labels.clear();
        a.updated = 11;
        db.insert_articles(&[a]).await.unwrap();
        assert_eq!(db.unread_count(ScopeId::Label(4)).await.unwrap(), 0);
        assert!(db.get_article(1).await.unwrap().unwrap().labels.is_empty());
    }

    #[tokio::test]
    async fn test_get_articles_order_and_filter() {
        let db = test_db().await;
        db.replace_feeds(&[feed(1, 0)]).await.unwrap();
        db.insert_articles(&[
            article(1, 1, 10, true),
            article(2, 1, 30, false),
            article(3, 1, 20, true),
        ])
        .await
        .unwrap();

        let newest: Vec<i64> = db
            .get_articles(ScopeId::Feed(1), false, true, None)
            .await
            .unwrap()
            .iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(newest, vec![2, 3, 1]);

        let unread_oldest: Vec<i64> = db
            .get_articles(ScopeId::Feed(1), true, false, None)
            .await
            .unwrap()
            .iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(unread_oldest, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_set_flag_returns_only_changed() {
        let db = test_db().await;
        db.insert_articles(&[article(1, 1, 10, false), article(2, 1, 10, false)])
            .await
            .unwrap();

        let changed = db.set_articles_flag(&[1], MarkKind::Starred, true).await.unwrap();
        assert_eq!(changed, vec![1]);
        let changed = db
            .set_articles_flag(&[1, 2], MarkKind::Starred, true)
            .await
            .unwrap();
        assert_eq!(changed, vec![2]);
        assert!(db.set_articles_flag(&[1], MarkKind::Note, true).await.is_err());
    }

    #[tokio::test]
    async fn test_replace_unread_set_recounts() {
        let db = test_db().await;
        db.replace_feeds(&[feed(1, 0)]).await.unwrap();
        db.insert_articles(&[
            article(1, 1, 10, true),
            article(2, 1, 10, true),
            article(3, 1, 10, false),
        ])
        .await
        .unwrap();

        db.replace_unread_set(&HashSet::from([3])).await.unwrap();

        let unread: Vec<i64> = db
            .get_articles(ScopeId::AllArticles, true, true, None)
            .await
            .unwrap()
            .iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(unread, vec![3]);
        assert_eq!(db.unread_count(ScopeId::Feed(1)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_purge_unlisted_marks() {
        let db = test_db().await;
        let mut a = article(1, 1, 10, false);
        a.starred = true;
        let mut b = article(2, 1, 10, false);
        b.starred = true;
        db.insert_articles(&[a, b]).await.unwrap();

        let cleared = db
            .purge_unlisted_marks(MarkKind::Starred, &HashSet::from([2]))
            .await
            .unwrap();
        assert_eq!(cleared, 1);
        assert!(!db.get_article(1).await.unwrap().unwrap().starred);
        assert!(db.get_article(2).await.unwrap().unwrap().starred);
    }

    #[tokio::test]
    async fn test_purge_old_articles_keeps_newest_and_marked() {
        let db = test_db().await;
        let mut starred = article(1, 1, 1, false);
        starred.starred = true;
        db.insert_articles(&[
            starred,
            article(2, 1, 2, false),
            article(3, 1, 3, false),
            article(4, 1, 4, false),
        ])
        .await
        .unwrap();

        let deleted = db.purge_old_articles(2).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(db.get_article(1).await.unwrap().is_some());
        assert!(db.get_article(2).await.unwrap().is_none());
        assert!(db.get_article(4).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_orphans() {
        let db = test_db().await;
        // No feeds known yet: nothing is deleted
        db.insert_articles(&[article(1, 9, 1, true)]).await.unwrap();
        assert_eq!(db.purge_orphaned_articles().await.unwrap(), 0);

        db.replace_feeds(&[feed(1, 0)]).await.unwrap();
        db.insert_articles(&[article(2, 1, 1, true)]).await.unwrap();
        assert_eq!(db.purge_orphaned_articles().await.unwrap(), 1);
        assert!(db.get_article(1).await.unwrap().is_none());
        assert!(db.get_article(2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_image_cache_selection() {
        let db = test_db().await;
        db.insert_articles(&[
            article(1, 1, 10, true),
            article(2, 1, 20, false),
            article(3, 1, 30, true),
        ])
        .await
        .unwrap();

        let pending: Vec<i64> = db
            .articles_for_image_cache(10)
            .await
            .unwrap()
            .iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(pending, vec![3, 1]);

        db.set_images_processed(&[3]).await.unwrap();
        let pending = db.articles_for_image_cache(10).await.unwrap();
        assert_eq!(pending.len(), 1);

        // A changed revision is scanned again
        db.insert_articles(&[article(3, 1, 31, true)]).await.unwrap();
        assert_eq!(db.articles_for_image_cache(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_note_roundtrip() {
        let db = test_db().await;
        db.insert_articles(&[article(1, 1, 10, false)]).await.unwrap();
        assert!(db.set_article_note(1, "remember").await.unwrap());
        assert_eq!(
            db.get_article(1).await.unwrap().unwrap().note.as_deref(),
            Some("remember")
        );
        assert!(db.set_article_note(1, "").await.unwrap());
        assert_eq!(db.get_article(1).await.unwrap().unwrap().note, None);
        assert!(!db.set_article_note(99, "x").await.unwrap());
    }
}
