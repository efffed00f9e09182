use anyhow::Result;
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashSet;

use super::schema::Database;
use super::types::FeedDbRow;
use super::BATCH_SIZE;
use crate::model::Feed;

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Replace the stored feed list with the server's.
    ///
    /// Listed feeds are upserted with the server's unread counters; unlisted
    /// feeds are deleted (their articles become orphans). Icons are kept.
    pub async fn replace_feeds(&self, feeds: &[Feed]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for chunk in feeds.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT INTO feeds (id, category_id, title, url, unread) ");
            builder.push_values(chunk, |mut b, feed| {
                b.push_bind(feed.id)
                    .push_bind(feed.category_id)
                    .push_bind(&feed.title)
                    .push_bind(&feed.url)
                    .push_bind(feed.unread);
            });
            builder.push(
                " ON CONFLICT(id) DO UPDATE SET category_id = excluded.category_id, \
                 title = excluded.title, url = excluded.url, unread = excluded.unread",
            );
            builder.build().execute(&mut *tx).await?;
        }

        let listed: HashSet<i64> = feeds.iter().map(|f| f.id).collect();
        let stored: Vec<(i64,)> = sqlx::query_as("SELECT id FROM feeds")
            .fetch_all(&mut *tx)
            .await?;
        let stale: Vec<i64> = stored
            .into_iter()
            .map(|(id,)| id)
            .filter(|id| !listed.contains(id))
            .collect();
        for chunk in stale.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("DELETE FROM feeds WHERE id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        if !stale.is_empty() {
            tracing::debug!(removed = stale.len(), "Unlisted feeds removed");
        }
        Ok(())
    }

    /// All feeds ordered by title.
    pub async fn get_feeds(&self) -> Result<Vec<Feed>> {
        let rows: Vec<FeedDbRow> = sqlx::query_as(
            "SELECT id, category_id, title, url, unread, icon FROM feeds ORDER BY title COLLATE NOCASE",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Feed::from).collect())
    }

    /// Feeds of one category ordered by title.
    pub async fn get_feeds_in_category(&self, category_id: i64) -> Result<Vec<Feed>> {
        let rows: Vec<FeedDbRow> = sqlx::query_as(
            "SELECT id, category_id, title, url, unread, icon FROM feeds \
             WHERE category_id = ? ORDER BY title COLLATE NOCASE",
        )
        .bind(category_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Feed::from).collect())
    }

    /// Ids of feeds that have no icon stored yet.
    pub async fn feeds_without_icon(&self) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as("SELECT id FROM feeds WHERE icon IS NULL ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn set_feed_icon(&self, feed_id: i64, icon: &[u8]) -> Result<()> {
        sqlx::query("UPDATE feeds SET icon = ? WHERE id = ?")
            .bind(icon)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
