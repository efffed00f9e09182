use anyhow::Result;
use sqlx::{QueryBuilder, SqliteConnection};
use std::collections::HashMap;

use super::schema::Database;

/// Net unread transitions collected inside a transaction.
///
/// Feed deltas are applied to the feed and to its owning category; counters
/// are clamped at zero.
#[derive(Debug, Default)]
pub(crate) struct UnreadDeltas {
    feeds: HashMap<i64, i64>,
    labels: HashMap<i64, i64>,
}

impl UnreadDeltas {
    /// Record that an article of `feed_id` carrying `labels` gained (`+1`) or
    /// lost (`-1`) its unread flag.
    pub(crate) fn add(&mut self, feed_id: i64, labels: &[i64], delta: i64) {
        *self.feeds.entry(feed_id).or_default() += delta;
        for label in labels {
            *self.labels.entry(*label).or_default() += delta;
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.feeds.values().all(|d| *d == 0) && self.labels.values().all(|d| *d == 0)
    }

    pub(crate) async fn apply(self, conn: &mut SqliteConnection) -> Result<()> {
        for (feed_id, delta) in self.feeds.into_iter().filter(|(_, d)| *d != 0) {
            sqlx::query("UPDATE feeds SET unread = MAX(0, unread + ?) WHERE id = ?")
                .bind(delta)
                .bind(feed_id)
                .execute(&mut *conn)
                .await?;
            sqlx::query(
                "UPDATE categories SET unread = MAX(0, unread + ?) \
                 WHERE id = (SELECT category_id FROM feeds WHERE id = ?)",
            )
            .bind(delta)
            .bind(feed_id)
            .execute(&mut *conn)
            .await?;
        }
        for (label_id, delta) in self.labels.into_iter().filter(|(_, d)| *d != 0) {
            sqlx::query("UPDATE labels SET unread = MAX(0, unread + ?) WHERE id = ?")
                .bind(delta)
                .bind(label_id)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }
}

/// Label ids attached to each of `ids`.
pub(crate) async fn labels_of(
    conn: &mut SqliteConnection,
    ids: &[i64],
) -> Result<HashMap<i64, Vec<i64>>> {
    let mut out: HashMap<i64, Vec<i64>> = HashMap::new();
    for chunk in ids.chunks(super::BATCH_SIZE) {
        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("SELECT article_id, label_id FROM article_labels WHERE article_id IN (");
        let mut separated = builder.separated(", ");
        for id in chunk {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let rows: Vec<(i64, i64)> = builder.build_query_as().fetch_all(&mut *conn).await?;
        for (article_id, label_id) in rows {
            out.entry(article_id).or_default().push(label_id);
        }
    }
    Ok(out)
}

/// Recompute every stored counter from the raw unread flags.
pub(crate) async fn recalculate(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        "UPDATE feeds SET unread = \
         (SELECT COUNT(*) FROM articles a WHERE a.feed_id = feeds.id AND a.unread = 1)",
    )
    .execute(&mut *conn)
    .await?;
    sqlx::query(
        "UPDATE categories SET unread = \
         (SELECT COALESCE(SUM(f.unread), 0) FROM feeds f WHERE f.category_id = categories.id)",
    )
    .execute(&mut *conn)
    .await?;
    sqlx::query(
        "UPDATE labels SET unread = \
         (SELECT COUNT(*) FROM article_labels l JOIN articles a ON a.id = l.article_id \
          WHERE l.label_id = labels.id AND a.unread = 1)",
    )
    .execute(&mut *conn)
    .await?;
    Ok(())
}

impl Database {
    // ========================================================================
    // Counter Reconciliation
    // ========================================================================

    /// Recompute feed, category and label unread counters from article flags.
    ///
    /// Delta accounting can drift when a remote write and the local update
    /// disagree; this pass restores the exact counts.
    pub async fn recalculate_counters(&self) -> Result<()> {
        let started = std::time::Instant::now();
        let mut tx = self.pool.begin().await?;
        recalculate(&mut *tx).await?;
        tx.commit().await?;
        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Unread counters recalculated"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deltas_net_out() {
        let mut deltas = UnreadDeltas::default();
        deltas.add(1, &[3], 1);
        deltas.add(1, &[3], -1);
        assert!(deltas.is_empty());
        deltas.add(2, &[], -1);
        assert!(!deltas.is_empty());
    }
}
