use anyhow::{bail, Result};
use sqlx::{QueryBuilder, Sqlite};

use super::schema::Database;
use super::BATCH_SIZE;
use crate::model::MarkKind;

impl Database {
    // ========================================================================
    // Pending-Write Queue
    // ========================================================================

    /// Queue a boolean mark that could not be written to the server.
    ///
    /// A later entry for the same `(article, kind)` replaces the earlier one.
    pub async fn queue_pending(&self, ids: &[i64], kind: MarkKind, value: bool) -> Result<()> {
        if kind == MarkKind::Note {
            bail!("notes are queued with queue_pending_note");
        }
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for chunk in ids.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT INTO pending_marks (article_id, kind, value, queued_at) ");
            builder.push_values(chunk, |mut b, id| {
                b.push_bind(*id)
                    .push_bind(kind.as_str())
                    .push_bind(value)
                    .push_bind(now);
            });
            builder.push(
                " ON CONFLICT(article_id, kind) DO UPDATE SET \
                 value = excluded.value, queued_at = excluded.queued_at",
            );
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn queue_pending_note(&self, id: i64, note: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_marks (article_id, kind, value, note, queued_at)
            VALUES (?, 'note', 0, ?, ?)
            ON CONFLICT(article_id, kind) DO UPDATE SET
                note = excluded.note, queued_at = excluded.queued_at
        "#,
        )
        .bind(id)
        .bind(note)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Article ids queued with `kind` set to `value`.
    pub async fn pending_marks(&self, kind: MarkKind, value: bool) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT article_id FROM pending_marks WHERE kind = ? AND value = ? ORDER BY article_id",
        )
        .bind(kind.as_str())
        .bind(value)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn pending_notes(&self) -> Result<Vec<(i64, String)>> {
        let rows: Vec<(i64, Option<String>)> = sqlx::query_as(
            "SELECT article_id, note FROM pending_marks WHERE kind = 'note' ORDER BY article_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, note)| (id, note.unwrap_or_default()))
            .collect())
    }

    /// Remove replayed entries.
    ///
    /// Only entries still holding `value` are removed, so a mark queued with the
    /// opposite value during the replay survives.
    pub async fn clear_pending(&self, ids: &[i64], kind: MarkKind, value: bool) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;

        for chunk in ids.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("DELETE FROM pending_marks WHERE kind = ");
            builder
                .push_bind(kind.as_str())
                .push(" AND value = ")
                .push_bind(value)
                .push(" AND article_id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
            removed += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    /// Remove a replayed note unless it was edited again meanwhile.
    pub async fn clear_pending_note(&self, id: i64, note: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM pending_marks WHERE kind = 'note' AND article_id = ? AND note IS ?",
        )
        .bind(id)
        .bind(note)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Drop queued entries of `kind` regardless of value.
    ///
    /// Called after a direct remote write for the same key succeeded.
    pub async fn discard_pending(&self, ids: &[i64], kind: MarkKind) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in ids.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("DELETE FROM pending_marks WHERE kind = ");
            builder.push_bind(kind.as_str()).push(" AND article_id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
            builder.build().execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn pending_count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pending_marks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
