use anyhow::Result;
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashSet;

use super::schema::Database;
use super::BATCH_SIZE;
use crate::model::Label;

impl Database {
    // ========================================================================
    // Label Operations
    // ========================================================================

    /// Replace the stored labels with the server's, including their counters.
    ///
    /// Removing a label also removes its article assignments.
    pub async fn replace_labels(&self, labels: &[Label]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for chunk in labels.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT INTO labels (id, caption, unread) ");
            builder.push_values(chunk, |mut b, label| {
                b.push_bind(label.id)
                    .push_bind(&label.caption)
                    .push_bind(label.unread);
            });
            builder.push(
                " ON CONFLICT(id) DO UPDATE SET caption = excluded.caption, unread = excluded.unread",
            );
            builder.build().execute(&mut *tx).await?;
        }

        let keep: HashSet<i64> = labels.iter().map(|l| l.id).collect();
        let stored: Vec<(i64,)> = sqlx::query_as("SELECT id FROM labels")
            .fetch_all(&mut *tx)
            .await?;
        for (id,) in stored.into_iter().filter(|(id,)| !keep.contains(id)) {
            sqlx::query("DELETE FROM labels WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Every label with `checked` set for the ones attached to `article_id`.
    pub async fn get_labels(&self, article_id: Option<i64>) -> Result<Vec<Label>> {
        let rows: Vec<(i64, String, i64, bool)> = sqlx::query_as(
            r#"
            SELECT l.id, l.caption, l.unread,
                   EXISTS (SELECT 1 FROM article_labels al
                           WHERE al.label_id = l.id AND al.article_id = ?) AS checked
            FROM labels l
            ORDER BY l.caption COLLATE NOCASE
        "#,
        )
        .bind(article_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, caption, unread, checked)| Label {
                id,
                caption,
                unread,
                checked,
                changed: false,
            })
            .collect())
    }

    /// Labels that currently have unread articles.
    pub async fn labels_with_unread(&self) -> Result<Vec<Label>> {
        Ok(self
            .get_labels(None)
            .await?
            .into_iter()
            .filter(|l| l.unread > 0)
            .collect())
    }

    /// Attach or detach one label locally, keeping its counter in step.
    pub async fn set_article_label(&self, article_id: i64, label_id: i64, checked: bool) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let changed = if checked {
            sqlx::query("INSERT OR IGNORE INTO article_labels (article_id, label_id) VALUES (?, ?)")
        } else {
            sqlx::query("DELETE FROM article_labels WHERE article_id = ? AND label_id = ?")
        }
        .bind(article_id)
        .bind(label_id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        if changed {
            let delta = if checked { 1 } else { -1 };
            sqlx::query(
                "UPDATE labels SET unread = MAX(0, unread + ?) WHERE id = ? \
                 AND EXISTS (SELECT 1 FROM articles WHERE id = ? AND unread = 1)",
            )
            .bind(delta)
            .bind(label_id)
            .bind(article_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(changed)
    }
}
