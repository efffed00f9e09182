use anyhow::Result;
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashSet;

use super::schema::Database;
use super::BATCH_SIZE;
use crate::model::Category;

impl Database {
    // ========================================================================
    // Category Operations
    // ========================================================================

    /// Replace the stored categories with the server's (ids above zero).
    ///
    /// The uncategorized row (id 0) is never removed.
    pub async fn replace_categories(&self, categories: &[Category]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let listed: Vec<&Category> = categories.iter().filter(|c| c.id > 0).collect();
        for chunk in listed.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT INTO categories (id, title, unread) ");
            builder.push_values(chunk, |mut b, category| {
                b.push_bind(category.id)
                    .push_bind(&category.title)
                    .push_bind(category.unread);
            });
            builder.push(
                " ON CONFLICT(id) DO UPDATE SET title = excluded.title, unread = excluded.unread",
            );
            builder.build().execute(&mut *tx).await?;
        }

        let keep: HashSet<i64> = listed.iter().map(|c| c.id).collect();
        let stored: Vec<(i64,)> = sqlx::query_as("SELECT id FROM categories WHERE id > 0")
            .fetch_all(&mut *tx)
            .await?;
        for (id,) in stored.into_iter().filter(|(id,)| !keep.contains(id)) {
            sqlx::query("DELETE FROM categories WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// All categories, uncategorized first, then by title.
    pub async fn get_categories(&self) -> Result<Vec<Category>> {
        let rows: Vec<(i64, String, i64)> = sqlx::query_as(
            "SELECT id, title, unread FROM categories ORDER BY id != 0, title COLLATE NOCASE",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, title, unread)| Category { id, title, unread })
            .collect())
    }
}
