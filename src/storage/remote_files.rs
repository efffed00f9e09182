use anyhow::Result;
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashMap;

use super::schema::Database;
use super::types::RemoteFileRow;
use super::BATCH_SIZE;
use crate::model::RemoteFile;

impl Database {
    // ========================================================================
    // Remote File Index
    // ========================================================================

    /// Record downloaded files and which articles reference them.
    ///
    /// `files` maps URL to byte size; `article_files` maps article id to the
    /// URLs found in it. Every article in `article_files` is marked processed.
    pub async fn record_cached_files(
        &self,
        files: &HashMap<String, u64>,
        article_files: &HashMap<i64, Vec<String>>,
        accessed_at: i64,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let entries: Vec<(&String, i64)> = files
            .iter()
            .map(|(url, len)| (url, i64::try_from(*len).unwrap_or(i64::MAX)))
            .collect();
        for chunk in entries.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT INTO remote_files (url, length, cached, accessed_at) ");
            builder.push_values(chunk, |mut b, (url, length)| {
                b.push_bind(url.as_str())
                    .push_bind(*length)
                    .push_bind(true)
                    .push_bind(accessed_at);
            });
            builder.push(
                " ON CONFLICT(url) DO UPDATE SET length = excluded.length, cached = 1, \
                 accessed_at = excluded.accessed_at",
            );
            builder.build().execute(&mut *tx).await?;
        }

        for (article_id, urls) in article_files {
            for url in urls.iter().filter(|u| files.contains_key(*u)) {
                sqlx::query(
                    "INSERT OR IGNORE INTO article_remote_files (article_id, remote_file_id) \
                     SELECT ?, id FROM remote_files WHERE url = ?",
                )
                .bind(article_id)
                .bind(url)
                .execute(&mut *tx)
                .await?;
            }
            sqlx::query("UPDATE articles SET cached_images = 1 WHERE id = ?")
                .bind(article_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Total bytes of files currently marked cached.
    pub async fn cached_files_size(&self) -> Result<i64> {
        let (size,): (i64,) =
            sqlx::query_as("SELECT COALESCE(SUM(length), 0) FROM remote_files WHERE cached = 1")
                .fetch_one(&self.pool)
                .await?;
        Ok(size)
    }

    /// URL to size of every cached file.
    pub async fn cached_file_index(&self) -> Result<HashMap<String, u64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT url, length FROM remote_files WHERE cached = 1")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(url, len)| (url, u64::try_from(len).unwrap_or(0)))
            .collect())
    }

    /// Least recently accessed cached files whose sizes add up to at least `excess` bytes.
    ///
    /// Ties on access time are broken by insertion order.
    pub async fn eviction_candidates(&self, excess: i64) -> Result<Vec<RemoteFile>> {
        if excess <= 0 {
            return Ok(Vec::new());
        }

        let rows: Vec<RemoteFileRow> = sqlx::query_as(
            "SELECT id, url, length, cached, accessed_at FROM remote_files \
             WHERE cached = 1 ORDER BY accessed_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut freed = 0;
        let mut candidates = Vec::new();
        for row in rows {
            if freed >= excess {
                break;
            }
            freed += row.length;
            candidates.push(RemoteFile::from(row));
        }
        Ok(candidates)
    }

    /// Mark files as no longer on disk, keeping their rows and sizes.
    pub async fn mark_files_uncached(&self, ids: &[i64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in ids.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("UPDATE remote_files SET cached = 0 WHERE id IN (");
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

    /// Record an access to the files referenced by an article (reader opened it).
    pub async fn touch_article_files(&self, article_id: i64, accessed_at: i64) -> Result<()> {
        sqlx::query(
            "UPDATE remote_files SET accessed_at = ? WHERE id IN \
             (SELECT remote_file_id FROM article_remote_files WHERE article_id = ?)",
        )
        .bind(accessed_at)
        .bind(article_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Forget every cached file (used when the cache directory is wiped).
    pub async fn delete_all_remote_files(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM article_remote_files")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM remote_files")
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE articles SET cached_images = NULL")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
