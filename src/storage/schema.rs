use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::{is_lock_message, DatabaseError};

// ============================================================================
// Database
// ============================================================================

/// Local store shared by the sync and cache layers.
///
/// Cloning shares the underlying pool.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::InstanceLocked` if another process has the
    /// database locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Create the file owner-only before SQLite opens it
        #[cfg(unix)]
        if path != ":memory:" {
            use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
            let db_path = std::path::Path::new(path);
            if db_path.exists() {
                let perms = std::fs::Permissions::from_mode(0o600);
                if let Err(e) = std::fs::set_permissions(path, perms) {
                    tracing::warn!(path = %path, error = %e, "Failed to set database file permissions");
                }
            } else if db_path.parent().is_some_and(|p| p.exists()) {
                // SQLite reports the error at connect time if this fails
                let _file = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path)
                    .ok();
            }
        }

        // busy_timeout=5000: wait up to 5 seconds for locks held by a concurrent pass
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");
        // Single writer; the cache pass reads while the sync layer writes
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| {
            if is_lock_message(&e.to_string()) {
                DatabaseError::InstanceLocked
            } else {
                DatabaseError::Migration(e.to_string())
            }
        })?;
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        // Real categories come from the server; 0 is the implicit "uncategorized"
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                unread INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO categories (id, title, unread) VALUES (0, 'Uncategorized', 0)")
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                category_id INTEGER NOT NULL DEFAULT 0,
                title TEXT NOT NULL,
                url TEXT NOT NULL DEFAULT '',
                unread INTEGER NOT NULL DEFAULT 0,
                icon BLOB
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Articles may reference feeds that are not listed yet; orphans are purged
        // explicitly instead of through a foreign key.
        // cached_images: NULL = not scanned by the cache engine, 1 = processed
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL DEFAULT '',
                url TEXT,
                comment_url TEXT,
                attachments TEXT NOT NULL DEFAULT '[]',
                unread INTEGER NOT NULL DEFAULT 0,
                starred INTEGER NOT NULL DEFAULT 0,
                published INTEGER NOT NULL DEFAULT 0,
                note TEXT,
                updated INTEGER NOT NULL DEFAULT 0,
                score INTEGER,
                cached_images INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_feed_unread ON articles(feed_id, unread)")
            .execute(&mut *tx)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_articles_updated ON articles(updated DESC)")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_articles_image_scan ON articles(updated DESC) \
             WHERE unread = 1 AND cached_images IS NULL",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS labels (
                id INTEGER PRIMARY KEY,
                caption TEXT NOT NULL,
                unread INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS article_labels (
                article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
                label_id INTEGER NOT NULL REFERENCES labels(id) ON DELETE CASCADE,
                PRIMARY KEY (article_id, label_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // A file row outlives its cached bytes: eviction clears `cached` but keeps the size
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS remote_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT UNIQUE NOT NULL,
                length INTEGER NOT NULL DEFAULT 0,
                cached INTEGER NOT NULL DEFAULT 0,
                accessed_at INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_remote_files_eviction ON remote_files(accessed_at, id) WHERE cached = 1",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS article_remote_files (
                article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
                remote_file_id INTEGER NOT NULL REFERENCES remote_files(id) ON DELETE CASCADE,
                PRIMARY KEY (article_id, remote_file_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // One queued edit per (article, kind); `value` is the desired flag, `note` the desired text
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pending_marks (
                article_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                value INTEGER NOT NULL DEFAULT 0,
                note TEXT,
                queued_at INTEGER NOT NULL,
                PRIMARY KEY (article_id, kind)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Key-value store for sync state; keys use dotted convention (sync.since_id)
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_preferences (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Delete every synced row and all sync state; the schema stays in place.
    pub async fn reset(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in [
            "article_remote_files",
            "remote_files",
            "article_labels",
            "labels",
            "pending_marks",
            "articles",
            "feeds",
            "user_preferences",
        ] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("DELETE FROM categories WHERE id != 0")
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE categories SET unread = 0")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
