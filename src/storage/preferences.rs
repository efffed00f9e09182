use anyhow::Result;

use super::schema::Database;
use super::types::StoreStats;

/// Largest article id fully synced by the bulk pass
pub const SINCE_ID: &str = "sync.since_id";
/// Unix seconds of the last successful bulk pass
pub const LAST_SYNC: &str = "sync.last_sync";
/// Unix seconds of the last orphan cleanup
pub const LAST_CLEANUP: &str = "sync.last_cleanup";
/// Unix seconds of the last cache purge
pub const LAST_PURGE: &str = "cache.last_purge";
/// Server preference `FRESH_ARTICLE_MAX_AGE`, in hours
pub const FRESH_MAX_AGE_HOURS: &str = "server.fresh_max_age_hours";

const DEFAULT_FRESH_MAX_AGE_HOURS: i64 = 24;

impl Database {
    // ========================================================================
    // Preferences
    // ========================================================================

    /// Get a single preference value by key.
    ///
    /// Keys use dotted convention: `sync.since_id`, `cache.last_purge`, etc.
    pub async fn get_preference(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM user_preferences WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(value,)| value))
    }

    /// Set a preference value (UPSERT).
    pub async fn set_preference(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_preferences (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Integer preference; missing or unparsable values read as `None`.
    pub async fn get_preference_i64(&self, key: &str) -> Result<Option<i64>> {
        let value = self.get_preference(key).await?;
        Ok(value.and_then(|v| v.trim().parse().ok()))
    }

    pub async fn set_preference_i64(&self, key: &str, value: i64) -> Result<()> {
        self.set_preference(key, &value.to_string()).await
    }

    // ========================================================================
    // Sync State
    // ========================================================================

    pub async fn since_id(&self) -> Result<i64> {
        Ok(self.get_preference_i64(SINCE_ID).await?.unwrap_or(0))
    }

    /// Record the bulk-pass high-water mark and its completion time together.
    pub async fn set_sync_mark(&self, since_id: i64, synced_at: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in [(SINCE_ID, since_id), (LAST_SYNC, synced_at)] {
            sqlx::query(
                r#"
                INSERT INTO user_preferences (key, value, updated_at)
                VALUES (?, ?, datetime('now'))
                ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
            )
            .bind(key)
            .bind(value.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn last_sync(&self) -> Result<Option<i64>> {
        self.get_preference_i64(LAST_SYNC).await
    }

    /// Age limit of the Fresh scope, as last reported by the server.
    pub async fn fresh_max_age_hours(&self) -> Result<i64> {
        Ok(self
            .get_preference_i64(FRESH_MAX_AGE_HOURS)
            .await?
            .filter(|h| *h > 0)
            .unwrap_or(DEFAULT_FRESH_MAX_AGE_HOURS))
    }

    /// Oldest `updated` timestamp still counted as fresh.
    pub(crate) async fn fresh_cutoff(&self) -> Result<i64> {
        let hours = self.fresh_max_age_hours().await?;
        Ok(chrono::Utc::now().timestamp() - hours * 3600)
    }

    /// Local summary of what is stored.
    pub async fn stats(&self) -> Result<StoreStats> {
        let (categories, feeds, articles, unread, pending_marks, cached_files, cached_bytes): (
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
        ) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM categories WHERE id > 0),
                (SELECT COUNT(*) FROM feeds),
                (SELECT COUNT(*) FROM articles),
                (SELECT COUNT(*) FROM articles WHERE unread = 1),
                (SELECT COUNT(*) FROM pending_marks),
                (SELECT COUNT(*) FROM remote_files WHERE cached = 1),
                (SELECT COALESCE(SUM(length), 0) FROM remote_files WHERE cached = 1)
        "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            categories,
            feeds,
            articles,
            unread,
            pending_marks,
            cached_files,
            cached_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::Database;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_get_preference_missing() {
        let db = test_db().await;
        let value = db.get_preference("nonexistent.key").await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_set_preference_upsert() {
        let db = test_db().await;
        db.set_preference("cache.last_purge", "1").await.unwrap();
        db.set_preference("cache.last_purge", "2").await.unwrap();

        let value = db.get_preference("cache.last_purge").await.unwrap();
        assert_eq!(value, Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_integer_preferences() {
        let db = test_db().await;
        assert_eq!(db.since_id().await.unwrap(), 0);

        db.set_sync_mark(42, 1_700_000_000).await.unwrap();
        assert_eq!(db.since_id().await.unwrap(), 42);
        assert_eq!(db.last_sync().await.unwrap(), Some(1_700_000_000));

        db.set_preference(super::SINCE_ID, "garbage").await.unwrap();
        assert_eq!(db.since_id().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fresh_max_age_default_and_override() {
        let db = test_db().await;
        assert_eq!(db.fresh_max_age_hours().await.unwrap(), 24);
        db.set_preference_i64(super::FRESH_MAX_AGE_HOURS, 6).await.unwrap();
        assert_eq!(db.fresh_max_age_hours().await.unwrap(), 6);
        db.set_preference_i64(super::FRESH_MAX_AGE_HOURS, 0).await.unwrap();
        assert_eq!(db.fresh_max_age_hours().await.unwrap(), 24);
    }

    #[tokio::test]
    async fn test_stats_empty() {
        let db = test_db().await;
        let stats = db.stats().await.unwrap();
        assert_eq!(stats, Default::default());
    }
}
