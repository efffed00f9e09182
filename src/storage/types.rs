use thiserror::Error;

use crate::model::{Article, Feed, RemoteFile};

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("Another feedsync process appears to be running. Please wait for it to finish.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY, SQLITE_LOCKED and SQLITE_CANTOPEN all surface as lock errors.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Row Types
// ============================================================================

/// Internal row type for article queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleDbRow {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub content: String,
    pub url: Option<String>,
    pub comment_url: Option<String>,
    pub attachments: String,
    pub unread: bool,
    pub starred: bool,
    pub published: bool,
    pub note: Option<String>,
    pub updated: i64,
    pub score: Option<i64>,
}

impl ArticleDbRow {
    /// Labels are loaded separately and attached by the caller.
    pub(crate) fn into_article(self) -> Article {
        Article {
            id: self.id,
            feed_id: self.feed_id,
            title: self.title,
            content: self.content,
            url: self.url,
            comment_url: self.comment_url,
            attachments: decode_attachments(&self.attachments),
            unread: self.unread,
            starred: self.starred,
            published: self.published,
            note: self.note,
            updated: self.updated,
            score: self.score,
            labels: Vec::new(),
        }
    }
}

pub(crate) const ARTICLE_COLUMNS: &str = "id, feed_id, title, content, url, comment_url, \
     attachments, unread, starred, published, note, updated, score";

pub(crate) fn encode_attachments(urls: &[String]) -> String {
    serde_json::to_string(urls).unwrap_or_else(|_| "[]".to_string())
}

fn decode_attachments(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FeedDbRow {
    pub id: i64,
    pub category_id: i64,
    pub title: String,
    pub url: String,
    pub unread: i64,
    pub icon: Option<Vec<u8>>,
}

impl From<FeedDbRow> for Feed {
    fn from(row: FeedDbRow) -> Self {
        Feed {
            id: row.id,
            category_id: row.category_id,
            title: row.title,
            url: row.url,
            unread: row.unread,
            icon: row.icon,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct RemoteFileRow {
    pub id: i64,
    pub url: String,
    pub length: i64,
    pub cached: bool,
    pub accessed_at: i64,
}

impl From<RemoteFileRow> for RemoteFile {
    fn from(row: RemoteFileRow) -> Self {
        RemoteFile {
            id: row.id,
            url: row.url,
            length: row.length,
            cached: row.cached,
            accessed_at: row.accessed_at,
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// Local summary printed by `feedsync --status`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub categories: i64,
    pub feeds: i64,
    pub articles: i64,
    pub unread: i64,
    pub pending_marks: i64,
    pub cached_files: i64,
    pub cached_bytes: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_messages() {
        assert!(is_lock_message("error returned from database: database is locked"));
        assert!(is_lock_message("SQLITE_BUSY"));
        assert!(!is_lock_message("no such table: feeds"));
    }

    #[test]
    fn test_attachment_encoding() {
        let urls = vec!["https://a/1.png".to_string(), "https://a/2.png".to_string()];
        assert_eq!(decode_attachments(&encode_attachments(&urls)), urls);
        assert!(decode_attachments("not json").is_empty());
    }
}
