//! Shared data model passed between the API client, the store and the sync layer.

// ============================================================================
// Feed Hierarchy
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: i64,
    pub title: String,
    pub unread: i64,
}

/// Feed as reported by the server.
///
/// `unread` is a running counter maintained by delta updates in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub id: i64,
    pub category_id: i64,
    pub title: String,
    pub url: String,
    pub unread: i64,
    pub icon: Option<Vec<u8>>,
}

/// Label with its per-article state.
///
/// `id` is the internal label id; see [`crate::scope::label_wire_id`] for the
/// protocol encoding. `changed` marks labels the user toggled so that only those
/// are sent back to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub id: i64,
    pub caption: String,
    pub unread: i64,
    pub checked: bool,
    pub changed: bool,
}

impl Label {
    pub fn new(id: i64, caption: impl Into<String>) -> Self {
        Self {
            id,
            caption: caption.into(),
            unread: 0,
            checked: false,
            changed: false,
        }
    }
}

// ============================================================================
// Articles
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub title: String,
    pub content: String,
    pub url: Option<String>,
    pub comment_url: Option<String>,
    pub attachments: Vec<String>,
    pub unread: bool,
    pub starred: bool,
    pub published: bool,
    pub note: Option<String>,
    /// Last update on the server, unix seconds
    pub updated: i64,
    pub score: Option<i64>,
    /// Internal label ids attached to the article
    pub labels: Vec<(i64, String)>,
}

// ============================================================================
// Cache Metadata
// ============================================================================

/// Cached media file, shared by every article that references its URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub id: i64,
    pub url: String,
    pub length: i64,
    pub cached: bool,
    /// Last access, unix milliseconds
    pub accessed_at: i64,
}

// ============================================================================
// Offline Edits
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkKind {
    Read,
    Starred,
    Published,
    Note,
}

impl MarkKind {
    /// Boolean mark kinds replayed by status synchronization, in replay order.
    pub const FLAGS: [MarkKind; 3] = [MarkKind::Read, MarkKind::Starred, MarkKind::Published];

    /// Storage key for the `pending_marks.kind` column.
    pub fn as_str(self) -> &'static str {
        match self {
            MarkKind::Read => "read",
            MarkKind::Starred => "starred",
            MarkKind::Published => "published",
            MarkKind::Note => "note",
        }
    }

    /// Field number of the `updateArticle` operation.
    pub(crate) fn wire_field(self) -> u8 {
        match self {
            MarkKind::Starred => 0,
            MarkKind::Published => 1,
            MarkKind::Read => 2,
            MarkKind::Note => 3,
        }
    }
}
