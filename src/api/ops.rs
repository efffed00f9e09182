//! Read operations: categories, feeds, headlines, server preferences.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use super::client::ApiClient;
use super::error::ApiError;
use super::filter::ArticleFilter;
use super::headline::decode_headlines;
use crate::model::{Article, Category, Feed, Label};
use crate::scope::{label_internal_id, ScopeId, LABEL_BASE};

/// Wire id of the "all feeds" pseudo category accepted by `getFeeds`
const ALL_FEEDS_CATEGORY: i64 = -4;
/// Category under which labels are listed by `getFeeds`
const LABELS_CATEGORY: i64 = -2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    All,
    Unread,
}

impl ViewMode {
    fn as_str(self) -> &'static str {
        match self {
            ViewMode::All => "all_articles",
            ViewMode::Unread => "unread",
        }
    }
}

/// Parameters of a paged headline fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadlineQuery {
    pub scope: ScopeId,
    /// Target number of records to add to the working set
    pub limit: usize,
    pub view_mode: ViewMode,
    /// Only articles with a larger id; 0 disables the bound
    pub since_id: i64,
}

impl HeadlineQuery {
    pub fn new(scope: ScopeId, limit: usize, view_mode: ViewMode) -> Self {
        Self {
            scope,
            limit,
            view_mode,
            since_id: 0,
        }
    }

    pub fn since(mut self, since_id: i64) -> Self {
        self.since_id = since_id;
        self
    }
}

/// Result of `getFeeds`: real feeds plus the labels the server lists among them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedListing {
    pub feeds: Vec<Feed>,
    pub labels: Vec<Label>,
}

/// Category or feed entry; ids and counters may arrive as strings.
#[derive(Deserialize)]
struct RawEntry {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    cat_id: Value,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    feed_url: Option<String>,
    #[serde(default)]
    unread: Value,
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_entries(op: &str, content: &str) -> Result<Vec<RawEntry>, ApiError> {
    serde_json::from_str(content).map_err(|e| ApiError::Parse(format!("{op}: {e}")))
}

impl ApiClient {
    /// Fetch the server's real categories (ids above zero).
    ///
    /// Virtual categories are implied by [`ScopeId`] and never stored from the wire.
    pub async fn fetch_categories(&self) -> Result<Vec<Category>, ApiError> {
        let content = self
            .call("getCategories", json!({ "unread_only": false, "include_empty": true }))
            .await?;

        let categories = parse_entries("getCategories", content.get())?
            .into_iter()
            .filter_map(|entry| {
                let id = as_int(&entry.id).filter(|id| *id > 0)?;
                Some(Category {
                    id,
                    title: entry.title?,
                    unread: as_int(&entry.unread).unwrap_or(0).max(0),
                })
            })
            .collect();

        Ok(categories)
    }

    /// Fetch every feed, splitting out the labels listed under the labels category.
    pub async fn fetch_feeds(&self) -> Result<FeedListing, ApiError> {
        let content = self
            .call("getFeeds", json!({ "cat_id": ALL_FEEDS_CATEGORY }))
            .await?;

        let mut listing = FeedListing::default();
        for entry in parse_entries("getFeeds", content.get())? {
            let (Some(id), Some(title)) = (as_int(&entry.id), entry.title) else {
                continue;
            };
            let category_id = as_int(&entry.cat_id).unwrap_or(0);
            let unread = as_int(&entry.unread).unwrap_or(0).max(0);

            if id <= LABEL_BASE {
                let mut label = Label::new(label_internal_id(id), title);
                label.unread = unread;
                listing.labels.push(label);
            } else if id > 0 && category_id != LABELS_CATEGORY {
                listing.feeds.push(Feed {
                    id,
                    category_id: category_id.max(0),
                    title,
                    url: entry.feed_url.unwrap_or_default(),
                    unread,
                    icon: None,
                });
            }
        }

        Ok(listing)
    }

    /// Page through `getHeadlines`, merging kept records into `into`.
    ///
    /// Each page asks for at most the records still missing, so a smaller
    /// `query.limit` shrinks the responses too. Stops when a page comes back
    /// short or `into` has grown by `query.limit` records. Returns the number
    /// of records consumed, omitted ones included.
    pub async fn fetch_headlines(
        &self,
        query: &HeadlineQuery,
        mut filter: Option<&mut (dyn ArticleFilter + '_)>,
        into: &mut HashMap<i64, Article>,
    ) -> Result<usize, ApiError> {
        let (feed_id, is_cat) = query.scope.to_wire();
        let target = into.len().saturating_add(query.limit);
        let mut skip = 0;
        let mut consumed = 0;

        while into.len() < target {
            let page = self.page_size().min(target - into.len()).max(1);
            let mut params = json!({
                "feed_id": feed_id,
                "is_cat": is_cat,
                "limit": page,
                "skip": skip,
                "view_mode": query.view_mode.as_str(),
                "show_content": true,
                "include_attachments": true,
            });
            if query.since_id > 0 {
                params["since_id"] = json!(query.since_id);
            }

            let content = self.call("getHeadlines", params).await?;
            let count = decode_headlines(content.get(), filter.as_deref_mut(), into)
                .map_err(|e| ApiError::Parse(format!("getHeadlines: {e}")))?;
            consumed += count;

            tracing::debug!(
                scope = %query.scope,
                skip = skip,
                count = count,
                kept = into.len(),
                "Headline page decoded"
            );

            if count < page {
                break;
            }
            skip += page;
        }

        Ok(consumed)
    }

    /// Read a preference value of the logged-in user.
    pub async fn get_server_preference(&self, name: &str) -> Result<Option<String>, ApiError> {
        #[derive(Deserialize)]
        struct Pref {
            #[serde(default)]
            value: Value,
        }

        let content = self.call("getPref", json!({ "pref_name": name })).await?;
        let pref: Pref = serde_json::from_str(content.get())
            .map_err(|e| ApiError::Parse(format!("getPref: {e}")))?;

        Ok(match pref.value {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        })
    }
}
