//! Write operations. Each returns `true` only if every request succeeded.

use serde_json::{json, Value};

use super::client::ApiClient;
use crate::model::MarkKind;
use crate::scope::{label_wire_id, ScopeId};

/// Server-side limit on ids per write request
pub const MAX_IDS_PER_REQUEST: usize = 100;

fn id_list(ids: &[i64]) -> String {
    ids.iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

impl ApiClient {
    /// Set a boolean mark on `ids`.
    ///
    /// For [`MarkKind::Read`], `on == true` marks the articles read. Notes are
    /// not boolean; use [`ApiClient::mark_note`].
    pub async fn mark(&self, ids: &[i64], kind: MarkKind, on: bool) -> bool {
        let mode = match kind {
            MarkKind::Read => !on,
            MarkKind::Starred | MarkKind::Published => on,
            MarkKind::Note => {
                tracing::warn!("Notes cannot be set through a boolean mark");
                return false;
            }
        };
        self.update_articles(ids, kind, u8::from(mode), None).await
    }

    pub async fn mark_read(&self, ids: &[i64], read: bool) -> bool {
        self.mark(ids, MarkKind::Read, read).await
    }

    pub async fn mark_starred(&self, ids: &[i64], starred: bool) -> bool {
        self.mark(ids, MarkKind::Starred, starred).await
    }

    pub async fn mark_published(&self, ids: &[i64], published: bool) -> bool {
        self.mark(ids, MarkKind::Published, published).await
    }

    pub async fn mark_note(&self, ids: &[i64], note: &str) -> bool {
        self.update_articles(ids, MarkKind::Note, 0, Some(note)).await
    }

    async fn update_articles(&self, ids: &[i64], kind: MarkKind, mode: u8, data: Option<&str>) -> bool {
        for chunk in ids.chunks(MAX_IDS_PER_REQUEST) {
            let mut params = json!({
                "article_ids": id_list(chunk),
                "mode": mode,
                "field": kind.wire_field(),
            });
            if let Some(data) = data {
                params["data"] = Value::from(data);
            }

            if let Err(e) = self.call("updateArticle", params).await {
                tracing::warn!(
                    kind = kind.as_str(),
                    ids = chunk.len(),
                    error = %e,
                    "updateArticle failed"
                );
                return false;
            }
        }
        true
    }

    /// Mark every article of `scope` read on the server.
    pub async fn catchup(&self, scope: ScopeId) -> bool {
        let (feed_id, is_cat) = scope.to_wire();
        match self
            .call("catchupFeed", json!({ "feed_id": feed_id, "is_cat": is_cat }))
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(scope = %scope, error = %e, "catchupFeed failed");
                false
            }
        }
    }

    /// Assign or remove the label with internal id `label` on `ids`.
    pub async fn set_article_label(&self, ids: &[i64], label: i64, assign: bool) -> bool {
        for chunk in ids.chunks(MAX_IDS_PER_REQUEST) {
            let params = json!({
                "article_ids": id_list(chunk),
                "label_id": label_wire_id(label),
                "assign": assign,
            });
            if let Err(e) = self.call("setArticleLabel", params).await {
                tracing::warn!(label = label, error = %e, "setArticleLabel failed");
                return false;
            }
        }
        true
    }
}
