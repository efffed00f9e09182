use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::error::SyncError;
use super::throttle::{RefreshKey, RefreshTimes};
use crate::api::{
    ApiError, ArticleFilter, HeadlineQuery, IdUpdatedFilter, UnreadFilter, ViewMode,
    MAX_IDS_PER_REQUEST,
};
use crate::context::Context;
use crate::events::Event;
use crate::model::{Article, Label, MarkKind};
use crate::scope::ScopeId;
use crate::storage::preferences::{FRESH_MAX_AGE_HOURS, LAST_CLEANUP};

/// Articles requested per pass of [`Synchronizer::cache_articles`]
const CACHE_ARTICLES_LIMIT: usize = 400;
/// Server preference holding the fresh-article age limit in hours
const FRESH_ARTICLE_MAX_AGE: &str = "FRESH_ARTICLE_MAX_AGE";

/// Per-deployment sync settings.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Minimum time between two refreshes of the same key
    pub min_refresh: Duration,
    /// Most articles kept locally (starred and published not counted)
    pub article_limit: usize,
    /// Treat the network as unavailable unless a call overrides it
    pub work_offline: bool,
    /// Minimum time between two orphan cleanups
    pub cleanup_interval: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            min_refresh: Duration::from_secs(30 * 60),
            article_limit: 5000,
            work_offline: false,
            cleanup_interval: Duration::from_secs(24 * 3600),
        }
    }
}

/// Result of a throttled, connectivity-gated sync call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Refreshed too recently; no request was made
    Throttled,
    /// No usable network; no request was made
    Offline,
    /// The refresh ran; `fetched` records were stored
    Updated { fetched: usize },
}

/// Keeps the local store in step with the server.
///
/// Reads flow server to store; writes are applied locally first and sent to
/// the server afterwards, falling back to the pending-write queue.
pub struct Synchronizer {
    ctx: Context,
    settings: SyncSettings,
    times: Mutex<RefreshTimes>,
    /// Set after a response exceeded the size cap; halves the next fetch
    low_memory: AtomicBool,
}

impl Synchronizer {
    pub fn new(ctx: Context, settings: SyncSettings) -> Self {
        let times = Mutex::new(RefreshTimes::new(settings.min_refresh));
        Self {
            ctx,
            settings,
            times,
            low_memory: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Forget all refresh timestamps so the next calls are not throttled.
    pub fn reset_refresh_times(&self) {
        self.times().clear();
    }

    fn times(&self) -> MutexGuard<'_, RefreshTimes> {
        self.times.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Connected means a usable network and, unless overridden, not working offline.
    pub fn is_connected(&self, override_offline: bool) -> bool {
        self.ctx.network.is_online() && (override_offline || !self.settings.work_offline)
    }

    /// Throttle and connectivity checks shared by every refresh.
    fn gate(
        &self,
        key: RefreshKey,
        override_offline: bool,
        override_delay: bool,
    ) -> Option<RefreshOutcome> {
        if !override_delay && !self.times().is_due(key) {
            tracing::debug!(key = ?key, "Refresh throttled");
            return Some(RefreshOutcome::Throttled);
        }
        if !self.is_connected(override_offline) {
            tracing::debug!(key = ?key, "Refresh skipped while offline");
            return Some(RefreshOutcome::Offline);
        }
        None
    }

    /// Record a successful refresh and notify observers once.
    async fn finish(&self, keys: &[RefreshKey]) {
        {
            let mut times = self.times();
            for key in keys {
                times.mark(*key);
            }
        }
        if let Some(key) = keys.first() {
            self.ctx.notifier.send(Event::Refreshed(*key)).await;
        }
    }

    // ========================================================================
    // Categories and Feeds
    // ========================================================================

    pub async fn update_categories(
        &self,
        override_offline: bool,
        override_delay: bool,
    ) -> Result<RefreshOutcome, SyncError> {
        if let Some(outcome) = self.gate(RefreshKey::Categories, override_offline, override_delay) {
            return Ok(outcome);
        }

        let categories = self.ctx.api.fetch_categories().await?;
        self.ctx.db.replace_categories(&categories).await?;
        tracing::info!(count = categories.len(), "Categories updated");

        self.finish(&[RefreshKey::Categories]).await;
        Ok(RefreshOutcome::Updated {
            fetched: categories.len(),
        })
    }

    /// Refresh the feed list and the labels listed with it.
    pub async fn update_feeds(
        &self,
        override_offline: bool,
        override_delay: bool,
    ) -> Result<RefreshOutcome, SyncError> {
        if let Some(outcome) = self.gate(RefreshKey::Feeds, override_offline, override_delay) {
            return Ok(outcome);
        }

        let listing = self.ctx.api.fetch_feeds().await?;
        // An empty list more likely means a broken response than no subscriptions
        if listing.feeds.is_empty() {
            tracing::warn!("Server listed no feeds, keeping the stored ones");
        } else {
            self.ctx.db.replace_feeds(&listing.feeds).await?;
        }
        self.ctx.db.replace_labels(&listing.labels).await?;
        tracing::info!(
            feeds = listing.feeds.len(),
            labels = listing.labels.len(),
            "Feeds updated"
        );

        self.finish(&[RefreshKey::Feeds]).await;
        Ok(RefreshOutcome::Updated {
            fetched: listing.feeds.len(),
        })
    }

    // ========================================================================
    // Articles
    // ========================================================================

    /// Number of headlines to request for `scope`.
    async fn fetch_limit(
        &self,
        scope: ScopeId,
        view_mode: ViewMode,
        halve: bool,
    ) -> Result<usize, SyncError> {
        let limit = if scope.is_marked() {
            self.ctx.api.page_size()
        } else {
            let mut count = self.ctx.db.unread_count(scope).await?;
            if count <= 0 {
                count = match view_mode {
                    ViewMode::Unread => 50,
                    ViewMode::All => 100,
                };
            }
            if count < 300 {
                count += if scope.is_category() { 100 } else { 50 };
            }
            usize::try_from(count).unwrap_or(0)
        };

        Ok(if halve { (limit / 2).max(1) } else { limit })
    }

    /// Page headlines into `into`, remembering resource exhaustion for the next call.
    async fn fetch_into(
        &self,
        query: &HeadlineQuery,
        filter: Option<&mut (dyn ArticleFilter + '_)>,
        into: &mut HashMap<i64, Article>,
    ) -> Result<usize, SyncError> {
        match self.ctx.api.fetch_headlines(query, filter, into).await {
            Ok(consumed) => Ok(consumed),
            Err(ApiError::ResponseTooLarge) => {
                self.low_memory.store(true, Ordering::Relaxed);
                tracing::warn!(scope = %query.scope, limit = query.limit, "Response too large, halving the next fetch");
                Err(ApiError::ResponseTooLarge.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Drop old articles to make room for `incoming`, then store them.
    async fn store_articles(&self, articles: &[Article]) -> Result<usize, SyncError> {
        if articles.is_empty() {
            return Ok(0);
        }
        let room = self.settings.article_limit.saturating_sub(articles.len());
        self.ctx.db.purge_old_articles(room).await?;
        Ok(self.ctx.db.insert_articles(articles).await?)
    }

    /// Refresh the articles of one scope.
    ///
    /// Unless `only_unread`, unread articles are fetched first and unfiltered,
    /// so an article marked unread again on the server is stored as unread even
    /// when its `updated` timestamp did not change. The main pass omits
    /// articles whose `updated` timestamp did not change since they were stored.
    pub async fn refresh(
        &self,
        scope: ScopeId,
        only_unread: bool,
        override_offline: bool,
        override_delay: bool,
    ) -> Result<RefreshOutcome, SyncError> {
        let key = RefreshKey::Articles(scope);
        if let Some(outcome) = self.gate(key, override_offline, override_delay) {
            return Ok(outcome);
        }

        let db = &self.ctx.db;
        let halve = self.low_memory.swap(false, Ordering::Relaxed);
        let marked = scope.is_marked();

        // Starred and Published are fetched in full so unlisted marks can be pruned
        let (only_unread, since_id, snapshot) = if marked {
            (false, 0, HashMap::new())
        } else {
            (only_unread, db.since_id().await?, db.article_snapshot(scope, false).await?)
        };
        let mut filter = IdUpdatedFilter::new(snapshot);
        let mut fetched = HashMap::new();

        if !only_unread {
            let limit = self.fetch_limit(scope, ViewMode::Unread, halve).await?;
            let query = HeadlineQuery::new(scope, limit, ViewMode::Unread);
            self.fetch_into(&query, None, &mut fetched).await?;
        }

        let view_mode = if only_unread {
            ViewMode::Unread
        } else {
            ViewMode::All
        };
        let limit = self.fetch_limit(scope, view_mode, halve).await?;
        let query = HeadlineQuery::new(scope, limit, view_mode).since(since_id);
        let consumed = self.fetch_into(&query, Some(&mut filter), &mut fetched).await?;

        // Only a complete listing can prove a mark was removed on the server
        let listed: Option<HashSet<i64>> =
            (marked && consumed < limit).then(|| fetched.keys().copied().collect());

        let articles: Vec<Article> = fetched.into_values().collect();
        self.store_articles(&articles).await?;

        if let Some(listed) = listed {
            let kind = if scope == ScopeId::Starred {
                MarkKind::Starred
            } else {
                MarkKind::Published
            };
            db.purge_unlisted_marks(kind, &listed).await?;
        }

        self.finish_refresh(scope, articles.len(), filter.omitted_ids().len())
            .await
    }

    async fn finish_refresh(
        &self,
        scope: ScopeId,
        fetched: usize,
        omitted: usize,
    ) -> Result<RefreshOutcome, SyncError> {
        let mut keys = vec![RefreshKey::Articles(scope)];
        let category = match scope {
            ScopeId::Category(id) => Some(id),
            ScopeId::Uncategorized => Some(0),
            _ => None,
        };
        if let Some(category) = category {
            for feed in self.ctx.db.get_feeds_in_category(category).await? {
                keys.push(RefreshKey::Articles(ScopeId::Feed(feed.id)));
            }
        }

        tracing::info!(scope = %scope, fetched = fetched, omitted = omitted, "Articles refreshed");
        self.finish(&keys).await;
        Ok(RefreshOutcome::Updated { fetched })
    }

    /// Bulk pass over every article newer than the high-water mark.
    ///
    /// Afterwards the local unread set is exactly the server's: previously
    /// unread articles are recomputed, not patched.
    pub async fn cache_articles(
        &self,
        override_offline: bool,
        override_delay: bool,
    ) -> Result<RefreshOutcome, SyncError> {
        if let Some(outcome) =
            self.gate(RefreshKey::ArticlesCached, override_offline, override_delay)
        {
            return Ok(outcome);
        }

        let db = &self.ctx.db;
        let mut limit = CACHE_ARTICLES_LIMIT;
        if self.low_memory.swap(false, Ordering::Relaxed) {
            limit /= 2;
        }
        let since_id = db.since_id().await?;
        let mut fetched = HashMap::new();

        // Every unread article; unchanged ones are only recorded as omitted
        let mut unread_filter = IdUpdatedFilter::new(db.article_snapshot(ScopeId::AllArticles, true).await?);
        let query = HeadlineQuery::new(ScopeId::AllArticles, limit, ViewMode::Unread);
        self.fetch_into(&query, Some(&mut unread_filter), &mut fetched)
            .await?;

        // Everything newer than the newest cached article, minus the unread ones
        let mut read_filter = db
            .article_updated(since_id)
            .await?
            .map(UnreadFilter::with_cutoff);
        let query = HeadlineQuery::new(ScopeId::AllArticles, limit, ViewMode::All).since(since_id);
        self.fetch_into(
            &query,
            read_filter.as_mut().map(|f| f as &mut dyn ArticleFilter),
            &mut fetched,
        )
        .await?;

        let articles: Vec<Article> = fetched.into_values().collect();
        self.store_articles(&articles).await?;

        let mut unread: HashSet<i64> = unread_filter.omitted_ids().clone();
        unread.extend(articles.iter().filter(|a| a.unread).map(|a| a.id));

        if let Some(max_id) = articles.iter().map(|a| a.id).max() {
            db.set_sync_mark(max_id.max(since_id), chrono::Utc::now().timestamp())
                .await?;
        }
        // Nothing fetched and nothing omitted is indistinguishable from a failed listing
        if !articles.is_empty() || !unread_filter.omitted_ids().is_empty() {
            db.replace_unread_set(&unread).await?;
        }

        tracing::info!(
            fetched = articles.len(),
            unread = unread.len(),
            since_id = since_id,
            "Articles cached"
        );
        self.finish(&[RefreshKey::ArticlesCached]).await;
        Ok(RefreshOutcome::Updated {
            fetched: articles.len(),
        })
    }

    // ========================================================================
    // Write-back
    // ========================================================================

    pub async fn set_article_read(&self, ids: &[i64], read: bool) -> Result<(), SyncError> {
        self.set_mark(ids, MarkKind::Read, read).await
    }

    pub async fn set_article_starred(&self, ids: &[i64], starred: bool) -> Result<(), SyncError> {
        self.set_mark(ids, MarkKind::Starred, starred).await
    }

    pub async fn set_article_published(&self, ids: &[i64], published: bool) -> Result<(), SyncError> {
        self.set_mark(ids, MarkKind::Published, published).await
    }

    /// Apply locally, then remotely; a failed remote write is queued, never returned.
    async fn set_mark(&self, ids: &[i64], kind: MarkKind, on: bool) -> Result<(), SyncError> {
        if ids.is_empty() {
            return Ok(());
        }
        let db = &self.ctx.db;
        db.set_articles_flag(ids, kind, on).await?;

        if self.is_connected(false) && self.ctx.api.mark(ids, kind, on).await {
            db.discard_pending(ids, kind).await?;
        } else {
            tracing::warn!(kind = kind.as_str(), count = ids.len(), "Remote write failed, queued for later");
            db.queue_pending(ids, kind, on).await?;
        }
        Ok(())
    }

    /// Mark a whole scope read locally and on the server.
    pub async fn mark_scope_read(&self, scope: ScopeId) -> Result<(), SyncError> {
        let db = &self.ctx.db;
        let changed = db.mark_scope_read(scope).await?;

        if self.is_connected(false) && self.ctx.api.catchup(scope).await {
            db.discard_pending(&changed, MarkKind::Read).await?;
        } else if !changed.is_empty() {
            tracing::warn!(scope = %scope, count = changed.len(), "Catch-up failed, queued read marks");
            db.queue_pending(&changed, MarkKind::Read, true).await?;
        }
        Ok(())
    }

    pub async fn set_article_note(&self, id: i64, note: &str) -> Result<(), SyncError> {
        let db = &self.ctx.db;
        if !db.set_article_note(id, note).await? {
            tracing::debug!(article_id = id, "Note for unknown article ignored");
            return Ok(());
        }

        if self.is_connected(false) && self.ctx.api.mark_note(&[id], note).await {
            db.discard_pending(&[id], MarkKind::Note).await?;
        } else {
            tracing::warn!(article_id = id, "Remote note update failed, queued for later");
            db.queue_pending_note(id, note).await?;
        }
        Ok(())
    }

    /// Send the labels the user toggled on an article.
    ///
    /// Labels have no pending-write kind; a failed remote update is logged and
    /// corrected by the next refresh.
    pub async fn set_article_labels(&self, article_id: i64, labels: &[Label]) -> Result<(), SyncError> {
        let online = self.is_connected(false);
        for label in labels.iter().filter(|l| l.changed) {
            self.ctx
                .db
                .set_article_label(article_id, label.id, label.checked)
                .await?;
            if online
                && !self
                    .ctx
                    .api
                    .set_article_label(&[article_id], label.id, label.checked)
                    .await
            {
                tracing::warn!(article_id = article_id, label_id = label.id, "Remote label update failed");
            }
        }
        Ok(())
    }

    // ========================================================================
    // Pending Writes
    // ========================================================================

    /// Replay queued offline edits; returns the number of confirmed entries.
    ///
    /// Entries are removed per request chunk, and only when the server
    /// accepted that chunk.
    pub async fn synchronize_status(&self) -> Result<usize, SyncError> {
        if !self.is_connected(false) {
            return Ok(0);
        }
        let db = &self.ctx.db;
        let api = &self.ctx.api;
        let mut replayed = 0usize;

        for kind in MarkKind::FLAGS {
            for value in [true, false] {
                let ids = db.pending_marks(kind, value).await?;
                for chunk in ids.chunks(MAX_IDS_PER_REQUEST) {
                    if api.mark(chunk, kind, value).await {
                        let cleared = db.clear_pending(chunk, kind, value).await?;
                        replayed += usize::try_from(cleared).unwrap_or(0);
                    }
                }
            }
        }

        for (id, note) in db.pending_notes().await? {
            if api.mark_note(&[id], &note).await && db.clear_pending_note(id, &note).await? {
                replayed += 1;
            }
        }

        let remaining = usize::try_from(db.pending_count().await?).unwrap_or(0);
        if replayed > 0 || remaining > 0 {
            tracing::info!(replayed = replayed, remaining = remaining, "Pending writes replayed");
        }
        self.ctx
            .notifier
            .send(Event::StatusSynchronized {
                replayed,
                remaining,
            })
            .await;
        Ok(replayed)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Delete articles of feeds that are gone, at most once per cleanup interval.
    pub async fn purge_orphaned_articles(&self) -> Result<u64, SyncError> {
        let db = &self.ctx.db;
        let now = chrono::Utc::now().timestamp();
        let interval = i64::try_from(self.settings.cleanup_interval.as_secs()).unwrap_or(i64::MAX);

        if let Some(last) = db.get_preference_i64(LAST_CLEANUP).await? {
            if now.saturating_sub(last) < interval {
                return Ok(0);
            }
        }

        let deleted = db.purge_orphaned_articles().await?;
        db.set_preference_i64(LAST_CLEANUP, now).await?;
        if deleted > 0 {
            tracing::info!(deleted = deleted, "Orphaned articles purged");
        }
        Ok(deleted)
    }

    /// Recompute every unread counter from the article flags.
    pub async fn recalculate_counters(&self) -> Result<(), SyncError> {
        self.ctx.db.recalculate_counters().await?;
        Ok(())
    }

    /// Fetch the server's fresh-article age limit; returns the stored hours.
    pub async fn update_fresh_max_age(&self) -> Result<Option<i64>, SyncError> {
        if !self.is_connected(false) {
            return Ok(None);
        }
        let value = self
            .ctx
            .api
            .get_server_preference(FRESH_ARTICLE_MAX_AGE)
            .await?;
        let hours = value.and_then(|v| v.trim().parse::<i64>().ok()).filter(|h| *h > 0);

        if let Some(hours) = hours {
            self.ctx.db.set_preference_i64(FRESH_MAX_AGE_HOURS, hours).await?;
        }
        Ok(hours)
    }
}
