use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

use super::download::{
    build_client, download_file, fetch_bytes, DownloadError, DownloadOutcome, SizeLimits,
};
use super::index::{ArticleResult, CacheIndex};
use super::store::FileStore;
use super::urls::candidate_urls;
use crate::events::Event;
use crate::model::Article;
use crate::network::NetworkClass;
use crate::scope::ScopeId;
use crate::storage::preferences::LAST_PURGE;
use crate::sync::{SyncError, Synchronizer};
use crate::util::{validate_url, HostPolicy};

/// Unread articles scanned for media per run
const MAX_ARTICLES_PER_RUN: i64 = 1000;
/// Articles between two progress notifications
const PROGRESS_EVERY: usize = 10;
/// Accepted feed icon sizes
const ICON_LIMITS: SizeLimits = SizeLimits {
    min: 1,
    max: 256 * 1024,
};

/// Shared stop request for a running cache pass.
///
/// Clones share the flag. Workers poll it between files and every few
/// chunks; a write in progress is never cut short.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Per-deployment cache settings.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub dir: PathBuf,
    /// Byte budget for all cached files
    pub max_size: u64,
    pub limits: SizeLimits,
    /// Concurrent article tasks
    pub workers: usize,
    /// Upper bound on the download phase; outstanding tasks are then told to stop
    pub max_wait: Duration,
    pub hosts: HostPolicy,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    /// Directory serving `<feed id>.ico`; no icons are fetched when unset
    pub icons_url: Option<Url>,
}

impl CacheSettings {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_size: 80 * 1024 * 1024,
            limits: SizeLimits {
                min: 1024,
                max: 6 * 1024 * 1024,
            },
            workers: 6,
            max_wait: Duration::from_secs(30 * 60),
            hosts: HostPolicy::PublicOnly,
            connect_timeout: Duration::from_secs(8),
            read_timeout: Duration::from_secs(10),
            icons_url: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CachePhase {
    #[default]
    Start,
    UpdatingMetadata,
    DownloadingImages,
    PurgingCache,
    End,
    Interrupted,
}

/// Summary of a cache run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheReport {
    /// Last phase reached
    pub phase: CachePhase,
    pub articles_scanned: usize,
    pub files_downloaded: usize,
    pub bytes_downloaded: u64,
    pub files_evicted: usize,
    pub bytes_evicted: u64,
}

/// Runs the sync-then-download-then-purge pipeline.
pub struct CacheEngine {
    sync: Arc<Synchronizer>,
    settings: CacheSettings,
    store: FileStore,
    client: reqwest::Client,
    cancel: CancelFlag,
}

impl CacheEngine {
    pub fn new(sync: Arc<Synchronizer>, settings: CacheSettings) -> Result<Self, DownloadError> {
        let client = build_client(settings.hosts, settings.connect_timeout, settings.read_timeout)?;
        let store = FileStore::new(settings.dir.clone());
        Ok(Self {
            sync,
            settings,
            store,
            client,
            cancel: CancelFlag::new(),
        })
    }

    /// Handle for stopping a run from another task.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// Stop requested, or the network got worse than when the run started.
    fn should_stop(&self, started_on: NetworkClass) -> bool {
        if self.cancel.is_cancelled() {
            return true;
        }
        let current = self.sync.context().network.current();
        if current < started_on {
            tracing::info!(started_on = ?started_on, current = ?current, "Network downgraded, stopping cache run");
            return true;
        }
        false
    }

    /// One full cache pass.
    ///
    /// With `only_articles` the pass ends after the metadata phase. Transient
    /// failures of a metadata step are logged and the next step runs;
    /// authentication, protocol and storage errors end the pass.
    ///
    /// A cancel requested before the pass starts interrupts it right away.
    /// The flag is cleared once the pass returns.
    pub async fn run(&self, only_articles: bool) -> Result<CacheReport, SyncError> {
        let result = self.run_phases(only_articles).await;
        self.cancel.reset();
        result
    }

    async fn run_phases(&self, only_articles: bool) -> Result<CacheReport, SyncError> {
        let started = Instant::now();
        let ctx = self.sync.context();
        let mut report = CacheReport::default();

        let started_on = ctx.network.current();
        ctx.notifier.send(Event::CacheStarted).await;
        tracing::info!(network = ?started_on, only_articles = only_articles, "Cache run started");

        if self.cancel.is_cancelled() || !self.sync.is_connected(false) {
            return Ok(self.interrupt(report).await);
        }

        report.phase = CachePhase::UpdatingMetadata;
        if let Err(e) = self.update_metadata(started_on).await {
            tracing::warn!(error = %e, "Cache run aborted during metadata update");
            report.phase = CachePhase::Interrupted;
            ctx.notifier.send(Event::CacheInterrupted(report)).await;
            return Err(e);
        }
        if self.should_stop(started_on) {
            return Ok(self.interrupt(report).await);
        }

        if !only_articles {
            report.phase = CachePhase::DownloadingImages;
            let completed = self.download_images(started_on, &mut report).await?;
            if !completed {
                return Ok(self.interrupt(report).await);
            }

            report.phase = CachePhase::PurgingCache;
            self.purge(&mut report).await?;
        }

        report.phase = CachePhase::End;
        tracing::info!(
            articles = report.articles_scanned,
            downloaded = report.files_downloaded,
            bytes = report.bytes_downloaded,
            evicted = report.files_evicted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Cache run finished"
        );
        ctx.notifier.send(Event::CacheFinished(report.clone())).await;
        Ok(report)
    }

    async fn interrupt(&self, mut report: CacheReport) -> CacheReport {
        tracing::info!(phase = ?report.phase, "Cache run interrupted");
        report.phase = CachePhase::Interrupted;
        self.sync
            .context()
            .notifier
            .send(Event::CacheInterrupted(report.clone()))
            .await;
        report
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Keep going after transient failures, stop on anything else.
    fn tolerate<T>(step: &str, result: Result<T, SyncError>) -> Result<(), SyncError> {
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_transient() => {
                tracing::warn!(step = step, error = %e, "Cache step failed, continuing");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn update_metadata(&self, started_on: NetworkClass) -> Result<(), SyncError> {
        let sync = &self.sync;

        Self::tolerate("synchronize_status", sync.synchronize_status().await)?;
        Self::tolerate("categories", sync.update_categories(false, true).await)?;
        Self::tolerate("feeds", sync.update_feeds(false, true).await)?;
        self.update_feed_icons(started_on).await?;
        Self::tolerate("fresh_max_age", sync.update_fresh_max_age().await)?;
        if self.should_stop(started_on) {
            return Ok(());
        }

        Self::tolerate("articles", sync.cache_articles(false, true).await)?;

        // Label membership is not part of the bulk pass
        for label in sync.context().db.labels_with_unread().await? {
            if self.should_stop(started_on) {
                return Ok(());
            }
            Self::tolerate(
                "labels",
                sync.refresh(ScopeId::Label(label.id), false, false, true).await,
            )?;
        }

        sync.recalculate_counters().await?;
        sync.purge_orphaned_articles().await?;
        Ok(())
    }

    /// Fetch icons of feeds that have none stored yet.
    ///
    /// A missing or oversized icon is skipped and asked for again next run.
    async fn update_feed_icons(&self, started_on: NetworkClass) -> Result<(), SyncError> {
        let Some(base) = &self.settings.icons_url else {
            return Ok(());
        };
        let db = &self.sync.context().db;
        let mut stored = 0;

        for feed_id in db.feeds_without_icon().await? {
            if self.should_stop(started_on) {
                break;
            }
            let Ok(url) = base.join(&format!("{feed_id}.ico")) else {
                continue;
            };
            match fetch_bytes(&self.client, url.as_str(), ICON_LIMITS).await {
                Ok(Some(icon)) => {
                    db.set_feed_icon(feed_id, &icon).await?;
                    stored += 1;
                }
                Ok(None) => tracing::debug!(feed_id = feed_id, "Feed icon size out of range"),
                Err(e) => tracing::debug!(feed_id = feed_id, error = %e, "Feed icon not fetched"),
            }
        }

        if stored > 0 {
            tracing::debug!(icons = stored, "Feed icons stored");
        }
        Ok(())
    }

    // ========================================================================
    // Downloads
    // ========================================================================

    /// Download media of unprocessed articles; returns false if interrupted.
    async fn download_images(
        &self,
        started_on: NetworkClass,
        report: &mut CacheReport,
    ) -> Result<bool, SyncError> {
        let ctx = self.sync.context();
        self.store.ensure_dir().await?;

        let articles = ctx.db.articles_for_image_cache(MAX_ARTICLES_PER_RUN).await?;
        report.articles_scanned = articles.len();
        let total = articles.len();
        let index = CacheIndex::new(ctx.db.cached_file_index().await?);
        let completed = AtomicUsize::new(0);
        let stopped = AtomicBool::new(false);
        let budget = self.settings.max_size;

        {
            let index = &index;
            let completed = &completed;
            let stopped = &stopped;

            let work = stream::iter(articles)
                .map(|article| async move {
                    if stopped.load(Ordering::Relaxed) || self.should_stop(started_on) {
                        stopped.store(true, Ordering::Relaxed);
                        return;
                    }
                    if index.downloaded_bytes() > budget {
                        return;
                    }

                    let result = self.cache_article(&article, index).await;
                    index.merge(result);

                    let done = completed.fetch_add(1, Ordering::Relaxed).saturating_add(1);
                    if done % PROGRESS_EVERY == 0 || done == total {
                        ctx.notifier.send(Event::CacheProgress { done, total }).await;
                    }
                })
                .buffer_unordered(self.settings.workers.max(1))
                .collect::<Vec<()>>();
            tokio::pin!(work);

            tokio::select! {
                _ = &mut work => {}
                _ = tokio::time::sleep(self.settings.max_wait) => {
                    tracing::warn!(
                        wait_secs = self.settings.max_wait.as_secs(),
                        "Cache downloads exceeded the wait bound, stopping workers"
                    );
                    self.cancel.cancel();
                    stopped.store(true, Ordering::Relaxed);
                    work.await;
                }
            }
        }

        let snapshot = index.into_snapshot();
        report.files_downloaded = snapshot.downloaded;
        report.bytes_downloaded = snapshot.downloaded_bytes;
        ctx.db
            .record_cached_files(
                &snapshot.files,
                &snapshot.article_files,
                chrono::Utc::now().timestamp_millis(),
            )
            .await?;

        if snapshot.downloaded_bytes > budget {
            tracing::info!(bytes = snapshot.downloaded_bytes, budget = budget, "Download budget reached");
        }
        Ok(!stopped.load(Ordering::Relaxed) && !self.cancel.is_cancelled())
    }

    /// Download the media of one article, accumulating results locally.
    async fn cache_article(&self, article: &Article, index: &CacheIndex) -> ArticleResult {
        let urls = candidate_urls(article);
        let mut result = ArticleResult {
            article_id: article.id,
            complete: true,
            ..ArticleResult::default()
        };

        for url in &urls {
            if index.is_cached(url) {
                continue;
            }
            if let Err(e) = validate_url(url, self.settings.hosts) {
                tracing::debug!(article_id = article.id, url = %url, error = %e, "Media URL refused");
                continue;
            }
            if !index.claim(url) {
                continue;
            }
            result.claimed.push(url.clone());

            match download_file(&self.client, &self.store, url, self.settings.limits, &self.cancel)
                .await
            {
                Ok(DownloadOutcome::Existing(len)) => result.files.push((url.clone(), len)),
                Ok(DownloadOutcome::Downloaded(len)) => {
                    result.files.push((url.clone(), len));
                    result.downloaded += 1;
                    result.downloaded_bytes = result.downloaded_bytes.saturating_add(len);
                }
                Ok(DownloadOutcome::Rejected(reason)) => {
                    tracing::debug!(article_id = article.id, url = %url, reason = %reason, "Media file skipped");
                }
                Ok(DownloadOutcome::Cancelled) => {
                    result.complete = false;
                    break;
                }
                Err(e) => {
                    tracing::warn!(article_id = article.id, url = %url, error = %e, "Media download failed");
                }
            }
        }

        result.urls = urls;
        result
    }

    // ========================================================================
    // Eviction
    // ========================================================================

    /// Evict least recently accessed files until the cache fits the budget.
    async fn purge(&self, report: &mut CacheReport) -> Result<(), SyncError> {
        let db = &self.sync.context().db;
        let size = db.cached_files_size().await?;
        let budget = i64::try_from(self.settings.max_size).unwrap_or(i64::MAX);

        let mut evicted = Vec::new();
        for file in db.eviction_candidates(size - budget).await? {
            match self.store.remove(&file.url).await {
                Ok(()) => {
                    report.bytes_evicted = report
                        .bytes_evicted
                        .saturating_add(u64::try_from(file.length).unwrap_or(0));
                    evicted.push(file.id);
                }
                Err(e) => tracing::warn!(url = %file.url, error = %e, "Failed to evict cached file"),
            }
        }
        db.mark_files_uncached(&evicted).await?;
        db.set_preference_i64(LAST_PURGE, chrono::Utc::now().timestamp())
            .await?;

        report.files_evicted = evicted.len();
        if !evicted.is_empty() {
            tracing::info!(
                files = evicted.len(),
                bytes = report.bytes_evicted,
                before = size,
                budget = budget,
                "Cache purged"
            );
        }
        Ok(())
    }

    /// Delete every cached file and forget them in the store.
    pub async fn clear_cache(&self) -> anyhow::Result<u64> {
        let removed = self.store.clear().await?;
        self.sync.context().db.delete_all_remote_files().await?;
        tracing::info!(files = removed, "Cache cleared");
        Ok(removed)
    }

    /// Record that the reader opened an article, keeping its files from eviction longest.
    pub async fn touch_article(&self, article_id: i64) -> anyhow::Result<()> {
        self.sync
            .context()
            .db
            .touch_article_files(article_id, chrono::Utc::now().timestamp_millis())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        other.cancel();
        assert!(flag.is_cancelled());
        flag.reset();
        assert!(!other.is_cancelled());
    }

    #[test]
    fn test_default_settings() {
        let settings = CacheSettings::new("/tmp/cache");
        assert_eq!(settings.max_size, 80 * 1024 * 1024);
        assert_eq!(settings.limits, SizeLimits { min: 1024, max: 6 * 1024 * 1024 });
        assert_eq!(settings.hosts, HostPolicy::PublicOnly);
    }
}
