//! Notifications for observers of the sync and cache passes.
//!
//! Every sync operation sends at most one event per call, after its results are
//! committed to the store. Cache runs report their lifecycle and download progress.

use tokio::sync::mpsc;

use crate::cache::CacheReport;
use crate::sync::RefreshKey;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A refresh completed and its results are committed.
    Refreshed(RefreshKey),
    /// Pending offline edits were replayed.
    ///
    /// Fields:
    /// - `replayed`: Entries confirmed by the server and removed from the queue
    /// - `remaining`: Entries still queued after the pass
    StatusSynchronized { replayed: usize, remaining: usize },
    CacheStarted,
    /// Image download progress as `(done, total)` articles.
    CacheProgress { done: usize, total: usize },
    CacheFinished(CacheReport),
    CacheInterrupted(CacheReport),
}

/// Optional event sink shared by the sync and cache layers.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<mpsc::Sender<Event>>,
}

impl Notifier {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A notifier that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub async fn send(&self, event: Event) {
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.send(event).await {
                tracing::debug!(event = ?e.0, "Event channel closed (receiver dropped)");
            }
        }
    }
}
