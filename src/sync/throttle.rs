use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::scope::ScopeId;

/// What a refresh timestamp is kept for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshKey {
    Categories,
    Feeds,
    Articles(ScopeId),
    /// The bulk "cache every article" pass
    ArticlesCached,
}

/// Last successful refresh per key.
///
/// Only successful passes are recorded, so a failed fetch is retried
/// without waiting for the interval.
#[derive(Debug)]
pub struct RefreshTimes {
    min_interval: Duration,
    last: HashMap<RefreshKey, Instant>,
}

impl RefreshTimes {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: HashMap::new(),
        }
    }

    fn recent(&self, key: RefreshKey, now: Instant) -> bool {
        self.last
            .get(&key)
            .is_some_and(|at| now.saturating_duration_since(*at) < self.min_interval)
    }

    /// Whether `key` may be refreshed now.
    ///
    /// Article scopes are also covered by a recent bulk pass, except
    /// Starred and Published which that pass does not fetch.
    pub fn is_due(&self, key: RefreshKey) -> bool {
        let now = Instant::now();
        if self.recent(key, now) {
            return false;
        }
        match key {
            RefreshKey::Articles(scope) if !scope.is_marked() => {
                !self.recent(RefreshKey::ArticlesCached, now)
            }
            _ => true,
        }
    }

    pub fn mark(&mut self, key: RefreshKey) {
        self.last.insert(key, Instant::now());
    }

    /// Forget every timestamp (after a reset or when the account changes).
    pub fn clear(&mut self) {
        self.last.clear();
    }
}
