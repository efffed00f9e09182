use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// What one article task produced, accumulated locally and merged once.
#[derive(Debug, Default)]
pub struct ArticleResult {
    pub article_id: i64,
    /// Every candidate URL of the article
    pub urls: Vec<String>,
    /// Files now on disk, with their sizes
    pub files: Vec<(String, u64)>,
    /// URLs claimed by this task, released on merge
    pub claimed: Vec<String>,
    pub downloaded: usize,
    pub downloaded_bytes: u64,
    /// Every candidate was tried; incomplete articles are rescanned next run
    pub complete: bool,
}

#[derive(Debug, Default)]
struct IndexState {
    /// URL to size of every file known to be on disk
    files: HashMap<String, u64>,
    /// Files found or downloaded during this run
    touched: HashSet<String>,
    in_flight: HashSet<String>,
    article_files: HashMap<i64, Vec<String>>,
    downloaded: usize,
    downloaded_bytes: u64,
}

/// Cache bookkeeping shared by the download workers.
///
/// The lock is only taken for constant-time lookups and for one merge per
/// finished article, never across I/O.
#[derive(Debug, Default)]
pub struct CacheIndex {
    state: Mutex<IndexState>,
}

/// Merged results of a run, ready to be written to the store.
#[derive(Debug, Default, PartialEq)]
pub struct IndexSnapshot {
    /// Files to record: those downloaded or referenced during this run
    pub files: HashMap<String, u64>,
    /// Processed articles and the cached URLs they reference
    pub article_files: HashMap<i64, Vec<String>>,
    pub downloaded: usize,
    pub downloaded_bytes: u64,
}

impl CacheIndex {
    /// Start from the files the store already lists as cached.
    pub fn new(known: HashMap<String, u64>) -> Self {
        Self {
            state: Mutex::new(IndexState {
                files: known,
                ..IndexState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_cached(&self, url: &str) -> bool {
        self.state().files.contains_key(url)
    }

    /// Reserve `url` for download.
    ///
    /// Fails when it is already cached or another task holds it.
    pub fn claim(&self, url: &str) -> bool {
        let mut state = self.state();
        if state.files.contains_key(url) || state.in_flight.contains(url) {
            return false;
        }
        state.in_flight.insert(url.to_string())
    }

    /// Merge one article's results.
    pub fn merge(&self, result: ArticleResult) {
        let mut state = self.state();
        for url in &result.claimed {
            state.in_flight.remove(url);
        }
        for (url, len) in result.files {
            state.touched.insert(url.clone());
            state.files.insert(url, len);
        }
        if result.complete {
            state.article_files.insert(result.article_id, result.urls);
        }
        state.downloaded += result.downloaded;
        state.downloaded_bytes = state.downloaded_bytes.saturating_add(result.downloaded_bytes);
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.state().downloaded_bytes
    }

    /// Consume the index once every task has merged.
    ///
    /// Article URLs are narrowed to cached files; files referenced by a
    /// processed article are included so their links and access times are
    /// recorded too.
    pub fn into_snapshot(self) -> IndexSnapshot {
        let state = self.state.into_inner().unwrap_or_else(PoisonError::into_inner);
        let mut snapshot = IndexSnapshot {
            downloaded: state.downloaded,
            downloaded_bytes: state.downloaded_bytes,
            ..IndexSnapshot::default()
        };

        for (article_id, urls) in state.article_files {
            let cached: Vec<String> = urls
                .into_iter()
                .filter(|url| state.files.contains_key(url))
                .collect();
            for url in &cached {
                if let Some(len) = state.files.get(url) {
                    snapshot.files.insert(url.clone(), *len);
                }
            }
            snapshot.article_files.insert(article_id, cached);
        }
        for url in state.touched {
            if let Some(len) = state.files.get(&url) {
                snapshot.files.insert(url, *len);
            }
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_claim_skips_cached_and_in_flight() {
        let index = CacheIndex::new(HashMap::from([("https://a/old".to_string(), 5)]));
        assert!(index.is_cached("https://a/old"));
        assert!(!index.claim("https://a/old"));
        assert!(index.claim("https://a/new"));
        assert!(!index.claim("https://a/new"));

        index.merge(ArticleResult {
            article_id: 1,
            claimed: vec!["https://a/new".to_string()],
            ..ArticleResult::default()
        });
        // Released without a file, so another task may try again
        assert!(index.claim("https://a/new"));
    }

    #[test]
    fn test_snapshot_links_articles_to_cached_files() {
        let index = CacheIndex::new(HashMap::from([
            ("https://a/old".to_string(), 5),
            ("https://a/unrelated".to_string(), 9),
        ]));
        index.merge(ArticleResult {
            article_id: 1,
            urls: vec![
                "https://a/old".to_string(),
                "https://a/new".to_string(),
                "https://a/failed".to_string(),
            ],
            files: vec![("https://a/new".to_string(), 20)],
            claimed: vec!["https://a/new".to_string(), "https://a/failed".to_string()],
            downloaded: 1,
            downloaded_bytes: 20,
            complete: true,
        });
        assert_eq!(index.downloaded_bytes(), 20);

        let snapshot = index.into_snapshot();
        assert_eq!(
            snapshot,
            IndexSnapshot {
                files: HashMap::from([
                    ("https://a/old".to_string(), 5),
                    ("https://a/new".to_string(), 20),
                ]),
                article_files: HashMap::from([(
                    1,
                    vec!["https://a/old".to_string(), "https://a/new".to_string()]
                )]),
                downloaded: 1,
                downloaded_bytes: 20,
            }
        );
    }
}
