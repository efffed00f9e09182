//! Decode-time omission filters.
//!
//! A filter is consulted after every known field of a headline record is
//! assigned. Returning `true` drops the record: the rest of its fields are
//! skipped and its id is remembered in [`ArticleFilter::omitted_ids`].

use std::collections::{HashMap, HashSet};

use super::headline::{ArticleField, HeadlineBuilder};

pub trait ArticleFilter: Send {
    /// Decide whether the record being decoded should be dropped.
    ///
    /// `field` is the field that was just assigned. Fields may arrive in any
    /// order, so implementations must wait until everything they need is set.
    fn should_omit(&mut self, field: ArticleField, article: &HeadlineBuilder) -> bool;

    /// Ids of every record omitted so far.
    fn omitted_ids(&self) -> &HashSet<i64>;
}

/// Omits records that decode as unread, and optionally anything not newer
/// than a cutoff timestamp.
///
/// Used for the "all articles" pass: unread articles are fetched in full by a
/// separate unread-view pass, so this one only needs the read ones.
#[derive(Debug, Default)]
pub struct UnreadFilter {
    cutoff: Option<i64>,
    omitted: HashSet<i64>,
}

impl UnreadFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also omit records whose `updated` is at or below `cutoff` (unix seconds).
    pub fn with_cutoff(cutoff: i64) -> Self {
        Self {
            cutoff: Some(cutoff),
            omitted: HashSet::new(),
        }
    }
}

impl ArticleFilter for UnreadFilter {
    fn should_omit(&mut self, field: ArticleField, article: &HeadlineBuilder) -> bool {
        let relevant = matches!(
            field,
            ArticleField::Id | ArticleField::Unread | ArticleField::Updated
        );
        let Some(id) = article.id().filter(|_| relevant) else {
            return false;
        };

        let unread = article.unread() == Some(true);
        let stale = matches!(
            (self.cutoff, article.updated()),
            (Some(cutoff), Some(updated)) if updated <= cutoff
        );

        if unread || stale {
            self.omitted.insert(id);
            true
        } else {
            false
        }
    }

    fn omitted_ids(&self) -> &HashSet<i64> {
        &self.omitted
    }
}

/// Omits records the store already holds at the same or a newer revision.
///
/// The snapshot maps article id to the `updated` timestamp stored locally.
#[derive(Debug, Default)]
pub struct IdUpdatedFilter {
    snapshot: HashMap<i64, i64>,
    omitted: HashSet<i64>,
}

impl IdUpdatedFilter {
    pub fn new(snapshot: HashMap<i64, i64>) -> Self {
        Self {
            snapshot,
            omitted: HashSet::new(),
        }
    }
}

impl ArticleFilter for IdUpdatedFilter {
    fn should_omit(&mut self, field: ArticleField, article: &HeadlineBuilder) -> bool {
        if !matches!(field, ArticleField::Id | ArticleField::Updated) {
            return false;
        }
        let (Some(id), Some(updated)) = (article.id(), article.updated()) else {
            return false;
        };
        if id <= 0 {
            return false;
        }

        match self.snapshot.get(&id) {
            Some(&known) if updated <= known => {
                self.omitted.insert(id);
                true
            }
            _ => false,
        }
    }

    fn omitted_ids(&self) -> &HashSet<i64> {
        &self.omitted
    }
}
