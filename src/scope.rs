//! Article scopes: the set of articles an operation targets.
//!
//! The remote protocol overloads a single integer id space (plus an `is_cat`
//! flag) for feeds, categories, virtual categories and labels. Inside the crate
//! every scope is a [`ScopeId`]; the integer form only exists at the protocol
//! boundary via [`ScopeId::to_wire`] and [`ScopeId::from_wire`].

use std::fmt;

/// Wire id of the "all articles" virtual feed
const WIRE_ALL_ARTICLES: i64 = -4;
/// Wire id of the "fresh articles" virtual feed
const WIRE_FRESH: i64 = -3;
/// Wire id of the "published articles" virtual feed
const WIRE_PUBLISHED: i64 = -2;
/// Wire id of the "starred articles" virtual feed
const WIRE_STARRED: i64 = -1;
/// Wire id of the uncategorized category
const WIRE_UNCATEGORIZED: i64 = 0;
/// Labels occupy every wire id at or below this value
pub const LABEL_BASE: i64 = -11;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeId {
    AllArticles,
    Fresh,
    Starred,
    Published,
    Uncategorized,
    Category(i64),
    Feed(i64),
    /// Label by its internal (non-negative) id
    Label(i64),
}

impl ScopeId {
    /// Encode as `(id, is_cat)` for the remote protocol.
    pub fn to_wire(self) -> (i64, bool) {
        match self {
            ScopeId::AllArticles => (WIRE_ALL_ARTICLES, false),
            ScopeId::Fresh => (WIRE_FRESH, false),
            ScopeId::Starred => (WIRE_STARRED, false),
            ScopeId::Published => (WIRE_PUBLISHED, false),
            ScopeId::Uncategorized => (WIRE_UNCATEGORIZED, true),
            ScopeId::Category(id) => (id, true),
            ScopeId::Feed(id) => (id, false),
            ScopeId::Label(id) => (label_wire_id(id), false),
        }
    }

    /// Decode a protocol `(id, is_cat)` pair.
    ///
    /// Returns `None` for the reserved ids between the virtual feeds and the
    /// label range (-5 through -10), which carry no meaning for this client.
    pub fn from_wire(id: i64, is_cat: bool) -> Option<Self> {
        match id {
            WIRE_ALL_ARTICLES => Some(ScopeId::AllArticles),
            WIRE_FRESH => Some(ScopeId::Fresh),
            WIRE_PUBLISHED => Some(ScopeId::Published),
            WIRE_STARRED => Some(ScopeId::Starred),
            WIRE_UNCATEGORIZED if is_cat => Some(ScopeId::Uncategorized),
            WIRE_UNCATEGORIZED => Some(ScopeId::Feed(0)),
            n if n > 0 && is_cat => Some(ScopeId::Category(n)),
            n if n > 0 => Some(ScopeId::Feed(n)),
            n if n <= LABEL_BASE && !is_cat => Some(ScopeId::Label(label_internal_id(n))),
            _ => None,
        }
    }

    /// Starred and Published are tracked independently of the bulk article cache.
    pub fn is_marked(self) -> bool {
        matches!(self, ScopeId::Starred | ScopeId::Published)
    }

    pub fn is_category(self) -> bool {
        self.to_wire().1
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeId::AllArticles => write!(f, "all"),
            ScopeId::Fresh => write!(f, "fresh"),
            ScopeId::Starred => write!(f, "starred"),
            ScopeId::Published => write!(f, "published"),
            ScopeId::Uncategorized => write!(f, "uncategorized"),
            ScopeId::Category(id) => write!(f, "category:{id}"),
            ScopeId::Feed(id) => write!(f, "feed:{id}"),
            ScopeId::Label(id) => write!(f, "label:{id}"),
        }
    }
}

/// `-11 - internal`
pub fn label_wire_id(internal: i64) -> i64 {
    LABEL_BASE - internal
}

/// Inverse of [`label_wire_id`].
pub fn label_internal_id(wire: i64) -> i64 {
    LABEL_BASE - wire
}
