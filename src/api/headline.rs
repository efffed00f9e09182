//! Streaming decode of `getHeadlines` records.
//!
//! Each record is decoded key by key. After a field is assigned the omission
//! filter is consulted; once it asks to omit the record, the remaining values
//! are skipped with [`IgnoredAny`] and never materialized.

use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use super::filter::ArticleFilter;
use crate::model::Article;
use crate::scope::label_internal_id;
use crate::util::{complete_media_urls, complete_scheme_relative};

// ============================================================================
// Field Table
// ============================================================================

/// Fields of a headline record understood by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArticleField {
    Id,
    Title,
    Unread,
    Updated,
    FeedId,
    Content,
    Link,
    Comments,
    Attachments,
    Marked,
    Published,
    Note,
    Score,
    Labels,
    /// Any key this client does not use
    Other,
}

impl ArticleField {
    fn from_name(name: &str) -> Self {
        match name {
            "id" => ArticleField::Id,
            "title" => ArticleField::Title,
            "unread" => ArticleField::Unread,
            "updated" => ArticleField::Updated,
            "feed_id" => ArticleField::FeedId,
            "content" => ArticleField::Content,
            "link" => ArticleField::Link,
            "comments" => ArticleField::Comments,
            "attachments" => ArticleField::Attachments,
            "marked" => ArticleField::Marked,
            "published" => ArticleField::Published,
            "note" => ArticleField::Note,
            "score" => ArticleField::Score,
            "labels" => ArticleField::Labels,
            _ => ArticleField::Other,
        }
    }

    /// Read the next value of `map` into the matching slot of `h`.
    ///
    /// Values of an unexpected type leave the slot empty instead of failing
    /// the whole response.
    fn assign<'de, A>(self, map: &mut A, h: &mut HeadlineBuilder) -> Result<(), A::Error>
    where
        A: MapAccess<'de>,
    {
        match self {
            ArticleField::Id => h.id = lenient_int(map.next_value()?),
            ArticleField::Title => h.title = lenient_string(map.next_value()?),
            ArticleField::Unread => h.unread = lenient_bool(map.next_value()?),
            ArticleField::Updated => h.updated = lenient_int(map.next_value()?),
            ArticleField::FeedId => h.feed_id = lenient_int(map.next_value()?),
            ArticleField::Content => {
                h.content = lenient_string(map.next_value()?).map(|c| complete_media_urls(&c));
            }
            ArticleField::Link => {
                h.link = lenient_string(map.next_value()?).map(|u| complete_scheme_relative(&u));
            }
            ArticleField::Comments => {
                h.comments = lenient_string(map.next_value()?)
                    .filter(|u| !u.is_empty())
                    .map(|u| complete_scheme_relative(&u));
            }
            ArticleField::Attachments => {
                h.attachments = parse_attachments(map.next_value()?);
            }
            ArticleField::Marked => h.marked = lenient_bool(map.next_value()?),
            ArticleField::Published => h.published = lenient_bool(map.next_value()?),
            ArticleField::Note => {
                h.note = lenient_string(map.next_value()?).filter(|n| !n.is_empty());
            }
            ArticleField::Score => h.score = lenient_int(map.next_value()?),
            ArticleField::Labels => {
                h.labels = parse_labels(map.next_value()?);
            }
            ArticleField::Other => {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(())
    }
}

impl<'de> Deserialize<'de> for ArticleField {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldVisitor;

        impl<'de> Visitor<'de> for FieldVisitor {
            type Value = ArticleField;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a headline field name")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ArticleField, E> {
                Ok(ArticleField::from_name(v))
            }
        }

        deserializer.deserialize_identifier(FieldVisitor)
    }
}

// ============================================================================
// Partially Decoded Record
// ============================================================================

/// A headline record under construction, as seen by omission filters.
#[derive(Debug, Default, Clone)]
pub struct HeadlineBuilder {
    pub(crate) id: Option<i64>,
    pub(crate) title: Option<String>,
    pub(crate) unread: Option<bool>,
    pub(crate) updated: Option<i64>,
    pub(crate) feed_id: Option<i64>,
    pub(crate) content: Option<String>,
    pub(crate) link: Option<String>,
    pub(crate) comments: Option<String>,
    pub(crate) attachments: Vec<String>,
    pub(crate) marked: Option<bool>,
    pub(crate) published: Option<bool>,
    pub(crate) note: Option<String>,
    pub(crate) score: Option<i64>,
    pub(crate) labels: Vec<(i64, String)>,
}

impl HeadlineBuilder {
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn updated(&self) -> Option<i64> {
        self.updated
    }

    pub fn unread(&self) -> Option<bool> {
        self.unread
    }

    /// Finish the record; records without an id or title are dropped.
    pub(crate) fn build(self) -> Option<Article> {
        let id = self.id?;
        let title = self.title?;
        Some(Article {
            id,
            feed_id: self.feed_id.unwrap_or(0),
            title,
            content: self.content.unwrap_or_default(),
            url: self.link.filter(|l| !l.is_empty()),
            comment_url: self.comments,
            attachments: self.attachments,
            unread: self.unread.unwrap_or(false),
            starred: self.marked.unwrap_or(false),
            published: self.published.unwrap_or(false),
            note: self.note,
            updated: self.updated.unwrap_or(0),
            score: self.score,
            labels: self.labels,
        })
    }
}

fn parse_attachments(value: Value) -> Vec<String> {
    let Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| item.get("content_url")?.as_str())
        .filter(|url| !url.is_empty())
        .map(complete_scheme_relative)
        .collect()
}

/// Labels arrive as `[[id, caption, fg_color, bg_color], ...]` with protocol ids.
fn parse_labels(value: Value) -> Vec<(i64, String)> {
    let Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let fields = item.as_array()?;
            let wire_id = match fields.first()? {
                Value::Number(n) => n.as_i64()?,
                Value::String(s) => s.parse().ok()?,
                _ => return None,
            };
            let caption = fields.get(1)?.as_str()?.to_string();
            Some((label_internal_id(wire_id), caption))
        })
        .collect()
}

// ============================================================================
// Seeds
// ============================================================================

/// Decodes a headline array, merging kept records into `into`.
///
/// The deserialized value is the number of records consumed, omitted ones included.
pub(crate) struct HeadlinesSeed<'a, 'f> {
    pub filter: Option<&'a mut (dyn ArticleFilter + 'f)>,
    pub into: &'a mut HashMap<i64, Article>,
}

impl<'de> DeserializeSeed<'de> for HeadlinesSeed<'_, '_> {
    type Value = usize;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<usize, D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for HeadlinesSeed<'_, '_> {
    type Value = usize;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array of headlines")
    }

    fn visit_seq<S: SeqAccess<'de>>(self, mut seq: S) -> Result<usize, S::Error> {
        let HeadlinesSeed { mut filter, into } = self;
        let mut count = 0;

        while let Some(record) = seq.next_element_seed(RecordSeed {
            filter: filter.as_deref_mut(),
        })? {
            count += 1;
            if let Some(article) = record.and_then(HeadlineBuilder::build) {
                into.insert(article.id, article);
            }
        }

        Ok(count)
    }
}

/// Decodes one record; yields `None` when the filter omitted it.
struct RecordSeed<'a, 'f> {
    filter: Option<&'a mut (dyn ArticleFilter + 'f)>,
}

impl<'de> DeserializeSeed<'de> for RecordSeed<'_, '_> {
    type Value = Option<HeadlineBuilder>;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for RecordSeed<'_, '_> {
    type Value = Option<HeadlineBuilder>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a headline object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut filter = self.filter;
        let mut builder = HeadlineBuilder::default();
        let mut omitted = false;

        while let Some(field) = map.next_key::<ArticleField>()? {
            if omitted {
                map.next_value::<IgnoredAny>()?;
                continue;
            }
            field.assign(&mut map, &mut builder)?;
            if field == ArticleField::Other {
                continue;
            }
            if let Some(f) = filter.as_deref_mut() {
                omitted = f.should_omit(field, &builder);
            }
        }

        Ok((!omitted).then_some(builder))
    }
}

// ============================================================================
// Lenient Scalars
// ============================================================================

/// Integer given as a number or numeric string.
fn lenient_int(value: Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Boolean given as a bool, a number, or a string.
fn lenient_bool(value: Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim() {
            "true" | "t" | "1" => Some(true),
            "false" | "f" | "0" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// String, with numbers stringified and null treated as absent.
fn lenient_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Decode a headline array from raw JSON text.
pub(crate) fn decode_headlines(
    json: &str,
    filter: Option<&mut (dyn ArticleFilter + '_)>,
    into: &mut HashMap<i64, Article>,
) -> Result<usize, serde_json::Error> {
    let mut de = serde_json::Deserializer::from_str(json);
    let count = HeadlinesSeed { filter, into }.deserialize(&mut de)?;
    de.end()?;
    Ok(count)
}
