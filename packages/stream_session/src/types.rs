use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sources;

/// Canonical base name of the "no product selected" collection.
pub const NONE_COLLECTION: &str = "none";

/// Identifier of one streaming session, unique within a registry.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// One user submission. Built fresh for every submit; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub content: String,
    pub collection: String,
    pub collection_full_name: String,
    pub version: String,
    pub language: String,
    pub timestamp: DateTime<Utc>,
}

impl Query {
    /// A query with no collection context, stamped now.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            collection: String::new(),
            collection_full_name: String::new(),
            version: String::new(),
            language: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// A citation and its similarity distance. Lower scores are better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    #[serde(rename = "source")]
    pub identity: String,
    pub score: f64,
}

impl Source {
    pub fn new(identity: impl Into<String>, score: f64) -> Self {
        Self {
            identity: identity.into(),
            score,
        }
    }

    pub fn is_link(&self) -> bool {
        self.identity.starts_with("http")
    }
}

/// A (possibly partial) streamed answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub tokens: Vec<String>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_token_at: Option<DateTime<Utc>>,
}

impl Answer {
    /// A complete, locally generated answer (greeting, notices, context changes).
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            tokens: vec![text.into()],
            sources: Vec::new(),
            first_token_at: None,
        }
    }

    pub fn text(&self) -> String {
        self.tokens.concat()
    }

    /// True when the fragments join to the empty string.
    pub fn is_empty(&self) -> bool {
        self.tokens.iter().all(|t| t.is_empty())
    }

    pub fn push_token(&mut self, token: impl Into<String>, at: DateTime<Utc>) {
        if self.first_token_at.is_none() {
            self.first_token_at = Some(at);
        }
        self.tokens.push(token.into());
    }

    pub fn merge_source(&mut self, identity: &str, score: f64) {
        self.sources = sources::merge(&self.sources, identity, score);
    }

    pub fn score_of(&self, identity: &str) -> Option<f64> {
        self.sources
            .iter()
            .find(|s| s.identity == identity)
            .map(|s| s.score)
    }

    /// Sources ordered best (lowest score) first.
    pub fn sources_by_score(&self) -> Vec<&Source> {
        let mut sorted: Vec<&Source> = self.sources.iter().collect();
        sorted.sort_by(|a, b| a.score.total_cmp(&b.score));
        sorted
    }
}

/// One entry of a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageEntry {
    Query(Query),
    Answer(Answer),
}

impl MessageEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            MessageEntry::Query(_) => "Query",
            MessageEntry::Answer(_) => "Answer",
        }
    }

    pub fn text(&self) -> String {
        match self {
            MessageEntry::Query(q) => q.content.clone(),
            MessageEntry::Answer(a) => a.text(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            MessageEntry::Query(q) => q.is_empty(),
            MessageEntry::Answer(a) => a.is_empty(),
        }
    }
}

/// Append-only conversation log of one session.
///
/// Mutation is restricted to this crate: entries can be appended, or the whole
/// log replaced by a single greeting on reset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    entries: Vec<MessageEntry>,
}

impl History {
    pub fn with_greeting(greeting: Answer) -> Self {
        Self {
            entries: vec![MessageEntry::Answer(greeting)],
        }
    }

    pub fn entries(&self) -> &[MessageEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MessageEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&MessageEntry> {
        self.entries.last()
    }

    /// Most recently committed query, if any.
    pub fn last_query(&self) -> Option<&Query> {
        self.entries.iter().rev().find_map(|e| match e {
            MessageEntry::Query(q) => Some(q),
            MessageEntry::Answer(_) => None,
        })
    }

    pub(crate) fn append(&mut self, entry: MessageEntry) {
        self.entries.push(entry);
    }

    pub(crate) fn reset(&mut self, greeting: Answer) {
        self.entries = vec![MessageEntry::Answer(greeting)];
    }
}

impl<'a> IntoIterator for &'a History {
    type Item = &'a MessageEntry;
    type IntoIter = std::slice::Iter<'a, MessageEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// A documentation version, as listed by the catalog endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionVersion {
    pub version_number: String,
}

/// A product collection, as listed by the catalog endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub collection_base_name: String,
    pub collection_full_name: String,
    #[serde(default)]
    pub versions: Vec<CollectionVersion>,
    #[serde(default)]
    pub language: String,
}

impl Collection {
    /// The sentinel used before a product is chosen.
    pub fn none() -> Self {
        Self {
            collection_base_name: NONE_COLLECTION.to_string(),
            collection_full_name: "None".to_string(),
            versions: Vec::new(),
            language: String::new(),
        }
    }

    pub fn is_none(&self) -> bool {
        self.collection_base_name == NONE_COLLECTION
    }

    pub fn first_version(&self) -> Option<&str> {
        self.versions.first().map(|v| v.version_number.as_str())
    }

    pub fn has_version(&self, version: &str) -> bool {
        self.versions.iter().any(|v| v.version_number == version)
    }

    /// Vector-store collection name for a version: `<base>_<version>` with
    /// `.` and `-` folded to `_`.
    pub fn collection_id(&self, version: &str) -> String {
        if self.is_none() {
            return NONE_COLLECTION.to_string();
        }
        format!("{}_{}", self.collection_base_name, version).replace(['.', '-'], "_")
    }
}

/// An answering model, as listed by the model endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
}
