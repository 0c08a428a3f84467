//! Core data models.
//!
//! [`CandidateRecord`] is what the search and enrichment collaborators
//! produce; [`SearchResult`] is what the result store persists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw item produced by a search tool before validation.
///
/// Every field is optional because tool output is untrusted. The store
/// decides whether a candidate is usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub enriched_text: Option<String>,
    #[serde(default)]
    pub query: Option<String>,
}

impl CandidateRecord {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// True when the search service gave us nothing to show for this item.
    pub fn lacks_snippet(&self) -> bool {
        self.snippet.as_deref().map_or(true, |s| s.trim().is_empty())
    }
}

/// A deduplicated web item held by the result store.
///
/// Serialized as one object of the persisted JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enriched_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub retrieved_at: DateTime<Utc>,
}

impl SearchResult {
    /// Best available text for display: enrichment first, then the snippet.
    pub fn summary(&self) -> Option<&str> {
        self.enriched_text
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.snippet.as_deref().filter(|s| !s.trim().is_empty()))
    }
}
