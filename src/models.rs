//! Core data models used throughout Marginalia.
//!
//! Books own annotations; a book's `user_id` is the visibility boundary for
//! every read the retrieval core performs.

use serde::Serialize;
use std::fmt;

/// A resolved, non-blank user identifier.
///
/// The only way to obtain one is [`UserId::parse`], so the search engine and
/// feed paginator cannot be called without an authenticated scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A book owned by a single user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub author: String,
    pub created_at: i64,
}

/// Fields supplied when recording a new annotation.
#[derive(Debug, Clone, Default)]
pub struct NewAnnotation {
    pub book_id: String,
    pub transcript: String,
    pub audio_url: Option<String>,
    pub image_url: Option<String>,
    pub page_number: Option<String>,
    pub location: Option<String>,
    pub footnotes: Option<String>,
}

/// A stored annotation as seen by the write path.
#[derive(Debug, Clone)]
pub struct Annotation {
    pub id: String,
    pub book_id: String,
    pub transcript: String,
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    pub audio_url: Option<String>,
    pub image_url: Option<String>,
    pub page_number: Option<String>,
    pub location: Option<String>,
    pub footnotes: Option<String>,
    pub created_at: i64,
}

/// One search result row.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    pub transcript: String,
    pub book_id: String,
    pub book_title: String,
    pub book_author: String,
    /// ISO 8601.
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explain: Option<FusionExplanation>,
}

/// How a hit's final score was produced.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FusionExplanation {
    pub score: f64,
    /// 1-based position in the full-text candidate set, if present there.
    pub fts_rank: Option<usize>,
    /// 1-based position in the vector candidate set, if present there.
    pub vector_rank: Option<usize>,
    /// Cosine distance to the query embedding, if the hit was a vector candidate.
    pub distance: Option<f64>,
}

/// One feed row.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub id: String,
    pub transcript: String,
    pub audio_url: Option<String>,
    pub image_url: Option<String>,
    pub page_number: Option<String>,
    pub location: Option<String>,
    /// ISO 8601.
    pub created_at: String,
    pub book_id: String,
    pub book_title: String,
    pub book_author: String,
}

/// A page of the seeded feed.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    pub items: Vec<FeedItem>,
    pub has_more: bool,
    pub next_offset: Option<i64>,
    pub seed: String,
}

/// Format a Unix timestamp as ISO 8601.
pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
