//! Storage abstraction for Marginalia.
//!
//! The [`AnnotationStore`] trait defines every storage operation the
//! retrieval core and the write path need, so the search engine and feed
//! paginator can run against SQLite in production and against
//! [`memory::InMemoryStore`] in tests.
//!
//! Read operations take a [`UserId`] and must only ever see annotations
//! whose book belongs to that user. Candidate retrieval is pushed down to
//! the store; fusion and ordering happen in [`crate::search`] and
//! [`crate::feed`].
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::cmp::Ordering;

use crate::models::{Annotation, Book, FeedItem, SearchHit, UserId};

/// A full-text candidate. Higher `score` is more relevant.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordCandidate {
    pub id: String,
    pub score: f64,
}

/// A vector candidate. Lower `distance` is more similar.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorCandidate {
    pub id: String,
    pub distance: f64,
}

/// An annotation whose embedding is missing or stale.
#[derive(Debug, Clone)]
pub struct PendingEmbedding {
    pub id: String,
    pub transcript: String,
}

/// Counts for `marg stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub books: i64,
    pub annotations: i64,
    pub embedded: i64,
    /// `(YYYY-MM-DD, count)` for days with at least one annotation, oldest first.
    pub per_day: Vec<(String, i64)>,
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`keyword_candidates`](AnnotationStore::keyword_candidates) | Ranked full-text matches |
/// | [`vector_candidates`](AnnotationStore::vector_candidates) | Nearest embeddings within a distance |
/// | [`search_hits`](AnnotationStore::search_hits) | Hydrate ids into renderable hits |
/// | [`annotation_ids`](AnnotationStore::annotation_ids) | All in-scope ids (feed ordering input) |
/// | [`feed_items`](AnnotationStore::feed_items) | Hydrate ids into feed rows |
/// | [`insert_annotation`](AnnotationStore::insert_annotation) | Store a new annotation and index it |
/// | [`update_transcript`](AnnotationStore::update_transcript) | Edit text, replace embedding, re-index |
/// | [`set_embedding`](AnnotationStore::set_embedding) | Store an embedding for an annotation |
#[async_trait]
pub trait AnnotationStore: Send + Sync {
    /// Annotations containing every term, best first, at most `limit`.
    ///
    /// Ties are broken by ascending id. An empty `terms` slice matches nothing.
    async fn keyword_candidates(
        &self,
        user: &UserId,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<KeywordCandidate>>;

    /// Annotations with a stored embedding within `max_distance` of
    /// `query_vec`, nearest first (ties by ascending id), at most `limit`.
    async fn vector_candidates(
        &self,
        user: &UserId,
        query_vec: &[f32],
        max_distance: f64,
        limit: usize,
    ) -> Result<Vec<VectorCandidate>>;

    /// Hydrate annotation ids into search hits. Order is unspecified and ids
    /// outside the user's scope are silently dropped.
    async fn search_hits(&self, user: &UserId, ids: &[String]) -> Result<Vec<SearchHit>>;

    /// Every annotation id visible to `user`, in unspecified order.
    async fn annotation_ids(&self, user: &UserId) -> Result<Vec<String>>;

    /// Hydrate annotation ids into feed rows. Order is unspecified and ids
    /// outside the user's scope are silently dropped.
    async fn feed_items(&self, user: &UserId, ids: &[String]) -> Result<Vec<FeedItem>>;

    async fn insert_book(&self, book: &Book) -> Result<()>;

    async fn get_book(&self, user: &UserId, book_id: &str) -> Result<Option<Book>>;

    async fn list_books(&self, user: &UserId) -> Result<Vec<Book>>;

    async fn insert_annotation(&self, annotation: &Annotation) -> Result<()>;

    async fn get_annotation(&self, user: &UserId, id: &str) -> Result<Option<Annotation>>;

    /// Replace the transcript and its embedding (`None` clears it).
    async fn update_transcript(
        &self,
        id: &str,
        transcript: &str,
        embedding: Option<(&[f32], &str)>,
    ) -> Result<()>;

    /// Returns `false` if no such annotation existed.
    async fn delete_annotation(&self, id: &str) -> Result<bool>;

    async fn set_embedding(&self, id: &str, vector: &[f32], model: &str) -> Result<()>;

    /// Clear every stored embedding, returning how many were cleared.
    async fn clear_embeddings(&self) -> Result<u64>;

    /// Annotations with no embedding or one produced by a model other than `model`.
    async fn annotations_needing_embedding(
        &self,
        model: &str,
        limit: Option<usize>,
    ) -> Result<Vec<PendingEmbedding>>;

    /// Counts scoped to `user`; `per_day` covers annotations created at or after `since_ts`.
    async fn stats(&self, user: &UserId, since_ts: i64) -> Result<StoreStats>;
}

/// Sort keyword candidates best first with id tie-break, then truncate.
pub(crate) fn finish_keyword_candidates(
    mut candidates: Vec<KeywordCandidate>,
    limit: usize,
) -> Vec<KeywordCandidate> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    candidates.truncate(limit);
    candidates
}

/// Drop candidates beyond `max_distance`, sort nearest first with id
/// tie-break, then truncate.
pub(crate) fn finish_vector_candidates(
    mut candidates: Vec<VectorCandidate>,
    max_distance: f64,
    limit: usize,
) -> Vec<VectorCandidate> {
    candidates.retain(|c| c.distance <= max_distance);
    candidates.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    candidates.truncate(limit);
    candidates
}
