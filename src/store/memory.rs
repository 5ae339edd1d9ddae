//! In-memory [`AnnotationStore`] implementation for testing.
//!
//! Uses `HashMap`s behind `std::sync::RwLock` for thread safety. Keyword
//! search matches whole lowercased tokens (no stemming) and scores by term
//! frequency; vector search is brute-force cosine distance.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::fts;
use crate::models::{format_ts_iso, Annotation, Book, FeedItem, SearchHit, UserId};

use super::{
    finish_keyword_candidates, finish_vector_candidates, AnnotationStore, KeywordCandidate,
    PendingEmbedding, StoreStats, VectorCandidate,
};

#[derive(Default)]
struct Inner {
    books: HashMap<String, Book>,
    annotations: HashMap<String, Annotation>,
}

impl Inner {
    /// Annotations whose book belongs to `user`, paired with that book.
    fn scoped<'a>(&'a self, user: &'a UserId) -> impl Iterator<Item = (&'a Annotation, &'a Book)> {
        self.annotations.values().filter_map(move |a| {
            self.books
                .get(&a.book_id)
                .filter(|b| b.user_id == user.as_str())
                .map(|b| (a, b))
        })
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

fn to_hit(a: &Annotation, b: &Book) -> SearchHit {
    SearchHit {
        id: a.id.clone(),
        transcript: a.transcript.clone(),
        book_id: b.id.clone(),
        book_title: b.title.clone(),
        book_author: b.author.clone(),
        created_at: format_ts_iso(a.created_at),
        explain: None,
    }
}

fn to_feed_item(a: &Annotation, b: &Book) -> FeedItem {
    FeedItem {
        id: a.id.clone(),
        transcript: a.transcript.clone(),
        audio_url: a.audio_url.clone(),
        image_url: a.image_url.clone(),
        page_number: a.page_number.clone(),
        location: a.location.clone(),
        created_at: format_ts_iso(a.created_at),
        book_id: b.id.clone(),
        book_title: b.title.clone(),
        book_author: b.author.clone(),
    }
}

#[async_trait]
impl AnnotationStore for InMemoryStore {
    async fn keyword_candidates(
        &self,
        user: &UserId,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<KeywordCandidate>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let inner = self.read()?;
        let candidates = inner
            .scoped(user)
            .filter_map(|(a, _)| {
                let tokens = fts::tokenize(&a.transcript);
                let mut score = 0usize;
                for term in terms {
                    let tf = tokens.iter().filter(|t| *t == term).count();
                    if tf == 0 {
                        return None;
                    }
                    score += tf;
                }
                Some(KeywordCandidate {
                    id: a.id.clone(),
                    score: score as f64,
                })
            })
            .collect();
        Ok(finish_keyword_candidates(candidates, limit))
    }

    async fn vector_candidates(
        &self,
        user: &UserId,
        query_vec: &[f32],
        max_distance: f64,
        limit: usize,
    ) -> Result<Vec<VectorCandidate>> {
        let inner = self.read()?;
        let candidates = inner
            .scoped(user)
            .filter_map(|(a, _)| {
                let embedding = a.embedding.as_deref()?;
                cosine_distance(query_vec, embedding).map(|distance| VectorCandidate {
                    id: a.id.clone(),
                    distance,
                })
            })
            .collect();
        Ok(finish_vector_candidates(candidates, max_distance, limit))
    }

    async fn search_hits(&self, user: &UserId, ids: &[String]) -> Result<Vec<SearchHit>> {
        let inner = self.read()?;
        let hits = inner
            .scoped(user)
            .filter(|(a, _)| ids.contains(&a.id))
            .map(|(a, b)| to_hit(a, b))
            .collect();
        Ok(hits)
    }

    async fn annotation_ids(&self, user: &UserId) -> Result<Vec<String>> {
        let inner = self.read()?;
        let ids = inner.scoped(user).map(|(a, _)| a.id.clone()).collect();
        Ok(ids)
    }

    async fn feed_items(&self, user: &UserId, ids: &[String]) -> Result<Vec<FeedItem>> {
        let inner = self.read()?;
        let items = inner
            .scoped(user)
            .filter(|(a, _)| ids.contains(&a.id))
            .map(|(a, b)| to_feed_item(a, b))
            .collect();
        Ok(items)
    }

    async fn insert_book(&self, book: &Book) -> Result<()> {
        self.write()?.books.insert(book.id.clone(), book.clone());
        Ok(())
    }

    async fn get_book(&self, user: &UserId, book_id: &str) -> Result<Option<Book>> {
        Ok(self
            .read()?
            .books
            .get(book_id)
            .filter(|b| b.user_id == user.as_str())
            .cloned())
    }

    async fn list_books(&self, user: &UserId) -> Result<Vec<Book>> {
        let mut books: Vec<Book> = self
            .read()?
            .books
            .values()
            .filter(|b| b.user_id == user.as_str())
            .cloned()
            .collect();
        books.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.id.cmp(&b.id)));
        Ok(books)
    }

    async fn insert_annotation(&self, annotation: &Annotation) -> Result<()> {
        let mut inner = self.write()?;
        if !inner.books.contains_key(&annotation.book_id) {
            return Err(anyhow!("book not found: {}", annotation.book_id));
        }
        inner
            .annotations
            .insert(annotation.id.clone(), annotation.clone());
        Ok(())
    }

    async fn get_annotation(&self, user: &UserId, id: &str) -> Result<Option<Annotation>> {
        let inner = self.read()?;
        let found = inner
            .scoped(user)
            .find(|(a, _)| a.id == id)
            .map(|(a, _)| a.clone());
        Ok(found)
    }

    async fn update_transcript(
        &self,
        id: &str,
        transcript: &str,
        embedding: Option<(&[f32], &str)>,
    ) -> Result<()> {
        let mut inner = self.write()?;
        let annotation = inner
            .annotations
            .get_mut(id)
            .ok_or_else(|| anyhow!("annotation not found: {}", id))?;
        annotation.transcript = transcript.to_string();
        annotation.embedding = embedding.map(|(v, _)| v.to_vec());
        annotation.embedding_model = embedding.map(|(_, m)| m.to_string());
        Ok(())
    }

    async fn delete_annotation(&self, id: &str) -> Result<bool> {
        Ok(self.write()?.annotations.remove(id).is_some())
    }

    async fn set_embedding(&self, id: &str, vector: &[f32], model: &str) -> Result<()> {
        let mut inner = self.write()?;
        let annotation = inner
            .annotations
            .get_mut(id)
            .ok_or_else(|| anyhow!("annotation not found: {}", id))?;
        annotation.embedding = Some(vector.to_vec());
        annotation.embedding_model = Some(model.to_string());
        Ok(())
    }

    async fn clear_embeddings(&self) -> Result<u64> {
        let mut inner = self.write()?;
        let mut cleared = 0;
        for annotation in inner.annotations.values_mut() {
            if annotation.embedding.take().is_some() {
                cleared += 1;
            }
            annotation.embedding_model = None;
        }
        Ok(cleared)
    }

    async fn annotations_needing_embedding(
        &self,
        model: &str,
        limit: Option<usize>,
    ) -> Result<Vec<PendingEmbedding>> {
        let inner = self.read()?;
        let mut pending: Vec<PendingEmbedding> = inner
            .annotations
            .values()
            .filter(|a| a.embedding.is_none() || a.embedding_model.as_deref() != Some(model))
            .map(|a| PendingEmbedding {
                id: a.id.clone(),
                transcript: a.transcript.clone(),
            })
            .collect();
        pending.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(limit) = limit {
            pending.truncate(limit);
        }
        Ok(pending)
    }

    async fn stats(&self, user: &UserId, since_ts: i64) -> Result<StoreStats> {
        let inner = self.read()?;
        let books = inner
            .books
            .values()
            .filter(|b| b.user_id == user.as_str())
            .count() as i64;

        let mut annotations = 0i64;
        let mut embedded = 0i64;
        let mut per_day: BTreeMap<String, i64> = BTreeMap::new();
        for (a, _) in inner.scoped(user) {
            annotations += 1;
            if a.embedding.is_some() {
                embedded += 1;
            }
            if a.created_at >= since_ts {
                let day = chrono::DateTime::from_timestamp(a.created_at, 0)
                    .map(|dt| dt.format("%Y-%m-%d").to_string())
                    .unwrap_or_default();
                *per_day.entry(day).or_insert(0) += 1;
            }
        }

        Ok(StoreStats {
            books,
            annotations,
            embedded,
            per_day: per_day.into_iter().collect(),
        })
    }
}
