//! Write path: books and annotations.
//!
//! Every write is checked against the acting user's ownership of the book.
//! A new or edited transcript is embedded immediately; when the provider is
//! disabled or the call fails the annotation is stored without an embedding
//! (a warning is logged) and `marg embed pending` can backfill it later.
//! Writes keep the full-text index in step with the transcript.

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::{self, embed_query, EmbeddingProvider};
use crate::models::{Annotation, Book, NewAnnotation, UserId};
use crate::sqlite_store::SqliteStore;
use crate::store::AnnotationStore;

pub struct Annotator {
    store: Arc<dyn AnnotationStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Annotator {
    pub fn new(store: Arc<dyn AnnotationStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    pub async fn add_book(&self, user: &UserId, title: &str, author: &str) -> Result<Book> {
        let title = title.trim();
        if title.is_empty() {
            bail!("book title must not be empty");
        }
        let book = Book {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user.as_str().to_string(),
            title: title.to_string(),
            author: author.trim().to_string(),
            created_at: chrono::Utc::now().timestamp(),
        };
        self.store.insert_book(&book).await?;
        info!(user = %user, book = %book.id, "added book");
        Ok(book)
    }

    pub async fn list_books(&self, user: &UserId) -> Result<Vec<Book>> {
        self.store.list_books(user).await
    }

    pub async fn add_annotation(&self, user: &UserId, new: NewAnnotation) -> Result<Annotation> {
        let transcript = new.transcript.trim();
        if transcript.is_empty() {
            bail!("transcript must not be empty");
        }
        if self.store.get_book(user, &new.book_id).await?.is_none() {
            bail!("book not found: {}", new.book_id);
        }

        let embedding = self.try_embed(transcript).await;
        let annotation = Annotation {
            id: uuid::Uuid::new_v4().to_string(),
            book_id: new.book_id,
            transcript: transcript.to_string(),
            embedding_model: embedding
                .as_ref()
                .map(|_| self.embedder.model_name().to_string()),
            embedding,
            audio_url: new.audio_url,
            image_url: new.image_url,
            page_number: new.page_number,
            location: new.location,
            footnotes: new.footnotes,
            created_at: chrono::Utc::now().timestamp(),
        };
        self.store.insert_annotation(&annotation).await?;
        info!(
            user = %user,
            annotation = %annotation.id,
            embedded = annotation.embedding.is_some(),
            "added annotation"
        );
        Ok(annotation)
    }

    /// Replace an annotation's transcript, re-embedding and re-indexing it.
    pub async fn edit_annotation(
        &self,
        user: &UserId,
        id: &str,
        transcript: &str,
    ) -> Result<Annotation> {
        let transcript = transcript.trim();
        if transcript.is_empty() {
            bail!("transcript must not be empty");
        }
        let Some(mut annotation) = self.store.get_annotation(user, id).await? else {
            bail!("annotation not found: {}", id);
        };

        let embedding = self.try_embed(transcript).await;
        let model = self.embedder.model_name().to_string();
        self.store
            .update_transcript(
                id,
                transcript,
                embedding.as_deref().map(|v| (v, model.as_str())),
            )
            .await?;

        annotation.transcript = transcript.to_string();
        annotation.embedding_model = embedding.as_ref().map(|_| model);
        annotation.embedding = embedding;
        info!(user = %user, annotation = %id, "edited annotation");
        Ok(annotation)
    }

    pub async fn delete_annotation(&self, user: &UserId, id: &str) -> Result<()> {
        if self.store.get_annotation(user, id).await?.is_none() {
            bail!("annotation not found: {}", id);
        }
        self.store.delete_annotation(id).await?;
        info!(user = %user, annotation = %id, "deleted annotation");
        Ok(())
    }

    async fn try_embed(&self, text: &str) -> Option<Vec<f32>> {
        if !self.embedder.is_enabled() {
            return None;
        }
        match embed_query(self.embedder.as_ref(), text).await {
            Ok(vec) => Some(vec),
            Err(e) => {
                warn!(error = %format!("{:#}", e), "embedding failed; storing annotation without a vector");
                None
            }
        }
    }
}

// ============ CLI entry points ============

async fn open(config: &Config) -> Result<(Arc<SqliteStore>, Annotator)> {
    let store = Arc::new(SqliteStore::open(config).await?);
    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::from(embedding::create_provider(&config.embedding)?);
    let annotator = Annotator::new(store.clone(), embedder);
    Ok((store, annotator))
}

pub async fn run_book_add(config: &Config, user: &UserId, title: &str, author: &str) -> Result<()> {
    let (store, annotator) = open(config).await?;
    let book = annotator.add_book(user, title, author).await;
    store.pool().close().await;
    let book = book?;
    println!("Added book {}", book.id);
    Ok(())
}

pub async fn run_book_list(config: &Config, user: &UserId) -> Result<()> {
    let (store, annotator) = open(config).await?;
    let books = annotator.list_books(user).await;
    store.pool().close().await;
    let books = books?;

    if books.is_empty() {
        println!("No books.");
        return Ok(());
    }
    println!("{:<36}  {:<32}  AUTHOR", "ID", "TITLE");
    for b in &books {
        println!("{:<36}  {:<32}  {}", b.id, b.title, b.author);
    }
    Ok(())
}

pub async fn run_note_add(config: &Config, user: &UserId, new: NewAnnotation) -> Result<()> {
    let (store, annotator) = open(config).await?;
    let annotation = annotator.add_annotation(user, new).await;
    store.pool().close().await;
    let annotation = annotation?;
    println!("Added annotation {}", annotation.id);
    if annotation.embedding.is_none() {
        println!("  (no embedding stored; run `marg embed pending` later)");
    }
    Ok(())
}

pub async fn run_note_edit(config: &Config, user: &UserId, id: &str, transcript: &str) -> Result<()> {
    let (store, annotator) = open(config).await?;
    let result = annotator.edit_annotation(user, id, transcript).await;
    store.pool().close().await;
    result?;
    println!("Updated annotation {}", id);
    Ok(())
}

pub async fn run_note_delete(config: &Config, user: &UserId, id: &str) -> Result<()> {
    let (store, annotator) = open(config).await?;
    let result = annotator.delete_annotation(user, id).await;
    store.pool().close().await;
    result?;
    println!("Deleted annotation {}", id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::DisabledProvider;
    use crate::fts;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;

    struct LengthEmbedder {
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for LengthEmbedder {
        fn model_name(&self) -> &str {
            "length"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.fail {
                bail!("connection refused");
            }
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    fn annotator(store: Arc<InMemoryStore>, fail: bool) -> Annotator {
        Annotator::new(store, Arc::new(LengthEmbedder { fail }))
    }

    fn note(book_id: &str, text: &str) -> NewAnnotation {
        NewAnnotation {
            book_id: book_id.to_string(),
            transcript: text.to_string(),
            ..NewAnnotation::default()
        }
    }

    #[tokio::test]
    async fn test_add_embeds_and_indexes() {
        let store = Arc::new(InMemoryStore::new());
        let a = annotator(store.clone(), false);
        let book = a.add_book(&user("alice"), "Moby Dick", "Melville").await.unwrap();
        let ann = a
            .add_annotation(&user("alice"), note(&book.id, "  call me ishmael "))
            .await
            .unwrap();
        assert_eq!(ann.transcript, "call me ishmael");
        assert_eq!(ann.embedding.as_deref(), Some(&[15.0, 1.0][..]));
        assert_eq!(ann.embedding_model.as_deref(), Some("length"));

        let found = store
            .keyword_candidates(&user("alice"), &fts::query_terms("ishmael"), 10)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_embedding_failure_stores_null() {
        let store = Arc::new(InMemoryStore::new());
        let a = annotator(store, true);
        let book = a.add_book(&user("alice"), "Book", "").await.unwrap();
        let ann = a
            .add_annotation(&user("alice"), note(&book.id, "text"))
            .await
            .unwrap();
        assert!(ann.embedding.is_none());
        assert!(ann.embedding_model.is_none());
    }

    #[tokio::test]
    async fn test_disabled_provider_stores_null() {
        let store = Arc::new(InMemoryStore::new());
        let a = Annotator::new(store, Arc::new(DisabledProvider));
        let book = a.add_book(&user("alice"), "Book", "").await.unwrap();
        let ann = a
            .add_annotation(&user("alice"), note(&book.id, "text"))
            .await
            .unwrap();
        assert!(ann.embedding.is_none());
    }

    #[tokio::test]
    async fn test_cannot_write_into_foreign_book() {
        let store = Arc::new(InMemoryStore::new());
        let a = annotator(store, false);
        let book = a.add_book(&user("alice"), "Mine", "").await.unwrap();
        let err = a
            .add_annotation(&user("bob"), note(&book.id, "sneaky"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("book not found"));
    }

    #[tokio::test]
    async fn test_edit_reembeds_and_reindexes() {
        let store = Arc::new(InMemoryStore::new());
        let a = annotator(store.clone(), false);
        let book = a.add_book(&user("alice"), "Book", "").await.unwrap();
        let ann = a
            .add_annotation(&user("alice"), note(&book.id, "old words"))
            .await
            .unwrap();

        let edited = a
            .edit_annotation(&user("alice"), &ann.id, "brand new text")
            .await
            .unwrap();
        assert_eq!(edited.embedding.as_deref(), Some(&[14.0, 1.0][..]));

        let old = store
            .keyword_candidates(&user("alice"), &fts::query_terms("old"), 10)
            .await
            .unwrap();
        assert!(old.is_empty());
        let new = store
            .keyword_candidates(&user("alice"), &fts::query_terms("brand"), 10)
            .await
            .unwrap();
        assert_eq!(new.len(), 1);

        assert!(a.edit_annotation(&user("bob"), &ann.id, "x").await.is_err());
    }

    #[tokio::test]
    async fn test_delete_checks_owner() {
        let store = Arc::new(InMemoryStore::new());
        let a = annotator(store.clone(), false);
        let book = a.add_book(&user("alice"), "Book", "").await.unwrap();
        let ann = a
            .add_annotation(&user("alice"), note(&book.id, "bye"))
            .await
            .unwrap();

        assert!(a.delete_annotation(&user("bob"), &ann.id).await.is_err());
        a.delete_annotation(&user("alice"), &ann.id).await.unwrap();
        assert!(store.annotation_ids(&user("alice")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_inputs_rejected() {
        let store = Arc::new(InMemoryStore::new());
        let a = annotator(store, false);
        assert!(a.add_book(&user("alice"), "  ", "x").await.is_err());
        let book = a.add_book(&user("alice"), "Book", "").await.unwrap();
        assert!(a.add_annotation(&user("alice"), note(&book.id, " ")).await.is_err());
    }
}
