//! SQLite-backed [`AnnotationStore`] implementation.
//!
//! Full-text candidates come from the `annotations_fts` FTS5 table ranked by
//! BM25. Vector candidates are scored in Rust against the little-endian
//! `f32` blobs stored on each annotation row. The FTS table is kept in sync
//! by hand inside the same transaction as every write to `annotations`.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use crate::fts;
use crate::models::{format_ts_iso, Annotation, Book, FeedItem, SearchHit, UserId};
use crate::store::{
    finish_keyword_candidates, finish_vector_candidates, AnnotationStore, KeywordCandidate,
    PendingEmbedding, StoreStats, VectorCandidate,
};

/// SQLite implementation of the [`AnnotationStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the database named in `config`.
    pub async fn open(config: &Config) -> Result<Self> {
        Ok(Self::new(db::connect(config).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// `SELECT ... FROM annotations a JOIN books b ... WHERE b.user_id = ? AND a.id IN (...)`
fn scoped_by_ids<'a>(
    columns: &str,
    user: &'a UserId,
    ids: &'a [String],
) -> QueryBuilder<'a, Sqlite> {
    let mut qb = QueryBuilder::new(format!(
        "SELECT {} FROM annotations a JOIN books b ON b.id = a.book_id WHERE b.user_id = ",
        columns
    ));
    qb.push_bind(user.as_str());
    qb.push(" AND a.id IN (");
    let mut sep = qb.separated(", ");
    for id in ids {
        sep.push_bind(id.as_str());
    }
    sep.push_unseparated(")");
    qb
}

fn row_to_annotation(row: &SqliteRow) -> Annotation {
    let blob: Option<Vec<u8>> = row.get("embedding");
    Annotation {
        id: row.get("id"),
        book_id: row.get("book_id"),
        transcript: row.get("transcript"),
        embedding: blob.map(|b| blob_to_vec(&b)),
        embedding_model: row.get("embedding_model"),
        audio_url: row.get("audio_url"),
        image_url: row.get("image_url"),
        page_number: row.get("page_number"),
        location: row.get("location"),
        footnotes: row.get("footnotes"),
        created_at: row.get("created_at"),
    }
}

fn row_to_book(row: &SqliteRow) -> Book {
    Book {
        id: row.get("id"),
        user_id: row.get("user_id"),
        title: row.get("title"),
        author: row.get("author"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl AnnotationStore for SqliteStore {
    async fn keyword_candidates(
        &self,
        user: &UserId,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<KeywordCandidate>> {
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT annotations_fts.annotation_id AS id,
                   bm25(annotations_fts) AS rank
            FROM annotations_fts
            JOIN annotations a ON a.id = annotations_fts.annotation_id
            JOIN books b ON b.id = a.book_id
            WHERE annotations_fts MATCH ? AND b.user_id = ?
            ORDER BY rank, a.id
            LIMIT ?
            "#,
        )
        .bind(fts::fts5_match_expr(terms))
        .bind(user.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        // bm25() is lower-is-better; flip it so higher is more relevant.
        let candidates = rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                KeywordCandidate {
                    id: row.get("id"),
                    score: -rank,
                }
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
        let rows = sqlx::query(
            r#"
            SELECT a.id, a.embedding
            FROM annotations a
            JOIN books b ON b.id = a.book_id
            WHERE b.user_id = ? AND a.embedding IS NOT NULL
            "#,
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;

        let candidates = rows
            .iter()
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                cosine_distance(query_vec, &vec).map(|distance| VectorCandidate {
                    id: row.get("id"),
                    distance,
                })
            })
            .collect();

        Ok(finish_vector_candidates(candidates, max_distance, limit))
    }

    async fn search_hits(&self, user: &UserId, ids: &[String]) -> Result<Vec<SearchHit>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = scoped_by_ids(
            "a.id, a.transcript, a.created_at, b.id AS book_id, b.title, b.author",
            user,
            ids,
        );
        let rows = qb.build().fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| {
                let created_at: i64 = row.get("created_at");
                SearchHit {
                    id: row.get("id"),
                    transcript: row.get("transcript"),
                    book_id: row.get("book_id"),
                    book_title: row.get("title"),
                    book_author: row.get("author"),
                    created_at: format_ts_iso(created_at),
                    explain: None,
                }
            })
            .collect())
    }

    async fn annotation_ids(&self, user: &UserId) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT a.id FROM annotations a JOIN books b ON b.id = a.book_id WHERE b.user_id = ?",
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn feed_items(&self, user: &UserId, ids: &[String]) -> Result<Vec<FeedItem>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = scoped_by_ids(
            "a.id, a.transcript, a.audio_url, a.image_url, a.page_number, a.location, \
             a.created_at, b.id AS book_id, b.title, b.author",
            user,
            ids,
        );
        let rows = qb.build().fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| {
                let created_at: i64 = row.get("created_at");
                FeedItem {
                    id: row.get("id"),
                    transcript: row.get("transcript"),
                    audio_url: row.get("audio_url"),
                    image_url: row.get("image_url"),
                    page_number: row.get("page_number"),
                    location: row.get("location"),
                    created_at: format_ts_iso(created_at),
                    book_id: row.get("book_id"),
                    book_title: row.get("title"),
                    book_author: row.get("author"),
                }
            })
            .collect())
    }

    async fn insert_book(&self, book: &Book) -> Result<()> {
        sqlx::query(
            "INSERT INTO books (id, user_id, title, author, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&book.id)
        .bind(&book.user_id)
        .bind(&book.title)
        .bind(&book.author)
        .bind(book.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_book(&self, user: &UserId, book_id: &str) -> Result<Option<Book>> {
        let row = sqlx::query(
            "SELECT id, user_id, title, author, created_at FROM books WHERE id = ? AND user_id = ?",
        )
        .bind(book_id)
        .bind(user.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_book))
    }

    async fn list_books(&self, user: &UserId) -> Result<Vec<Book>> {
        let rows = sqlx::query(
            "SELECT id, user_id, title, author, created_at FROM books WHERE user_id = ? ORDER BY title, id",
        )
        .bind(user.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_book).collect())
    }

    async fn insert_annotation(&self, annotation: &Annotation) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO annotations (id, book_id, transcript, embedding, embedding_model,
                                     audio_url, image_url, page_number, location, footnotes,
                                     created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&annotation.id)
        .bind(&annotation.book_id)
        .bind(&annotation.transcript)
        .bind(annotation.embedding.as_deref().map(vec_to_blob))
        .bind(&annotation.embedding_model)
        .bind(&annotation.audio_url)
        .bind(&annotation.image_url)
        .bind(&annotation.page_number)
        .bind(&annotation.location)
        .bind(&annotation.footnotes)
        .bind(annotation.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO annotations_fts (annotation_id, transcript) VALUES (?, ?)")
            .bind(&annotation.id)
            .bind(&annotation.transcript)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_annotation(&self, user: &UserId, id: &str) -> Result<Option<Annotation>> {
        let row = sqlx::query(
            r#"
            SELECT a.id, a.book_id, a.transcript, a.embedding, a.embedding_model,
                   a.audio_url, a.image_url, a.page_number, a.location, a.footnotes,
                   a.created_at
            FROM annotations a
            JOIN books b ON b.id = a.book_id
            WHERE a.id = ? AND b.user_id = ?
            "#,
        )
        .bind(id)
        .bind(user.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_annotation))
    }

    async fn update_transcript(
        &self,
        id: &str,
        transcript: &str,
        embedding: Option<(&[f32], &str)>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE annotations SET transcript = ?, embedding = ?, embedding_model = ? WHERE id = ?",
        )
        .bind(transcript)
        .bind(embedding.map(|(v, _)| vec_to_blob(v)))
        .bind(embedding.map(|(_, m)| m))
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM annotations_fts WHERE annotation_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO annotations_fts (annotation_id, transcript) VALUES (?, ?)")
            .bind(id)
            .bind(transcript)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_annotation(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM annotations_fts WHERE annotation_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM annotations WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_embedding(&self, id: &str, vector: &[f32], model: &str) -> Result<()> {
        sqlx::query("UPDATE annotations SET embedding = ?, embedding_model = ? WHERE id = ?")
            .bind(vec_to_blob(vector))
            .bind(model)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_embeddings(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE annotations SET embedding = NULL, embedding_model = NULL WHERE embedding IS NOT NULL",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn annotations_needing_embedding(
        &self,
        model: &str,
        limit: Option<usize>,
    ) -> Result<Vec<PendingEmbedding>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = sqlx::query(
            r#"
            SELECT id, transcript FROM annotations
            WHERE embedding IS NULL OR embedding_model IS NULL OR embedding_model != ?
            ORDER BY id
            LIMIT ?
            "#,
        )
        .bind(model)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| PendingEmbedding {
                id: row.get("id"),
                transcript: row.get("transcript"),
            })
            .collect())
    }

    async fn stats(&self, user: &UserId, since_ts: i64) -> Result<StoreStats> {
        let books: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM books WHERE user_id = ?")
            .bind(user.as_str())
            .fetch_one(&self.pool)
            .await?;

        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(CASE WHEN a.embedding IS NOT NULL THEN 1 ELSE 0 END), 0) AS embedded
            FROM annotations a
            JOIN books b ON b.id = a.book_id
            WHERE b.user_id = ?
            "#,
        )
        .bind(user.as_str())
        .fetch_one(&self.pool)
        .await?;

        let day_rows = sqlx::query(
            r#"
            SELECT strftime('%Y-%m-%d', a.created_at, 'unixepoch') AS day, COUNT(*) AS n
            FROM annotations a
            JOIN books b ON b.id = a.book_id
            WHERE b.user_id = ? AND a.created_at >= ?
            GROUP BY day
            ORDER BY day
            "#,
        )
        .bind(user.as_str())
        .bind(since_ts)
        .fetch_all(&self.pool)
        .await?;

        Ok(StoreStats {
            books,
            annotations: row.get("total"),
            embedded: row.get("embedded"),
            per_day: day_rows
                .iter()
                .map(|r| (r.get::<String, _>("day"), r.get::<i64, _>("n")))
                .collect(),
        })
    }
}
