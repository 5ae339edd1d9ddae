//! Full-text and hybrid search over annotation transcripts.
//!
//! The engine runs entirely through the [`AnnotationStore`] and
//! [`EmbeddingProvider`] traits. Candidate retrieval is pushed down to the
//! store; fusion happens here on plain ranked lists so it can be tested
//! without a database.
//!
//! # Hybrid Scoring Algorithm
//!
//! 1. Fetch up to `fts_candidates` full-text candidates (best first).
//! 2. Embed the query once and fetch up to `vector_candidates` annotations
//!    whose cosine distance is within `threshold` (nearest first).
//! 3. Assign each candidate its 1-based position in its own list.
//! 4. Fuse with Reciprocal Rank Fusion:
//!    `score = 1/(k + fts_rank) + 1/(k + vector_rank)`, a term being `0`
//!    when the annotation is absent from that list.
//! 5. Sort by score (desc), then id (asc).
//! 6. Truncate to `final_limit` and hydrate.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::Config;
use crate::embedding::{self, embed_query, EmbeddingProvider};
use crate::error::{Result, RetrievalError};
use crate::fts;
use crate::models::{FusionExplanation, SearchHit, UserId};
use crate::sqlite_store::SqliteStore;
use crate::store::{AnnotationStore, KeywordCandidate, VectorCandidate};

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct SearchParams {
    /// Maximum results returned by either mode.
    pub final_limit: usize,
    /// Size of the full-text candidate set in hybrid mode.
    pub fts_candidates: usize,
    /// Size of the vector candidate set in hybrid mode.
    pub vector_candidates: usize,
    /// RRF smoothing constant.
    pub rrf_k: f64,
    /// Maximum vector distance when the caller gives no threshold.
    pub default_threshold: f64,
    pub min_threshold: f64,
    pub max_threshold: f64,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            final_limit: 20,
            fts_candidates: 50,
            vector_candidates: 50,
            rrf_k: 60.0,
            default_threshold: 0.3,
            min_threshold: 0.1,
            max_threshold: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Fts,
    Hybrid,
}

impl SearchMode {
    pub fn parse(mode: &str) -> Result<Self> {
        match mode {
            "fts" => Ok(SearchMode::Fts),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(RetrievalError::invalid(format!(
                "unknown search mode '{}'; expected 'fts' or 'hybrid'",
                other
            ))),
        }
    }
}

/// Inputs for a single search invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    /// `"fts"` or `"hybrid"`.
    pub mode: &'a str,
    /// Maximum vector distance (hybrid only); `None` uses the configured default.
    pub threshold: Option<f64>,
    /// Populate [`FusionExplanation`] on each hit.
    pub explain: bool,
}

/// One entry of a fused ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub id: String,
    pub score: f64,
    pub fts_rank: Option<usize>,
    pub vector_rank: Option<usize>,
    pub distance: Option<f64>,
}

impl FusedCandidate {
    fn explanation(&self) -> FusionExplanation {
        FusionExplanation {
            score: self.score,
            fts_rank: self.fts_rank,
            vector_rank: self.vector_rank,
            distance: self.distance,
        }
    }
}

/// Reciprocal Rank Fusion of two ranked candidate lists.
///
/// Both inputs must already be in rank order (best first). The result is the
/// union of both lists, ordered by fused score descending and then by id.
pub fn rrf_fuse(
    fts: &[KeywordCandidate],
    vector: &[VectorCandidate],
    k: f64,
) -> Vec<FusedCandidate> {
    let mut fused: HashMap<&str, FusedCandidate> = HashMap::new();

    for (i, c) in fts.iter().enumerate() {
        let rank = i + 1;
        let entry = fused.entry(c.id.as_str()).or_insert_with(|| FusedCandidate {
            id: c.id.clone(),
            score: 0.0,
            fts_rank: None,
            vector_rank: None,
            distance: None,
        });
        if entry.fts_rank.is_none() {
            entry.fts_rank = Some(rank);
            entry.score += 1.0 / (k + rank as f64);
        }
    }

    for (i, c) in vector.iter().enumerate() {
        let rank = i + 1;
        let entry = fused.entry(c.id.as_str()).or_insert_with(|| FusedCandidate {
            id: c.id.clone(),
            score: 0.0,
            fts_rank: None,
            vector_rank: None,
            distance: None,
        });
        if entry.vector_rank.is_none() {
            entry.vector_rank = Some(rank);
            entry.distance = Some(c.distance);
            entry.score += 1.0 / (k + rank as f64);
        }
    }

    let mut out: Vec<FusedCandidate> = fused.into_values().collect();
    out.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    out
}

/// Search engine over one store and one embedding provider.
pub struct SearchEngine {
    store: Arc<dyn AnnotationStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    params: SearchParams,
}

impl SearchEngine {
    pub fn new(
        store: Arc<dyn AnnotationStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        params: SearchParams,
    ) -> Self {
        Self {
            store,
            embedder,
            params,
        }
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    /// Validate the request, dispatch on mode, and return at most
    /// `final_limit` hits.
    ///
    /// An empty or whitespace-only query yields an empty list in either mode
    /// without touching the store or the embedder. The threshold only
    /// applies to hybrid mode and is ignored for full-text search.
    pub async fn search(&self, user: &UserId, req: &SearchRequest<'_>) -> Result<Vec<SearchHit>> {
        let mode = SearchMode::parse(req.mode)?;
        let threshold = match mode {
            SearchMode::Hybrid => Some(self.resolve_threshold(req.threshold)?),
            SearchMode::Fts => None,
        };

        let query = req.query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        match threshold {
            Some(t) => self.search_hybrid(user, query, t, req.explain).await,
            None => self.search_full_text(user, query, req.explain).await,
        }
    }

    /// Full-text matches ranked by relevance, best first.
    pub async fn search_full_text(
        &self,
        user: &UserId,
        query: &str,
        explain: bool,
    ) -> Result<Vec<SearchHit>> {
        let terms = fts::query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = self
            .store
            .keyword_candidates(user, &terms, self.params.final_limit)
            .await
            .map_err(RetrievalError::Store)?;
        debug!(user = %user, terms = terms.len(), hits = candidates.len(), "full-text search");

        let ranked: Vec<FusedCandidate> = candidates
            .into_iter()
            .enumerate()
            .map(|(i, c)| FusedCandidate {
                id: c.id,
                score: c.score,
                fts_rank: Some(i + 1),
                vector_rank: None,
                distance: None,
            })
            .collect();

        self.hydrate(user, ranked, explain).await
    }

    /// Full-text and vector candidates fused with RRF.
    pub async fn search_hybrid(
        &self,
        user: &UserId,
        query: &str,
        threshold: f64,
        explain: bool,
    ) -> Result<Vec<SearchHit>> {
        if !self.embedder.is_enabled() {
            return Err(RetrievalError::EmbeddingsDisabled);
        }

        let terms = fts::query_terms(query);
        let fts_candidates = self
            .store
            .keyword_candidates(user, &terms, self.params.fts_candidates)
            .await
            .map_err(RetrievalError::Store)?;

        let query_vec = embed_query(self.embedder.as_ref(), query)
            .await
            .map_err(RetrievalError::Upstream)?;

        let vector_candidates = self
            .store
            .vector_candidates(user, &query_vec, threshold, self.params.vector_candidates)
            .await
            .map_err(RetrievalError::Store)?;

        let mut fused = rrf_fuse(&fts_candidates, &vector_candidates, self.params.rrf_k);
        debug!(
            user = %user,
            fts = fts_candidates.len(),
            vector = vector_candidates.len(),
            fused = fused.len(),
            threshold,
            "hybrid search"
        );
        fused.truncate(self.params.final_limit);

        self.hydrate(user, fused, explain).await
    }

    fn resolve_threshold(&self, threshold: Option<f64>) -> Result<f64> {
        let t = threshold.unwrap_or(self.params.default_threshold);
        if !t.is_finite() || t < self.params.min_threshold || t > self.params.max_threshold {
            return Err(RetrievalError::invalid(format!(
                "threshold must be between {} and {}, got {}",
                self.params.min_threshold, self.params.max_threshold, t
            )));
        }
        Ok(t)
    }

    /// Load display rows for `ranked` and return them in the same order.
    /// Ids that disappeared since candidate retrieval are skipped.
    async fn hydrate(
        &self,
        user: &UserId,
        ranked: Vec<FusedCandidate>,
        explain: bool,
    ) -> Result<Vec<SearchHit>> {
        if ranked.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = ranked.iter().map(|c| c.id.clone()).collect();
        let mut by_id: HashMap<String, SearchHit> = self
            .store
            .search_hits(user, &ids)
            .await
            .map_err(RetrievalError::Store)?
            .into_iter()
            .map(|hit| (hit.id.clone(), hit))
            .collect();

        Ok(ranked
            .iter()
            .filter_map(|c| {
                let mut hit = by_id.remove(&c.id)?;
                if explain {
                    hit.explain = Some(c.explanation());
                }
                Some(hit)
            })
            .collect())
    }
}

/// CLI entry point: run one search against the configured database and print
/// the hits to stdout.
pub async fn run_search(
    config: &Config,
    user: &UserId,
    req: &SearchRequest<'_>,
    json: bool,
) -> anyhow::Result<()> {
    let store = Arc::new(SqliteStore::open(config).await?);
    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::from(embedding::create_provider(&config.embedding)?);
    let engine = SearchEngine::new(store.clone(), embedder, config.search_params());

    let hits = engine.search(user, req).await;
    store.pool().close().await;
    let hits = hits?;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        if hit.book_author.is_empty() {
            println!("{}. {}", i + 1, hit.book_title);
        } else {
            println!("{}. {} ({})", i + 1, hit.book_title, hit.book_author);
        }
        if let Some(ref ex) = hit.explain {
            let rank = |r: Option<usize>| r.map(|r| r.to_string()).unwrap_or_else(|| "-".into());
            let distance = ex
                .distance
                .map(|d| format!("{:.3}", d))
                .unwrap_or_else(|| "-".into());
            println!(
                "    scoring: fts_rank={}  vector_rank={}  distance={}  → score={:.4}",
                rank(ex.fts_rank),
                rank(ex.vector_rank),
                distance,
                ex.score
            );
        }
        println!("    created: {}", hit.created_at);
        println!(
            "    transcript: \"{}\"",
            hit.transcript.replace('\n', " ").trim()
        );
        println!("    id: {}", hit.id);
        println!();
    }

    Ok(())
}
