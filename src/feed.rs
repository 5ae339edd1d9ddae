//! Seeded, paginated feed of a user's annotations.
//!
//! Each annotation's position is `hex(sha256(id || seed))`, ties broken by
//! id. The order depends only on the seed and the set of ids, so a client that
//! echoes the seed back gets a stable shuffle across lazily fetched pages.
//! Annotations added between fetches take their own slot in that order and
//! may shift later page boundaries; that is accepted.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::Config;
use crate::error::{Result, RetrievalError};
use crate::models::{FeedItem, FeedPage, UserId};
use crate::sqlite_store::SqliteStore;
use crate::store::AnnotationStore;

/// Pagination limits, decoupled from application config.
#[derive(Debug, Clone)]
pub struct FeedParams {
    pub default_limit: i64,
    /// Larger requested limits are clamped to this.
    pub max_limit: i64,
}

impl Default for FeedParams {
    fn default() -> Self {
        Self {
            default_limit: 10,
            max_limit: 100,
        }
    }
}

/// One page request. Absent fields take their defaults.
#[derive(Debug, Clone, Default)]
pub struct FeedRequest {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
    pub seed: Option<String>,
}

/// Sort key for `id` under `seed`.
pub fn seed_key(id: &str, seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update(seed.as_bytes());
    hex::encode(hasher.finalize())
}

/// Sort `ids` into the feed order for `seed`.
pub fn seeded_order(ids: Vec<String>, seed: &str) -> Vec<String> {
    let mut keyed: Vec<(String, String)> = ids
        .into_iter()
        .map(|id| (seed_key(&id, seed), id))
        .collect();
    keyed.sort();
    keyed.into_iter().map(|(_, id)| id).collect()
}

/// A fresh seed for a new browsing session: the current time in milliseconds.
pub fn generate_seed() -> String {
    chrono::Utc::now().timestamp_millis().to_string()
}

pub struct FeedPaginator {
    store: Arc<dyn AnnotationStore>,
    params: FeedParams,
}

impl FeedPaginator {
    pub fn new(store: Arc<dyn AnnotationStore>, params: FeedParams) -> Self {
        Self { store, params }
    }

    /// Return the page at `offset` in the seeded order.
    ///
    /// `has_more` is true when at least one annotation follows the page, in
    /// which case `next_offset` is `offset + limit`.
    pub async fn page(&self, user: &UserId, req: FeedRequest) -> Result<FeedPage> {
        let offset = req.offset.unwrap_or(0);
        if offset < 0 {
            return Err(RetrievalError::invalid(format!(
                "offset must be non-negative, got {}",
                offset
            )));
        }
        let limit = req.limit.unwrap_or(self.params.default_limit);
        if limit < 1 {
            return Err(RetrievalError::invalid(format!(
                "limit must be at least 1, got {}",
                limit
            )));
        }
        let limit = limit.min(self.params.max_limit);

        let seed = req
            .seed
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(generate_seed);

        let ids = self
            .store
            .annotation_ids(user)
            .await
            .map_err(RetrievalError::Store)?;
        let total = ids.len();

        // Fetch one extra to learn whether another page exists.
        let mut window: Vec<String> = seeded_order(ids, &seed)
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize + 1)
            .collect();
        let has_more = window.len() > limit as usize;
        window.truncate(limit as usize);

        let mut by_id: HashMap<String, FeedItem> = self
            .store
            .feed_items(user, &window)
            .await
            .map_err(RetrievalError::Store)?
            .into_iter()
            .map(|item| (item.id.clone(), item))
            .collect();
        let items: Vec<FeedItem> = window.iter().filter_map(|id| by_id.remove(id)).collect();

        debug!(user = %user, total, offset, limit, returned = items.len(), has_more, "feed page");

        Ok(FeedPage {
            items,
            has_more,
            next_offset: has_more.then_some(offset + limit),
            seed,
        })
    }
}

/// CLI entry point: print one feed page for `user`.
pub async fn run_feed(
    config: &Config,
    user: &UserId,
    req: FeedRequest,
    json: bool,
) -> anyhow::Result<()> {
    let store = Arc::new(SqliteStore::open(config).await?);
    let feed = FeedPaginator::new(store.clone(), config.feed_params());

    let page = feed.page(user, req).await;
    store.pool().close().await;
    let page = page?;

    if json {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }

    println!("seed: {}", page.seed);
    println!();
    for item in &page.items {
        let mut place = Vec::new();
        if let Some(ref p) = item.page_number {
            place.push(format!("p. {}", p));
        }
        if let Some(ref l) = item.location {
            place.push(l.clone());
        }
        if place.is_empty() {
            println!("- {}", item.book_title);
        } else {
            println!("- {} [{}]", item.book_title, place.join(", "));
        }
        println!("    \"{}\"", item.transcript.replace('\n', " ").trim());
        println!("    id: {}", item.id);
    }
    match page.next_offset {
        Some(next) => println!("\nmore: --offset {} --seed {}", next, page.seed),
        None => println!("\n(end of feed)"),
    }

    Ok(())
}
