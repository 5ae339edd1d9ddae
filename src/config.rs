//! TOML configuration.
//!
//! Retrieval and feed tuning live here but are never read by the search
//! engine or the feed paginator directly: callers build [`SearchParams`]
//! and [`FeedParams`] from the loaded [`Config`] and hand them over.
//!
//! [`SearchParams`]: crate::search::SearchParams
//! [`FeedParams`]: crate::feed::FeedParams

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::feed::FeedParams;
use crate::search::SearchParams;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    #[serde(default = "default_candidates")]
    pub fts_candidates: usize,
    #[serde(default = "default_candidates")]
    pub vector_candidates: usize,
    /// Smoothing constant shared by both RRF terms.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_threshold")]
    pub default_threshold: f64,
    #[serde(default = "default_min_threshold")]
    pub min_threshold: f64,
    #[serde(default = "default_max_threshold")]
    pub max_threshold: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            final_limit: default_final_limit(),
            fts_candidates: default_candidates(),
            vector_candidates: default_candidates(),
            rrf_k: default_rrf_k(),
            default_threshold: default_threshold(),
            min_threshold: default_min_threshold(),
            max_threshold: default_max_threshold(),
        }
    }
}

fn default_final_limit() -> usize {
    20
}
fn default_candidates() -> usize {
    50
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_threshold() -> f64 {
    0.3
}
fn default_min_threshold() -> f64 {
    0.1
}
fn default_max_threshold() -> f64 {
    1.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    #[serde(default = "default_feed_limit")]
    pub default_limit: i64,
    #[serde(default = "default_feed_max_limit")]
    pub max_limit: i64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            default_limit: default_feed_limit(),
            max_limit: default_feed_max_limit(),
        }
    }
}

fn default_feed_limit() -> i64 {
    10
}
fn default_feed_max_limit() -> i64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (OpenAI-compatible gateway or a non-default Ollama host).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    20
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}

impl Config {
    pub fn search_params(&self) -> SearchParams {
        let r = &self.retrieval;
        SearchParams {
            final_limit: r.final_limit,
            fts_candidates: r.fts_candidates,
            vector_candidates: r.vector_candidates,
            rrf_k: r.rrf_k,
            default_threshold: r.default_threshold,
            min_threshold: r.min_threshold,
            max_threshold: r.max_threshold,
        }
    }

    pub fn feed_params(&self) -> FeedParams {
        FeedParams {
            default_limit: self.feed.default_limit,
            max_limit: self.feed.max_limit,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let r = &config.retrieval;
    if r.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }
    if r.fts_candidates < 1 || r.vector_candidates < 1 {
        anyhow::bail!("retrieval.fts_candidates and retrieval.vector_candidates must be >= 1");
    }
    if r.rrf_k.is_nan() || r.rrf_k <= 0.0 {
        anyhow::bail!("retrieval.rrf_k must be > 0");
    }
    let ordered = r.min_threshold > 0.0
        && r.min_threshold <= r.default_threshold
        && r.default_threshold <= r.max_threshold;
    if !ordered {
        anyhow::bail!(
            "retrieval thresholds must satisfy 0 < min_threshold <= default_threshold <= max_threshold"
        );
    }

    if config.feed.default_limit < 1 || config.feed.max_limit < config.feed.default_limit {
        anyhow::bail!("feed.default_limit must be >= 1 and <= feed.max_limit");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
        // Retries are cut off at embedding.timeout_secs, which must expire
        // before the server's own request timeout.
        if config.embedding.timeout_secs == 0
            || config.embedding.timeout_secs >= config.server.request_timeout_secs
        {
            anyhow::bail!(
                "embedding.timeout_secs ({}) must be > 0 and less than server.request_timeout_secs ({})",
                config.embedding.timeout_secs,
                config.server.request_timeout_secs
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    Ok(())
}
