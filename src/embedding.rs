//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API with retry and backoff.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//!
//! Also provides vector utilities for the SQLite store:
//! - [`cosine_similarity`] / [`cosine_distance`]: compare two embedding vectors
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`]: decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Retry Strategy
//!
//! The OpenAI and Ollama providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! `embedding.timeout_secs` bounds a whole call, retries and backoff
//! included. A retry that would sleep past that deadline is not attempted,
//! and each attempt's HTTP timeout is the time remaining. The last error is
//! returned instead, so callers see an upstream failure rather than their own
//! timeout firing.
//!
//! Retrying lives here, in the client layer. The search engine calls
//! [`embed_query`] exactly once per hybrid search and surfaces any failure.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::EmbeddingConfig;

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Whether this provider can produce vectors at all.
    fn is_enabled(&self) -> bool {
        true
    }
    /// Embed a batch of texts, returning one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
///
/// Convenience wrapper around [`EmbeddingProvider::embed`] that also checks
/// the returned dimensionality.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let results = provider.embed(&[text.to_string()]).await?;
    let vec = results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Empty embedding response"))?;
    if provider.dims() > 0 && vec.len() != provider.dims() {
        bail!(
            "Embedding has {} dimensions, expected {} for model {}",
            vec.len(),
            provider.dims(),
            provider.model_name()
        );
    }
    Ok(vec)
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    fn is_enabled(&self) -> bool {
        false
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Embedding provider is disabled")
    }
}

// ============ Shared HTTP retry loop ============

/// POST `body` to `url`, retrying 429/5xx/network failures with backoff
/// until `max_retries` is spent or `timeout` has elapsed.
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    timeout: Duration,
    service: &str,
) -> Result<serde_json::Value> {
    let deadline = Instant::now() + timeout;
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            if Instant::now() + delay >= deadline {
                tracing::debug!(service, attempt, "embedding deadline reached; not retrying");
                break;
            }
            tracing::debug!(service, attempt, ?delay, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        let mut req = client.post(url).timeout(remaining).json(body);
        if let Some(key) = bearer {
            req = req.bearer_auth(key);
        }

        match req.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json()
                        .await
                        .with_context(|| format!("{} returned a non-JSON body", service));
                }

                let body_text = response.text().await.unwrap_or_default();

                if status.as_u16() == 429 || status.is_server_error() {
                    tracing::warn!(service, %status, attempt, "transient embedding error");
                    last_err = Some(anyhow!("{} API error {}: {}", service, status, body_text));
                    continue;
                }

                bail!("{} API error {}: {}", service, status, body_text);
            }
            Err(e) => {
                tracing::warn!(service, attempt, error = %e, "embedding request failed");
                last_err = Some(anyhow!("{} request failed: {}", service, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        anyhow!(
            "{} embedding did not complete within {}s",
            service,
            timeout.as_secs()
        )
    }))
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

fn parse_vector(value: &serde_json::Value, service: &str) -> Result<Vec<f32>> {
    value
        .as_array()
        .ok_or_else(|| anyhow!("Invalid {} response: embedding is not an array", service))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow!("Invalid {} response: non-numeric component", service))
        })
        .collect()
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST {url}/v1/embeddings` (default `https://api.openai.com`).
/// The API key is read from the environment variable named by
/// `embedding.api_key_env`.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    endpoint: String,
    api_key: String,
    max_retries: u32,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config,
    /// or if the API key variable is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} environment variable not set", config.api_key_env))?;
        let base = config
            .url
            .as_deref()
            .unwrap_or("https://api.openai.com")
            .trim_end_matches('/');

        Ok(Self {
            model,
            dims,
            endpoint: format!("{}/v1/embeddings", base),
            api_key,
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_with_retry(
            &self.client,
            &self.endpoint,
            Some(&self.api_key),
            &body,
            self.max_retries,
            self.timeout,
            "OpenAI",
        )
        .await?;
        let vectors = parse_openai_response(&json)?;
        if vectors.len() != texts.len() {
            bail!(
                "OpenAI returned {} embeddings for {} inputs",
                vectors.len(),
                texts.len()
            );
        }
        Ok(vectors)
    }
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Items are ordered by their `index` field so output order matches input.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, parse_vector(embedding, "OpenAI")?));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default: `http://localhost:11434`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    endpoint: String,
    max_retries: u32,
    timeout: Duration,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for Ollama provider"))?;
        let base = config
            .url
            .as_deref()
            .unwrap_or("http://localhost:11434")
            .trim_end_matches('/');

        Ok(Self {
            model,
            dims,
            endpoint: format!("{}/api/embed", base),
            max_retries: config.max_retries,
            timeout: Duration::from_secs(config.timeout_secs),
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_with_retry(
            &self.client,
            &self.endpoint,
            None,
            &body,
            self.max_retries,
            self.timeout,
            "Ollama",
        )
        .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(|e| parse_vector(e, "Ollama"))
        .collect()
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use marginalia::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or
/// zero-magnitude vectors.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Cosine distance `1 - cos(θ)`, in `[0.0, 2.0]`.
///
/// `None` when the vectors cannot be compared: length mismatch, empty, or
/// either vector has zero magnitude.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let norm = |v: &[f32]| v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm(a) * norm(b) < f32::EPSILON {
        return None;
    }
    Some(1.0 - cosine_similarity(a, b) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_distance(&v, &v).unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
        assert!((cosine_distance(&a, &b).unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_distance(&a, &b).unwrap() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_undefined_for_mismatched_lengths() {
        assert!(cosine_distance(&[1.0, 2.0], &[1.0]).is_none());
        assert!(cosine_distance(&[], &[]).is_none());
    }

    #[test]
    fn test_distance_undefined_for_zero_vectors() {
        assert!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]).is_none());
        assert!(cosine_distance(&[1.0, 0.0], &[0.0, 0.0]).is_none());
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_openai_response_rejects_garbage() {
        assert!(parse_openai_response(&serde_json::json!({ "nope": [] })).is_err());
        let bad = serde_json::json!({ "data": [ { "embedding": ["x"] } ] });
        assert!(parse_openai_response(&bad).is_err());
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({ "embeddings": [[0.5, 0.25]] });
        assert_eq!(parse_ollama_response(&json).unwrap(), vec![vec![0.5, 0.25]]);
    }

    #[tokio::test]
    async fn test_disabled_provider_errors() {
        let provider = DisabledProvider;
        assert!(!provider.is_enabled());
        assert!(embed_query(&provider, "hello").await.is_err());
    }

    #[test]
    fn test_create_provider_disabled() {
        let provider = create_provider(&EmbeddingConfig::default()).unwrap();
        assert_eq!(provider.model_name(), "disabled");
    }
}
