//! Error taxonomy for the retrieval core.
//!
//! Search and feed operations return [`RetrievalError`] so that callers
//! (the CLI and the HTTP server) can tell a bad request apart from an
//! embedding outage or a storage failure. An empty query is not an error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Rejected before any store or embedding call was made.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("hybrid search requires embeddings; set [embedding] provider in config")]
    EmbeddingsDisabled,

    /// The embedding service failed (timeout, non-2xx, malformed response).
    #[error("embedding service failed: {0:#}")]
    Upstream(anyhow::Error),

    #[error("store error: {0:#}")]
    Store(anyhow::Error),
}

impl RetrievalError {
    pub fn invalid(message: impl Into<String>) -> Self {
        RetrievalError::InvalidArgument(message.into())
    }

    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            RetrievalError::InvalidArgument(_) => "bad_request",
            RetrievalError::EmbeddingsDisabled => "embeddings_disabled",
            RetrievalError::Upstream(_) => "upstream_error",
            RetrievalError::Store(_) => "internal",
        }
    }
}

pub type Result<T, E = RetrievalError> = std::result::Result<T, E>;
