//! HTTP API over the search engine and feed paginator.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/api/search?q=&mode=&threshold=&explain=` | Ranked hits as a JSON array |
//! | `GET`  | `/api/feed?offset=&limit=&seed=` | One page of the seeded feed |
//!
//! The requesting user is read from the `x-user-id` header, which the
//! authenticating gateway in front of this server is expected to set.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "unknown search mode 'x'" } }
//! ```
//!
//! Error codes: `unauthorized` (401), `bad_request` (400),
//! `embeddings_disabled` (400), `timeout` (408), `upstream_error` (502),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::embedding;
use crate::error::RetrievalError;
use crate::feed::{FeedPaginator, FeedRequest};
use crate::models::{FeedPage, SearchHit, UserId};
use crate::search::{SearchEngine, SearchRequest};
use crate::sqlite_store::SqliteStore;
use crate::store::AnnotationStore;

/// Header carrying the authenticated user id.
pub const USER_HEADER: &str = "x-user-id";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub search: Arc<SearchEngine>,
    pub feed: Arc<FeedPaginator>,
    /// Wraps every search and feed call.
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(
        config: &Config,
        store: Arc<dyn AnnotationStore>,
        embedder: Arc<dyn embedding::EmbeddingProvider>,
    ) -> Self {
        Self {
            search: Arc::new(SearchEngine::new(
                store.clone(),
                embedder,
                config.search_params(),
            )),
            feed: Arc::new(FeedPaginator::new(store, config.feed_params())),
            request_timeout: Duration::from_secs(config.server.request_timeout_secs),
        }
    }
}

/// Build the router with CORS applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/search", get(handle_search))
        .route("/api/feed", get(handle_feed))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` against the configured SQLite
/// database. Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store: Arc<dyn AnnotationStore> = Arc::new(SqliteStore::open(config).await?);
    let embedder: Arc<dyn embedding::EmbeddingProvider> =
        Arc::from(embedding::create_provider(&config.embedding)?);
    let app = router(AppState::new(config, store, embedder));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "marginalia server listening");
    println!("Marginalia server listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn unauthorized() -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized".to_string(),
        message: format!("missing or blank {} header", USER_HEADER),
    }
}

fn timeout_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::REQUEST_TIMEOUT,
        code: "timeout".to_string(),
        message: message.into(),
    }
}

impl From<RetrievalError> for AppError {
    fn from(err: RetrievalError) -> Self {
        let status = match &err {
            RetrievalError::InvalidArgument(_) | RetrievalError::EmbeddingsDisabled => {
                StatusCode::BAD_REQUEST
            }
            RetrievalError::Upstream(_) => StatusCode::BAD_GATEWAY,
            RetrievalError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn require_user(headers: &HeaderMap) -> Result<UserId, AppError> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(UserId::parse)
        .ok_or_else(unauthorized)
}

async fn with_timeout<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, RetrievalError>>,
) -> Result<T, AppError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(AppError::from),
        Err(_) => Err(timeout_error(format!(
            "request exceeded {}s",
            limit.as_secs()
        ))),
    }
}

/// Parse an optional query parameter, treating an empty value as absent.
fn parse_param<T: std::str::FromStr>(name: &str, raw: Option<&str>) -> Result<Option<T>, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s
            .parse::<T>()
            .map(Some)
            .map_err(|_| bad_request(format!("{} must be a number, got '{}'", name, s))),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /api/search ============

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
    mode: Option<String>,
    threshold: Option<String>,
    explain: Option<String>,
}

async fn handle_search(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<SearchHit>>, AppError> {
    let user = require_user(&headers)?;
    let threshold = parse_param::<f64>("threshold", params.threshold.as_deref())?;
    let explain = matches!(params.explain.as_deref(), Some("true") | Some("1"));

    let req = SearchRequest {
        query: params.q.as_deref().unwrap_or(""),
        mode: params.mode.as_deref().unwrap_or("fts"),
        threshold,
        explain,
    };
    let hits = with_timeout(state.request_timeout, state.search.search(&user, &req)).await?;
    Ok(Json(hits))
}

// ============ GET /api/feed ============

#[derive(Deserialize)]
struct FeedQuery {
    offset: Option<String>,
    limit: Option<String>,
    seed: Option<String>,
}

async fn handle_feed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<FeedQuery>,
) -> Result<Json<FeedPage>, AppError> {
    let user = require_user(&headers)?;
    let req = FeedRequest {
        offset: parse_param("offset", params.offset.as_deref())?,
        limit: parse_param("limit", params.limit.as_deref())?,
        seed: params.seed,
    };
    let page = with_timeout(state.request_timeout, state.feed.page(&user, req)).await?;
    Ok(Json(page))
}
