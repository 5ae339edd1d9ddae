//! HTTP API tests: a real router on an ephemeral port over a SQLite store.

use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use marginalia::config::{validate, Config, EmbeddingConfig};
use marginalia::embedding::{create_provider, DisabledProvider, EmbeddingProvider};
use marginalia::migrate;
use marginalia::models::{Annotation, Book};
use marginalia::server::{router, AppState, USER_HEADER};
use marginalia::sqlite_store::SqliteStore;
use marginalia::store::AnnotationStore;

struct TestServer {
    base: String,
    _tmp: TempDir,
}

fn test_config(tmp: &TempDir) -> Config {
    let db_path = tmp.path().join("data/marginalia.sqlite");
    toml::from_str(&format!(
        r#"
[db]
path = "{}"

[feed]
default_limit = 3
max_limit = 50

[server]
request_timeout_secs = 10
"#,
        db_path.display()
    ))
    .unwrap()
}

async fn seeded_store(config: &Config) -> Arc<SqliteStore> {
    migrate::run_migrations(config).await.unwrap();
    let store = SqliteStore::open(config).await.unwrap();

    for (book, owner) in [("moby", "alice"), ("walden", "bob")] {
        store
            .insert_book(&Book {
                id: book.into(),
                user_id: owner.into(),
                title: book.to_uppercase(),
                author: "Anon".into(),
                created_at: 0,
            })
            .await
            .unwrap();
    }

    let notes: [(&str, &str, &str, Option<Vec<f32>>); 6] = [
        ("n1", "moby", "the whale surfaced", Some(vec![1.0, 0.0, 0.0])),
        ("n2", "moby", "ishmael went to sea", Some(vec![0.95, 0.05, 0.0])),
        ("n3", "moby", "a whale of a tale", None),
        ("n4", "moby", "queequeg and the harpoon", Some(vec![0.0, 1.0, 0.0])),
        ("n5", "moby", "the pequod sails", None),
        ("w1", "walden", "the whale is not in walden", Some(vec![1.0, 0.0, 0.0])),
    ];
    for (id, book, text, emb) in notes {
        store
            .insert_annotation(&Annotation {
                id: id.into(),
                book_id: book.into(),
                transcript: text.into(),
                embedding_model: emb.as_ref().map(|_| "text-embedding-3-small".to_string()),
                embedding: emb,
                audio_url: None,
                image_url: None,
                page_number: Some("1".into()),
                location: None,
                footnotes: None,
                created_at: 0,
            })
            .await
            .unwrap();
    }
    Arc::new(store)
}

async fn spawn_with(embedder: Arc<dyn EmbeddingProvider>) -> TestServer {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp);
    let store = seeded_store(&config).await;
    let app = router(AppState::new(&config, store, embedder));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base: format!("http://{}", addr),
        _tmp: tmp,
    }
}

async fn spawn() -> TestServer {
    spawn_with(Arc::new(DisabledProvider)).await
}

/// An OpenAI provider pointed at a mock returning `vector` for every input.
async fn mock_openai(mock: &MockServer, status: u16, vector: Value) -> Arc<dyn EmbeddingProvider> {
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(
            ResponseTemplate::new(status)
                .set_body_json(json!({ "data": [ { "index": 0, "embedding": vector } ] })),
        )
        .mount(mock)
        .await;

    std::env::set_var("MARG_SERVER_TEST_KEY", "sk-test");
    let config = EmbeddingConfig {
        provider: "openai".into(),
        model: Some("text-embedding-3-small".into()),
        dims: Some(3),
        url: Some(mock.uri()),
        api_key_env: "MARG_SERVER_TEST_KEY".into(),
        max_retries: 0,
        timeout_secs: 5,
        ..EmbeddingConfig::default()
    };
    Arc::from(create_provider(&config).unwrap())
}

async fn get(server: &TestServer, path_and_query: &str, user: Option<&str>) -> (u16, Value) {
    let client = reqwest::Client::new();
    let mut req = client.get(format!("{}{}", server.base, path_and_query));
    if let Some(u) = user {
        req = req.header(USER_HEADER, u);
    }
    let resp = req.send().await.unwrap();
    let status = resp.status().as_u16();
    let body = resp.json::<Value>().await.unwrap_or(Value::Null);
    (status, body)
}

fn hit_ids(body: &Value) -> Vec<String> {
    body.as_array()
        .unwrap()
        .iter()
        .map(|h| h["id"].as_str().unwrap().to_string())
        .collect()
}

// ─── Health and auth ────────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let server = spawn().await;
    let (status, body) = get(&server, "/health", None).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_missing_user_is_unauthorized() {
    let server = spawn().await;
    for url in ["/api/search?q=whale", "/api/feed"] {
        let (status, body) = get(&server, url, None).await;
        assert_eq!(status, 401, "{}", url);
        assert_eq!(body["error"]["code"], "unauthorized");
    }
    let (status, _) = get(&server, "/api/feed", Some("   ")).await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let server = spawn().await;
    let resp = reqwest::Client::new()
        .get(format!("{}/health", server.base))
        .header("origin", "https://reader.example")
        .send()
        .await
        .unwrap();
    assert_eq!(
        resp.headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}

// ─── Search ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_fts_search_returns_scoped_array() {
    let server = spawn().await;
    let (status, body) = get(&server, "/api/search?q=whale", Some("alice")).await;
    assert_eq!(status, 200);

    let mut ids = hit_ids(&body);
    ids.sort();
    assert_eq!(ids, vec!["n1", "n3"]);

    let first = &body[0];
    assert_eq!(first["bookTitle"], "MOBY");
    assert_eq!(first["bookAuthor"], "Anon");
    assert_eq!(first["createdAt"], "1970-01-01T00:00:00Z");
    assert!(first.get("explain").is_none());
}

#[tokio::test]
async fn test_empty_query_is_empty_array() {
    let server = spawn().await;
    let (status, body) = get(&server, "/api/search?q=", Some("alice")).await;
    assert_eq!(status, 200);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_bad_mode_and_threshold_are_bad_request() {
    let server = spawn().await;
    for url in [
        "/api/search?q=whale&mode=semantic",
        "/api/search?q=whale&mode=hybrid&threshold=5",
        "/api/search?q=whale&threshold=abc",
    ] {
        let (status, body) = get(&server, url, Some("alice")).await;
        assert_eq!(status, 400, "{}", url);
        assert_eq!(body["error"]["code"], "bad_request", "{}", url);
    }
}

#[tokio::test]
async fn test_hybrid_without_provider() {
    let server = spawn().await;
    let (status, body) = get(&server, "/api/search?q=whale&mode=hybrid", Some("alice")).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "embeddings_disabled");
}

#[tokio::test]
async fn test_hybrid_fuses_keyword_and_vector_matches() {
    let mock = MockServer::start().await;
    let embedder = mock_openai(&mock, 200, json!([1.0, 0.0, 0.0])).await;
    let server = spawn_with(embedder).await;

    let url = "/api/search?q=whale&mode=hybrid&threshold=0.3&explain=true";
    let (status, body) = get(&server, url, Some("alice")).await;
    assert_eq!(status, 200);

    let ids = hit_ids(&body);
    // n1 is first in both lists
    assert_eq!(ids[0], "n1");
    // n2 is a vector-only match, n3 a keyword-only match
    assert!(ids.contains(&"n2".to_string()));
    assert!(ids.contains(&"n3".to_string()));
    assert!(!ids.contains(&"n4".to_string()));
    assert!(!ids.contains(&"w1".to_string()));

    let top = &body[0]["explain"];
    assert_eq!(top["ftsRank"], 1);
    assert_eq!(top["vectorRank"], 1);
    assert!(top["score"].as_f64().unwrap() > 0.0);

    let (_, again) = get(&server, url, Some("alice")).await;
    assert_eq!(body, again);
}

#[tokio::test]
async fn test_embedder_failure_is_bad_gateway() {
    let mock = MockServer::start().await;
    let embedder = mock_openai(&mock, 500, json!([1.0, 0.0, 0.0])).await;
    let server = spawn_with(embedder).await;

    let (status, body) = get(&server, "/api/search?q=whale&mode=hybrid", Some("alice")).await;
    assert_eq!(status, 502);
    assert_eq!(body["error"]["code"], "upstream_error");

    // Full-text search does not touch the embedder.
    let (status, _) = get(&server, "/api/search?q=whale", Some("alice")).await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn test_embedder_outage_with_default_retries_is_bad_gateway() {
    let mock = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&mock)
        .await;

    std::env::set_var("MARG_SERVER_OUTAGE_KEY", "sk-test");
    let tmp = TempDir::new().unwrap();
    let config: Config = toml::from_str(&format!(
        r#"
[db]
path = "{}"

[embedding]
provider = "openai"
model = "text-embedding-3-small"
dims = 3
url = "{}"
api_key_env = "MARG_SERVER_OUTAGE_KEY"
timeout_secs = 2

[server]
request_timeout_secs = 4
"#,
        tmp.path().join("data/marginalia.sqlite").display(),
        mock.uri()
    ))
    .unwrap();
    validate(&config).unwrap();
    assert_eq!(config.embedding.max_retries, EmbeddingConfig::default().max_retries);

    let store = seeded_store(&config).await;
    let embedder: Arc<dyn EmbeddingProvider> =
        Arc::from(create_provider(&config.embedding).unwrap());
    let app = router(AppState::new(&config, store, embedder));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let server = TestServer {
        base: format!("http://{}", addr),
        _tmp: tmp,
    };

    let (status, body) = get(&server, "/api/search?q=whale&mode=hybrid", Some("alice")).await;
    assert_eq!(status, 502);
    assert_eq!(body["error"]["code"], "upstream_error");
}

// ─── Feed ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_feed_pages_with_echoed_seed() {
    let server = spawn().await;

    let (status, first) = get(&server, "/api/feed?seed=abc", Some("alice")).await;
    assert_eq!(status, 200);
    assert_eq!(first["seed"], "abc");
    assert_eq!(first["items"].as_array().unwrap().len(), 3);
    assert_eq!(first["hasMore"], true);
    assert_eq!(first["nextOffset"], 3);

    let (_, second) = get(&server, "/api/feed?seed=abc&offset=3", Some("alice")).await;
    assert_eq!(second["items"].as_array().unwrap().len(), 2);
    assert_eq!(second["hasMore"], false);
    assert!(second["nextOffset"].is_null());

    let mut seen: Vec<String> = first["items"]
        .as_array()
        .unwrap()
        .iter()
        .chain(second["items"].as_array().unwrap())
        .map(|i| i["id"].as_str().unwrap().to_string())
        .collect();
    seen.sort();
    assert_eq!(seen, vec!["n1", "n2", "n3", "n4", "n5"]);

    let item = &first["items"][0];
    assert_eq!(item["bookTitle"], "MOBY");
    assert_eq!(item["pageNumber"], "1");
}

#[tokio::test]
async fn test_feed_generates_seed_when_absent() {
    let server = spawn().await;
    let (status, page) = get(&server, "/api/feed?limit=10", Some("bob")).await;
    assert_eq!(status, 200);
    assert!(!page["seed"].as_str().unwrap().is_empty());
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
    assert_eq!(page["items"][0]["id"], "w1");
}

#[tokio::test]
async fn test_feed_rejects_bad_numbers() {
    let server = spawn().await;
    for url in [
        "/api/feed?limit=ten",
        "/api/feed?limit=0",
        "/api/feed?offset=-1",
    ] {
        let (status, body) = get(&server, url, Some("alice")).await;
        assert_eq!(status, 400, "{}", url);
        assert_eq!(body["error"]["code"], "bad_request", "{}", url);
    }
}
