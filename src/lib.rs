//! # Marginalia
//!
//! Retrieval over reading notes. Users record annotations against books;
//! Marginalia indexes the transcripts for full-text search, stores an
//! embedding per annotation, and answers two kinds of read:
//!
//! - **Search**: full-text, or hybrid full-text + vector fused with
//!   Reciprocal Rank Fusion.
//! - **Feed**: a shuffled, seed-stable, paginated walk over every annotation
//!   a user owns.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Write path   │──▶│  Embedder   │──▶│   SQLite     │
//! │ books/notes  │   │ OpenAI/...  │   │ FTS5 + BLOB  │
//! └──────────────┘   └─────────────┘   └──────┬───────┘
//!                                             │
//!                      ┌──────────────────────┤
//!                      ▼                      ▼
//!                 ┌──────────┐          ┌──────────┐
//!                 │   CLI    │          │   HTTP   │
//!                 │  (marg)  │          │  (axum)  │
//!                 └──────────┘          └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! marg init
//! marg --user me book add "Moby-Dick" --author "Herman Melville"
//! marg --user me note add <book-id> "Call me Ishmael."
//! marg --user me search "ishmael" --mode hybrid
//! marg --user me feed --limit 5
//! marg serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Retrieval error taxonomy |
//! | [`fts`] | Query tokenization for full-text search |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Storage trait and in-memory backend |
//! | [`sqlite_store`] | SQLite storage backend |
//! | [`search`] | Full-text and hybrid search |
//! | [`feed`] | Seeded feed pagination |
//! | [`annotate`] | Book and annotation writes |
//! | [`embed_cmd`] | Embedding backfill |
//! | [`stats`] | Per-user statistics |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod annotate;
pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod error;
pub mod feed;
pub mod fts;
pub mod migrate;
pub mod models;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod stats;
pub mod store;
