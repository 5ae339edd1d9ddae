//! # Marginalia CLI (`marg`)
//!
//! Commands for database setup, recording books and annotations, search,
//! the seeded feed, embedding maintenance, statistics, and the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! marg --config ./config/marginalia.toml --user <id> <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `marg init` | Create the SQLite database and run schema migrations |
//! | `marg book add "<title>"` | Add a book |
//! | `marg book list` | List your books |
//! | `marg note add <book-id> "<text>"` | Record an annotation |
//! | `marg note edit <id> "<text>"` | Replace an annotation's transcript |
//! | `marg note delete <id>` | Delete an annotation |
//! | `marg search "<query>"` | Full-text or hybrid search |
//! | `marg feed` | One page of the shuffled feed |
//! | `marg embed pending` | Backfill missing or stale embeddings |
//! | `marg embed rebuild` | Clear and regenerate all embeddings |
//! | `marg stats` | Counts and recent activity |
//! | `marg serve` | Start the HTTP server |

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use marginalia::feed::FeedRequest;
use marginalia::models::{NewAnnotation, UserId};
use marginalia::search::SearchRequest;
use marginalia::{annotate, config, embed_cmd, feed, migrate, search, server, stats};

/// Marginalia CLI: search and browse your reading notes.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/marginalia.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "marg",
    about = "Marginalia: hybrid search and a shuffled feed over your reading notes",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/marginalia.toml")]
    config: PathBuf,

    /// User whose books and annotations the command acts on.
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file, the books and annotations tables,
    /// and the full-text index. Safe to run repeatedly.
    Init,

    /// Manage books.
    Book {
        #[command(subcommand)]
        action: BookAction,
    },

    /// Record, edit, or delete annotations.
    Note {
        #[command(subcommand)]
        action: NoteAction,
    },

    /// Search annotation transcripts.
    Search {
        /// The search query string.
        query: String,

        /// Search mode: `fts` (full-text) or `hybrid` (full-text + vector, RRF).
        /// Hybrid mode requires an embedding provider to be configured.
        #[arg(long, default_value = "fts")]
        mode: String,

        /// Maximum cosine distance for vector matches (hybrid only).
        #[arg(long)]
        threshold: Option<f64>,

        /// Show how each hit was ranked.
        #[arg(long)]
        explain: bool,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show one page of the shuffled feed.
    ///
    /// Pass the printed seed back with `--seed` to continue the same order.
    Feed {
        #[arg(long)]
        offset: Option<i64>,

        #[arg(long)]
        limit: Option<i64>,

        #[arg(long)]
        seed: Option<String>,

        /// Print the page as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Manage embedding vectors.
    ///
    /// Requires an embedding provider (e.g., OpenAI) to be configured.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Show counts and per-day activity.
    Stats {
        /// How many days of activity to show.
        #[arg(long, default_value_t = 30)]
        days: u32,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum BookAction {
    /// Add a book.
    Add {
        title: String,
        #[arg(long, default_value = "")]
        author: String,
    },
    /// List your books.
    List,
}

#[derive(Subcommand)]
enum NoteAction {
    /// Record an annotation against one of your books.
    Add {
        book_id: String,
        transcript: String,
        #[arg(long)]
        page: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        footnotes: Option<String>,
        #[arg(long)]
        audio_url: Option<String>,
        #[arg(long)]
        image_url: Option<String>,
    },
    /// Replace an annotation's transcript (re-embeds and re-indexes it).
    Edit { id: String, transcript: String },
    /// Delete an annotation.
    Delete { id: String },
}

#[derive(Subcommand)]
enum EmbedAction {
    /// Embed annotations that have no vector or one from another model.
    Pending {
        /// Maximum number of annotations to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config (number of texts per API call).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },

    /// Clear and regenerate all embeddings.
    ///
    /// Useful when switching embedding models or dimensions.
    Rebuild {
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

fn require_user(raw: Option<&str>) -> Result<UserId> {
    raw.and_then(UserId::parse)
        .context("this command needs --user <id>")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let user = cli.user.as_deref();

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Book { action } => {
            let user = require_user(user)?;
            match action {
                BookAction::Add { title, author } => {
                    annotate::run_book_add(&cfg, &user, &title, &author).await?;
                }
                BookAction::List => {
                    annotate::run_book_list(&cfg, &user).await?;
                }
            }
        }
        Commands::Note { action } => {
            let user = require_user(user)?;
            match action {
                NoteAction::Add {
                    book_id,
                    transcript,
                    page,
                    location,
                    footnotes,
                    audio_url,
                    image_url,
                } => {
                    let new = NewAnnotation {
                        book_id,
                        transcript,
                        audio_url,
                        image_url,
                        page_number: page,
                        location,
                        footnotes,
                    };
                    annotate::run_note_add(&cfg, &user, new).await?;
                }
                NoteAction::Edit { id, transcript } => {
                    annotate::run_note_edit(&cfg, &user, &id, &transcript).await?;
                }
                NoteAction::Delete { id } => {
                    annotate::run_note_delete(&cfg, &user, &id).await?;
                }
            }
        }
        Commands::Search {
            query,
            mode,
            threshold,
            explain,
            json,
        } => {
            let user = require_user(user)?;
            let req = SearchRequest {
                query: &query,
                mode: &mode,
                threshold,
                explain,
            };
            search::run_search(&cfg, &user, &req, json).await?;
        }
        Commands::Feed {
            offset,
            limit,
            seed,
            json,
        } => {
            let user = require_user(user)?;
            let req = FeedRequest {
                offset,
                limit,
                seed,
            };
            feed::run_feed(&cfg, &user, req, json).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
            EmbedAction::Rebuild { batch_size } => {
                embed_cmd::run_embed_rebuild(&cfg, batch_size).await?;
            }
        },
        Commands::Stats { days } => {
            let user = require_user(user)?;
            stats::run_stats(&cfg, &user, days).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
