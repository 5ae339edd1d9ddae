//! `marg embed pending` and `marg embed rebuild`.
//!
//! Both commands walk annotations in batches of `embedding.batch_size` and
//! store one vector per transcript. A failed batch is logged and counted;
//! the remaining batches still run.

use anyhow::{bail, Result};
use tracing::warn;

use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::sqlite_store::SqliteStore;
use crate::store::{AnnotationStore, PendingEmbedding};

/// Outcome of one backfill run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbedReport {
    pub total: u64,
    pub embedded: u64,
    pub failed: u64,
}

/// Embed `pending` in batches and store the vectors.
pub async fn backfill(
    store: &dyn AnnotationStore,
    provider: &dyn EmbeddingProvider,
    pending: &[PendingEmbedding],
    batch_size: usize,
) -> Result<EmbedReport> {
    let model = provider.model_name().to_string();
    let mut report = EmbedReport {
        total: pending.len() as u64,
        ..EmbedReport::default()
    };

    for batch in pending.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|p| p.transcript.clone()).collect();

        let vectors = match provider.embed(&texts).await {
            Ok(v) if v.len() == batch.len() => v,
            Ok(v) => {
                warn!(expected = batch.len(), got = v.len(), "embedding batch size mismatch");
                report.failed += batch.len() as u64;
                continue;
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), size = batch.len(), "embedding batch failed");
                report.failed += batch.len() as u64;
                continue;
            }
        };

        for (item, vec) in batch.iter().zip(vectors.iter()) {
            if provider.dims() > 0 && vec.len() != provider.dims() {
                warn!(id = %item.id, got = vec.len(), expected = provider.dims(), "dimension mismatch");
                report.failed += 1;
                continue;
            }
            store.set_embedding(&item.id, vec, &model).await?;
            report.embedded += 1;
        }
    }

    Ok(report)
}

async fn open(config: &Config) -> Result<(SqliteStore, Box<dyn EmbeddingProvider>)> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }
    let provider = embedding::create_provider(&config.embedding)?;
    Ok((SqliteStore::open(config).await?, provider))
}

fn print_report(title: &str, report: &EmbedReport) {
    println!("{}", title);
    println!("  total: {}", report.total);
    println!("  embedded: {}", report.embedded);
    println!("  failed: {}", report.failed);
}

/// Embed annotations that have no vector or one from a different model.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    let (store, provider) = open(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    let pending = store
        .annotations_needing_embedding(provider.model_name(), limit)
        .await?;

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  annotations needing embeddings: {}", pending.len());
    } else if pending.is_empty() {
        println!("embed pending");
        println!("  all annotations up to date");
    } else {
        let report = backfill(&store, provider.as_ref(), &pending, batch_size).await?;
        print_report("embed pending", &report);
    }

    store.pool().close().await;
    Ok(())
}

/// Clear every stored embedding and regenerate all of them.
pub async fn run_embed_rebuild(config: &Config, batch_size_override: Option<usize>) -> Result<()> {
    let (store, provider) = open(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    let cleared = store.clear_embeddings().await?;
    println!("embed rebuild: cleared {} embeddings", cleared);

    let all = store
        .annotations_needing_embedding(provider.model_name(), None)
        .await?;
    let report = backfill(&store, provider.as_ref(), &all, batch_size).await?;
    print_report("embed rebuild", &report);

    store.pool().close().await;
    Ok(())
}
