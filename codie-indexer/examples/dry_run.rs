//! Index a directory with the deterministic mock provider instead of a remote
//! endpoint. Useful for checking discovery and chunking on a real tree.
//!
//! ```text
//! cargo run -p codie-indexer --example dry_run -- path/to/repo
//! ```
use anyhow::Result;
use codie_embed::{EmbedConfig, EmbeddingClient, MockProvider, RateLimiter};
use codie_indexer::retrieval::indexing_engine::{IndexingEngine, IndexingEngineConfig};
use codie_indexer::storage::JsonRecordStore;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::tempdir;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let root = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let out = tempdir()?;
    let output = out.path().join("embeddings.json");

    let config = EmbedConfig::new("dry-run");
    let client = EmbeddingClient::new(
        Arc::new(MockProvider::new(32)),
        Arc::new(RateLimiter::unlimited(8)),
        &config,
    );
    let engine = IndexingEngine::new(
        IndexingEngineConfig::new(&root).with_parallel_discovery(true),
        Arc::new(client),
        Arc::new(JsonRecordStore::new(&output)),
    );

    let summary = engine.run().await?;
    let stats = engine.stats().await;
    println!(
        "{} files, {} chunks, {} records, {} errors in {:.2}s",
        summary.files_discovered,
        stats.chunks_created,
        summary.records,
        summary.errors.len(),
        summary.elapsed.as_secs_f64()
    );
    for line in summary.error_preview(5) {
        println!("  {line}");
    }

    let records = JsonRecordStore::new(&output).load()?;
    for record in records.iter().take(5) {
        let first_line = record.content.lines().next().unwrap_or_default();
        println!("{}: {first_line}", record.file);
    }
    Ok(())
}
