use clap::{Parser, Subcommand};
use codie_embed::EmbeddingClient;
use codie_indexer::config::{IndexerSettings, SinkKind};
use codie_indexer::error::IndexError;
use codie_indexer::retrieval::indexing_engine::{IndexingEngine, IndexingEngineConfig};
use codie_indexer::storage::open_store;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Index a source tree into embedded code chunks.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, args_conflicts_with_subcommands = true)]
struct Args {
    #[command(flatten)]
    index: IndexArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Index a directory (the default when no subcommand is given)
    Index(IndexArgs),
}

#[derive(clap::Args, Debug)]
struct IndexArgs {
    /// Root directory to index
    #[arg(default_value = ".")]
    directory: PathBuf,

    /// Settings file (defaults to ./codie.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where to write the records
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Record sink
    #[arg(long, value_enum)]
    sink: Option<SinkKind>,

    /// Index collection name for the sqlite sink
    #[arg(long)]
    index_name: Option<String>,

    /// Number of concurrent file workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Upper bound in bytes for paragraph chunks
    #[arg(long)]
    max_chunk_size: Option<usize>,

    /// Texts per embedding request
    #[arg(long)]
    batch_size: Option<usize>,

    /// Embedding model name
    #[arg(long)]
    model: Option<String>,

    /// Walk the tree with concurrent directory walkers
    #[arg(long)]
    parallel_discovery: bool,

    /// Split every file into paragraphs, ignoring syntax
    #[arg(long)]
    paragraph_only: bool,

    /// Skip the credential probe before indexing
    #[arg(long)]
    skip_verify: bool,
}

impl IndexArgs {
    fn apply(&self, settings: &mut IndexerSettings) {
        if let Some(output) = &self.output {
            settings.output.path = output.clone();
        }
        if let Some(sink) = self.sink {
            settings.output.sink = sink;
        }
        if let Some(index_name) = &self.index_name {
            settings.output.index_name = index_name.clone();
        }
        if let Some(workers) = self.workers {
            settings.indexing.workers = Some(workers);
        }
        if let Some(size) = self.max_chunk_size {
            settings.indexing.max_chunk_size = size;
        }
        if let Some(batch_size) = self.batch_size {
            settings.embedding.batch_size = batch_size;
        }
        if let Some(model) = &self.model {
            settings.embedding.model = model.clone();
        }
        if self.parallel_discovery {
            settings.indexing.parallel_discovery = true;
        }
        if self.paragraph_only {
            settings.indexing.syntax_chunking = false;
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let index = match args.command {
        Some(Commands::Index(index)) => index,
        None => args.index,
    };

    let mut settings = IndexerSettings::load(index.config.as_deref())?;
    settings.apply_env();
    index.apply(&mut settings);

    // A missing credential is fatal before any file is read.
    let embed_config = settings.embed_config();
    let client = EmbeddingClient::from_config(&embed_config).map_err(IndexError::from)?;
    if !index.skip_verify {
        client
            .verify_credentials()
            .await
            .map_err(IndexError::from)?;
        info!("Embedding credentials verified for model {}", embed_config.model);
    }

    let store = open_store(&settings.output).await?;
    let engine_config = IndexingEngineConfig::new(&index.directory)
        .with_max_workers(settings.worker_count())
        .with_chunk_size(settings.indexing.max_chunk_size)
        .with_syntax_chunking(settings.indexing.syntax_chunking)
        .with_parallel_discovery(settings.indexing.parallel_discovery);
    let engine = IndexingEngine::new(engine_config, Arc::new(client), store);

    let summary = engine.run().await?;

    if !summary.errors.is_empty() {
        println!("Encountered {} errors:", summary.errors.len());
        for line in summary.error_preview(settings.indexing.error_preview) {
            println!("  {line}");
        }
    }
    println!(
        "Successfully processed {} code chunks from {} files",
        summary.records, summary.files_discovered
    );
    println!("Embeddings saved to {}", summary.destination);
    println!("Total indexing time: {:.2}s", summary.elapsed.as_secs_f64());
    Ok(())
}
