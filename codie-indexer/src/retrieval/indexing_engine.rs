//! Orchestrates one indexing run from source tree to persisted records.
//!
//! ## Pipeline
//!
//! ```text
//!                      ┌─ worker ─┐      results ──→ collector ─┐
//! FileDiscovery → queue┼─ worker ─┼──→                          ├─→ RecordStore
//!                      └─ worker ─┘      errors  ──→ collector ─┘
//!                           │
//!              ChunkingStrategy → EmbeddingClient (shared RateLimiter)
//! ```
//!
//! Each worker takes one path at a time, chunks it, embeds all of its chunks
//! with a single `embed_batch` call and zips the vectors back onto the chunks
//! by position. A failing file becomes a [`FileError`] on the error channel and
//! never stops the other workers, with one exception: rejected credentials
//! stop every worker before its next file and fail the run with
//! [`IndexError::Auth`].
//!
//! The two collectors own their aggregates outright. The engine joins every
//! worker, then drops its own senders so both channels close, then joins the
//! collectors, so nothing a worker sent is lost to the shutdown.
//!
//! ## Observation
//!
//! [`IndexingEngine::subscribe`] yields a `watch` receiver for the
//! [`RunState`] and [`IndexingEngine::stats`] returns running counters.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use codie_embed::{EmbedError, EmbeddingClient};
use tokio::sync::{RwLock, watch};
use tracing::{debug, error, info, warn};

use super::chunking_strategy::{ChunkingConfig, ChunkingStrategy};
use super::discovery::FileDiscovery;
use super::run_state::RunState;
use crate::error::{FileError, IndexError};
use crate::storage::{CodeRecord, RecordStore};

/// Configuration for the indexing engine
#[derive(Debug, Clone)]
pub struct IndexingEngineConfig {
    /// Root of the source tree
    pub base_path: PathBuf,
    /// Number of concurrent file workers
    pub max_workers: usize,
    pub chunking_config: ChunkingConfig,
    /// Walk the tree with concurrent directory walkers
    pub parallel_discovery: bool,
    /// Walker budget for parallel discovery; zero means one per core
    pub discovery_workers: usize,
    pub discovery: FileDiscovery,
}

impl IndexingEngineConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            max_workers: 4,
            chunking_config: ChunkingConfig::default(),
            parallel_discovery: false,
            discovery_workers: 0,
            discovery: FileDiscovery::new(),
        }
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    /// Set the upper bound in bytes for paragraph chunks
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunking_config = self.chunking_config.with_max_chunk_size(size);
        self
    }

    pub fn with_syntax_chunking(mut self, enabled: bool) -> Self {
        self.chunking_config = self.chunking_config.with_syntax_aware(enabled);
        self
    }

    pub fn with_parallel_discovery(mut self, enabled: bool) -> Self {
        self.parallel_discovery = enabled;
        self
    }

    pub fn with_discovery(mut self, discovery: FileDiscovery) -> Self {
        self.discovery = discovery;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingStats {
    pub files_processed: usize,
    pub chunks_created: usize,
    pub embeddings_generated: usize,
    pub errors: usize,
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct IndexSummary {
    pub files_discovered: usize,
    pub records: usize,
    /// Per-file failures, in the order they were collected
    pub errors: Vec<FileError>,
    pub destination: String,
    pub elapsed: Duration,
}

impl IndexSummary {
    /// The first `limit` errors as display lines, followed by a count of the rest.
    pub fn error_preview(&self, limit: usize) -> Vec<String> {
        let mut lines: Vec<String> = self.errors.iter().take(limit).map(|e| e.to_string()).collect();
        if self.errors.len() > limit {
            lines.push(format!("... and {} more errors", self.errors.len() - limit));
        }
        lines
    }
}

struct WorkerContext {
    root: PathBuf,
    chunking: ChunkingStrategy,
    client: Arc<EmbeddingClient>,
    stats: Arc<RwLock<ProcessingStats>>,
    /// First credential rejection seen by any worker
    auth_failure: OnceLock<EmbedError>,
}

pub struct IndexingEngine {
    config: IndexingEngineConfig,
    client: Arc<EmbeddingClient>,
    store: Arc<dyn RecordStore>,
    state: watch::Sender<RunState>,
    stats: Arc<RwLock<ProcessingStats>>,
}

impl std::fmt::Debug for IndexingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexingEngine")
            .field("config", &self.config)
            .field("client", &self.client)
            .field("store", &self.store.describe())
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl IndexingEngine {
    pub fn new(
        config: IndexingEngineConfig,
        client: Arc<EmbeddingClient>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let (state, _) = watch::channel(RunState::Idle);
        Self {
            config,
            client,
            store,
            state,
            stats: Arc::new(RwLock::new(ProcessingStats::default())),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    pub async fn stats(&self) -> ProcessingStats {
        self.stats.read().await.clone()
    }

    fn transition(&self, next: RunState) {
        let previous = self.state.send_replace(next);
        debug_assert!(
            previous.can_transition_to(next),
            "invalid run state transition {previous} -> {next}"
        );
        debug!("Indexing run: {previous} -> {next}");
    }

    fn fail(&self, err: IndexError) -> IndexError {
        self.transition(RunState::Failed);
        err
    }

    /// Index the configured tree once. Every call starts from [`RunState::Idle`].
    pub async fn run(&self) -> Result<IndexSummary, IndexError> {
        let started = Instant::now();
        self.state.send_replace(RunState::Idle);
        *self.stats.write().await = ProcessingStats::default();

        self.transition(RunState::Discovering);
        let files = match self.discover().await {
            Ok(files) if files.is_empty() => {
                return Err(self.fail(IndexError::NoFiles {
                    root: self.config.base_path.clone(),
                }));
            }
            Ok(files) => files,
            Err(e) => return Err(self.fail(e)),
        };
        let files_discovered = files.len();
        info!(
            "Found {files_discovered} code files under {}",
            self.config.base_path.display()
        );

        self.transition(RunState::Dispatching);
        let (path_tx, path_rx) = flume::bounded::<PathBuf>(files_discovered);
        let (record_tx, record_rx) = flume::unbounded::<Vec<CodeRecord>>();
        let (error_tx, error_rx) = flume::unbounded::<FileError>();

        let record_collector = tokio::spawn(async move {
            let mut records = Vec::new();
            while let Ok(batch) = record_rx.recv_async().await {
                records.extend(batch);
            }
            records
        });
        let error_collector = tokio::spawn(async move {
            let mut errors = Vec::new();
            while let Ok(err) = error_rx.recv_async().await {
                errors.push(err);
            }
            errors
        });

        let context = Arc::new(WorkerContext {
            root: self.config.base_path.clone(),
            chunking: ChunkingStrategy::new(self.config.chunking_config.clone()),
            client: self.client.clone(),
            stats: self.stats.clone(),
            auth_failure: OnceLock::new(),
        });
        let worker_count = self.config.max_workers.clamp(1, files_discovered);
        info!("Starting {worker_count} indexing workers");
        let workers: Vec<_> = (0..worker_count)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    context.clone(),
                    path_rx.clone(),
                    record_tx.clone(),
                    error_tx.clone(),
                ))
            })
            .collect();
        drop(path_rx);

        // Capacity equals the file count, so enqueueing never waits.
        for path in files {
            if path_tx.send_async(path).await.is_err() {
                break;
            }
        }
        drop(path_tx);

        self.transition(RunState::Draining);
        let mut panicked = None;
        for worker in workers {
            if let Err(e) = worker.await {
                error!("Indexing worker panicked: {e}");
                panicked.get_or_insert_with(|| e.to_string());
            }
        }
        drop(record_tx);
        drop(error_tx);
        let records = record_collector.await;
        let errors = error_collector.await;
        let auth_failure = Arc::into_inner(context).and_then(|context| context.auth_failure.into_inner());

        self.transition(RunState::Persisting);
        let (records, errors) = match (records, errors, panicked) {
            (Ok(records), Ok(errors), None) => (records, errors),
            (Err(e), _, _) | (_, Err(e), _) => return Err(self.fail(e.into())),
            (_, _, Some(message)) => return Err(self.fail(IndexError::WorkerPanicked(message))),
        };
        if let Some(err) = auth_failure {
            error!("Embedding credentials rejected, abandoning the run after {} errors", errors.len());
            return Err(self.fail(IndexError::Auth(err)));
        }

        info!(
            "Processed {files_discovered} files: {} records, {} errors",
            records.len(),
            errors.len()
        );
        if records.is_empty() {
            return Err(self.fail(IndexError::NoRecords {
                errors: errors.len(),
            }));
        }

        if let Err(e) = self.store.replace_all(&records).await {
            return Err(self.fail(e.into()));
        }
        self.transition(RunState::Done);

        Ok(IndexSummary {
            files_discovered,
            records: records.len(),
            errors,
            destination: self.store.describe(),
            elapsed: started.elapsed(),
        })
    }

    async fn discover(&self) -> Result<Vec<PathBuf>, IndexError> {
        let discovery = self.config.discovery.clone();
        let root = self.config.base_path.clone();
        if self.config.parallel_discovery {
            Ok(discovery
                .discover_parallel(&root, self.config.discovery_workers)
                .await?)
        } else {
            Ok(tokio::task::spawn_blocking(move || discovery.discover(&root)).await??)
        }
    }
}

async fn worker_loop(
    id: usize,
    context: Arc<WorkerContext>,
    paths: flume::Receiver<PathBuf>,
    records: flume::Sender<Vec<CodeRecord>>,
    errors: flume::Sender<FileError>,
) {
    debug!("Worker {id} started");
    while let Ok(path) = paths.recv_async().await {
        if context.auth_failure.get().is_some() {
            debug!("Worker {id} stopping after a credential rejection");
            break;
        }
        match process_file(&context, &path).await {
            Ok(batch) => {
                let mut stats = context.stats.write().await;
                stats.files_processed += 1;
                stats.embeddings_generated += batch.len();
                drop(stats);
                if !batch.is_empty() && records.send(batch).is_err() {
                    warn!("Worker {id}: record collector is gone, dropping records for {}", path.display());
                }
            }
            Err(err) => {
                warn!("{err}");
                context.stats.write().await.errors += 1;
                if let Err(flume::SendError(err)) = errors.send(err) {
                    warn!("Worker {id}: error collector is gone, dropping: {err}");
                }
            }
        }
    }
    debug!("Worker {id} finished");
}

fn record_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

async fn process_file(context: &WorkerContext, path: &Path) -> Result<Vec<CodeRecord>, FileError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| FileError::read(path, &e))?;

    let chunks = context.chunking.chunk_content(path, &content);
    context.stats.write().await.chunks_created += chunks.len();
    if chunks.is_empty() {
        debug!("No chunks in {}", path.display());
        return Ok(Vec::new());
    }

    let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
    let batch = context
        .client
        .embed_batch(&texts, context.client.batch_size())
        .await
        .map_err(|e| {
            let failure = FileError::embedding(path, &e);
            if e.is_auth() {
                error!("Embedding credentials rejected while indexing {}", path.display());
                context.auth_failure.get_or_init(|| e);
            }
            failure
        })?;

    if batch.lost > 0 {
        warn!(
            "{} of {} chunks in {} were not embedded",
            batch.lost,
            chunks.len(),
            path.display()
        );
    }

    let file = record_path(&context.root, path);
    let records = chunks
        .into_iter()
        .zip(batch.vectors)
        .filter_map(|(chunk, vector)| {
            vector.and_then(|vector| CodeRecord::new(file.clone(), chunk.text, vector))
        })
        .collect();
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::JsonRecordStore;
    use codie_embed::{EmbedConfig, MockProvider, RateLimiter, RecordingSleeper, RetryConfig, RetryPolicy};
    use tempfile::tempdir;
    use tracing_test::traced_test;

    fn mock_client(provider: Arc<MockProvider>, max_concurrent: usize) -> Arc<EmbeddingClient> {
        let config = EmbedConfig::new("test-key");
        let retry = RetryPolicy::new(config.retry).with_sleeper(Arc::new(RecordingSleeper::new()));
        Arc::new(
            EmbeddingClient::new(provider, Arc::new(RateLimiter::unlimited(max_concurrent)), &config)
                .with_retry_policy(retry),
        )
    }

    fn write(root: &Path, relative: &str, content: &[u8]) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_state_sequence_and_stats() -> anyhow::Result<()> {
        let src = tempdir()?;
        write(src.path(), "a.py", b"def a():\n    return 1\n\n\ndef b():\n    return 2\n");
        write(src.path(), "pkg/c.rs", b"fn c() {}\n");
        let out = tempdir()?;

        let provider = Arc::new(MockProvider::new(4));
        let engine = IndexingEngine::new(
            IndexingEngineConfig::new(src.path()).with_max_workers(2),
            mock_client(provider.clone(), 2),
            Arc::new(JsonRecordStore::new(out.path().join("embeddings.json"))),
        );

        let mut states = engine.subscribe();
        let initial = *states.borrow_and_update();
        let observer = tokio::spawn(async move {
            let mut seen = vec![initial];
            while states.changed().await.is_ok() {
                let state = *states.borrow_and_update();
                seen.push(state);
                if state.is_terminal() {
                    break;
                }
            }
            seen
        });

        let summary = engine.run().await?;
        assert_eq!(summary.files_discovered, 2);
        assert_eq!(summary.records, 3);
        assert!(summary.errors.is_empty());
        assert_eq!(engine.state(), RunState::Done);

        let stats = engine.stats().await;
        assert_eq!(
            stats,
            ProcessingStats {
                files_processed: 2,
                chunks_created: 3,
                embeddings_generated: 3,
                errors: 0,
            }
        );

        let seen = observer.await?;
        assert_eq!(seen.first(), Some(&RunState::Idle));
        assert_eq!(seen.last(), Some(&RunState::Done));
        Ok(())
    }

    #[tokio::test]
    async fn test_no_files_fails_during_discovery() {
        let src = tempdir().unwrap();
        write(src.path(), "README.md", b"# nothing to index");
        let out = tempdir().unwrap();

        let engine = IndexingEngine::new(
            IndexingEngineConfig::new(src.path()),
            mock_client(Arc::new(MockProvider::new(4)), 1),
            Arc::new(JsonRecordStore::new(out.path().join("embeddings.json"))),
        );

        let err = engine.run().await.unwrap_err();
        assert!(matches!(err, IndexError::NoFiles { .. }));
        assert_eq!(engine.state(), RunState::Failed);
        assert!(!out.path().join("embeddings.json").exists());
    }

    #[tokio::test]
    async fn test_unreadable_file_is_recorded_not_fatal() -> anyhow::Result<()> {
        let src = tempdir()?;
        write(src.path(), "good.go", b"func Good() {}\n");
        write(src.path(), "bad.go", &[0xff, 0xfe, 0x00, 0x80]);
        let out = tempdir()?;

        let engine = IndexingEngine::new(
            IndexingEngineConfig::new(src.path()).with_parallel_discovery(true),
            mock_client(Arc::new(MockProvider::new(4)), 2),
            Arc::new(JsonRecordStore::new(out.path().join("embeddings.json"))),
        );

        let summary = engine.run().await?;
        assert_eq!(summary.records, 1);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].path.ends_with("bad.go"));
        assert_eq!(summary.errors[0].kind, crate::error::FileErrorKind::Read);
        assert_eq!(engine.stats().await.errors, 1);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_embedding_concurrency_is_bounded() -> anyhow::Result<()> {
        let src = tempdir()?;
        for i in 0..24 {
            write(src.path(), &format!("f{i}.go"), format!("func F{i}() {{}}\n").as_bytes());
        }
        let out = tempdir()?;

        let provider = Arc::new(MockProvider::new(4).with_delay(Duration::from_millis(5)));
        let engine = IndexingEngine::new(
            IndexingEngineConfig::new(src.path()).with_max_workers(16),
            mock_client(provider.clone(), 3),
            Arc::new(JsonRecordStore::new(out.path().join("embeddings.json"))),
        );

        let summary = engine.run().await?;
        assert_eq!(summary.records, 24);
        assert_eq!(provider.calls(), 24);
        assert!(provider.peak_in_flight() <= 3, "peak {}", provider.peak_in_flight());
        Ok(())
    }

    #[tokio::test]
    async fn test_every_file_failing_is_no_records() {
        let src = tempdir().unwrap();
        write(src.path(), "a.go", b"func A() {}\n");
        write(src.path(), "b.go", b"func B() {}\n");
        let out = tempdir().unwrap();

        let provider = Arc::new(
            MockProvider::new(4).with_failure(|_| Some(EmbedError::transient("connection reset"))),
        );
        let engine = IndexingEngine::new(
            IndexingEngineConfig::new(src.path()),
            mock_client(provider, 2),
            Arc::new(JsonRecordStore::new(out.path().join("embeddings.json"))),
        );

        match engine.run().await {
            Err(IndexError::NoRecords { errors }) => assert_eq!(errors, 2),
            other => panic!("expected NoRecords, got {other:?}"),
        }
        assert_eq!(engine.state(), RunState::Failed);
    }

    #[tokio::test]
    async fn test_rejected_credentials_fail_the_run() {
        let src = tempdir().unwrap();
        for name in ["a.go", "b.go", "c.go", "d.go"] {
            write(src.path(), name, format!("func {}() {{}}\n", name.to_uppercase()).as_bytes());
        }
        let out = tempdir().unwrap();

        let provider =
            Arc::new(MockProvider::new(4).with_failure(|_| Some(EmbedError::auth("invalid api key"))));
        let engine = IndexingEngine::new(
            IndexingEngineConfig::new(src.path()).with_max_workers(1),
            mock_client(provider.clone(), 1),
            Arc::new(JsonRecordStore::new(out.path().join("embeddings.json"))),
        );

        match engine.run().await {
            Err(IndexError::Auth(err)) => assert!(err.is_auth()),
            other => panic!("expected Auth, got {other:?}"),
        }
        assert_eq!(engine.state(), RunState::Failed);
        // Only the first file is attempted once the credentials are rejected.
        assert_eq!(provider.calls(), RetryConfig::default().max_attempts as usize);
        assert_eq!(engine.stats().await.errors, 1);
        assert!(!out.path().join("embeddings.json").exists());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_worker_warns_when_collectors_are_gone() {
        let src = tempdir().unwrap();
        write(src.path(), "good.go", b"func Good() {}\n");
        write(src.path(), "bad.go", &[0xff, 0xfe, 0x00, 0x80]);

        let context = Arc::new(WorkerContext {
            root: src.path().to_path_buf(),
            chunking: ChunkingStrategy::new(ChunkingConfig::default()),
            client: mock_client(Arc::new(MockProvider::new(4)), 1),
            stats: Arc::new(RwLock::new(ProcessingStats::default())),
            auth_failure: OnceLock::new(),
        });
        let (path_tx, path_rx) = flume::unbounded();
        path_tx.send(src.path().join("good.go")).unwrap();
        path_tx.send(src.path().join("bad.go")).unwrap();
        drop(path_tx);
        let (record_tx, record_rx) = flume::unbounded();
        let (error_tx, error_rx) = flume::unbounded();
        drop(record_rx);
        drop(error_rx);

        worker_loop(0, context.clone(), path_rx, record_tx, error_tx).await;

        assert!(logs_contain("record collector is gone"));
        assert!(logs_contain("error collector is gone"));
        let stats = context.stats.read().await.clone();
        assert_eq!((stats.files_processed, stats.errors), (1, 1));
    }

    #[test]
    fn test_error_preview_is_bounded() {
        let io = std::io::Error::other("boom");
        let summary = IndexSummary {
            files_discovered: 5,
            records: 1,
            errors: (0..5).map(|i| FileError::read(format!("f{i}.go"), &io)).collect(),
            destination: "json file out.json".to_string(),
            elapsed: Duration::from_secs(1),
        };

        let preview = summary.error_preview(2);
        assert_eq!(preview.len(), 3);
        assert_eq!(preview[0], "Failed to read f0.go: boom");
        assert_eq!(preview[2], "... and 3 more errors");
        assert_eq!(summary.error_preview(10).len(), 5);
    }

    #[test]
    fn test_record_path_is_relative_to_root() {
        let root = Path::new("/repo");
        assert_eq!(record_path(root, Path::new("/repo/src/main.go")), "src/main.go");
        assert_eq!(record_path(root, Path::new("/elsewhere/x.go")), "/elsewhere/x.go");
    }
}
