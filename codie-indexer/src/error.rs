//! Error types for discovery, persistence and indexing runs

use codie_embed::EmbedError;
use std::path::PathBuf;

/// The source tree could not be walked.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Root directory not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("Not a directory: {}", .path.display())]
    NotADirectory { path: PathBuf },

    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory walk failed: {message}")]
    Walk { message: String },
}

/// The final artifact could not be written or read back.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize records: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileErrorKind {
    Read,
    Embedding,
}

impl FileErrorKind {
    fn verb(&self) -> &'static str {
        match self {
            FileErrorKind::Read => "Failed to read",
            FileErrorKind::Embedding => "Failed to embed",
        }
    }
}

/// A single file's failure. Recorded and reported, never fatal.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{} {}: {message}", .kind.verb(), .path.display())]
pub struct FileError {
    pub path: PathBuf,
    pub kind: FileErrorKind,
    pub message: String,
}

impl FileError {
    pub fn read(path: impl Into<PathBuf>, source: &std::io::Error) -> Self {
        Self {
            path: path.into(),
            kind: FileErrorKind::Read,
            message: source.to_string(),
        }
    }

    pub fn embedding(path: impl Into<PathBuf>, source: &EmbedError) -> Self {
        Self {
            path: path.into(),
            kind: FileErrorKind::Embedding,
            message: source.to_string(),
        }
    }
}

/// Settings file problems.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Run-level failures that abort an indexing pass.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("No source files found under {}", .root.display())]
    NoFiles { root: PathBuf },

    #[error("{0}")]
    Auth(EmbedError),

    #[error("Embedding client setup failed: {0}")]
    Embedding(EmbedError),

    #[error("No code chunks were processed successfully ({errors} errors)")]
    NoRecords { errors: usize },

    #[error(transparent)]
    Persist(#[from] StoreError),

    #[error("Indexing worker panicked: {0}")]
    WorkerPanicked(String),
}

impl From<EmbedError> for IndexError {
    fn from(err: EmbedError) -> Self {
        if err.is_auth() {
            IndexError::Auth(err)
        } else {
            IndexError::Embedding(err)
        }
    }
}

impl From<tokio::task::JoinError> for IndexError {
    fn from(err: tokio::task::JoinError) -> Self {
        IndexError::WorkerPanicked(err.to_string())
    }
}
