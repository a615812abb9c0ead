//! Persistence for the records produced by an indexing run
//!
//! An indexing run ends with exactly one call to [`RecordStore::replace_all`].
//! Every sink replaces what the previous run wrote; nothing is merged.
//!
//! ```text
//! RecordStore ─┬─ JsonRecordStore   (one indented JSON array, atomic overwrite)
//!              └─ SqliteRecordStore (one row per chunk, grouped under an index name)
//! ```

use crate::config::{OutputSection, SinkKind};
use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub mod json_store;
pub mod sqlite_store;

pub use json_store::JsonRecordStore;
pub use sqlite_store::SqliteRecordStore;

/// One chunk of one file together with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeRecord {
    pub file: String,
    pub content: String,
    pub embedding: Vec<f32>,
}

impl CodeRecord {
    /// Returns `None` for an empty embedding; such a chunk is never persisted.
    pub fn new(file: impl Into<String>, content: impl Into<String>, embedding: Vec<f32>) -> Option<Self> {
        if embedding.is_empty() {
            return None;
        }
        Some(Self {
            file: file.into(),
            content: content.into(),
            embedding,
        })
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Replace everything a previous run stored with `records`.
    async fn replace_all(&self, records: &[CodeRecord]) -> Result<(), StoreError>;

    /// Human-readable destination, used in log lines and the run summary
    fn describe(&self) -> String;
}

/// Open the sink selected by the `[output]` settings.
pub async fn open_store(output: &OutputSection) -> Result<Arc<dyn RecordStore>, StoreError> {
    let store: Arc<dyn RecordStore> = match output.sink {
        SinkKind::Json => Arc::new(JsonRecordStore::new(&output.path)),
        SinkKind::Sqlite => {
            Arc::new(SqliteRecordStore::open(&output.path, output.index_name.clone()).await?)
        }
    };
    tracing::debug!("Using record store: {}", store.describe());
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_embedding_is_rejected() {
        assert!(CodeRecord::new("a.go", "func a() {}", Vec::new()).is_none());
        let record = CodeRecord::new("a.go", "func a() {}", vec![0.5]).unwrap();
        assert_eq!(record.embedding, vec![0.5]);
    }

    #[test]
    fn test_record_json_shape() {
        let record = CodeRecord::new("src/a.py", "def a(): pass", vec![1.0, -0.25]).unwrap();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"file": "src/a.py", "content": "def a(): pass", "embedding": [1.0, -0.25]})
        );
    }

    #[tokio::test]
    async fn test_open_store_selects_sink() {
        let dir = tempfile::tempdir().unwrap();
        let json = OutputSection {
            path: dir.path().join("out.json"),
            ..OutputSection::default()
        };
        assert!(open_store(&json).await.unwrap().describe().contains("out.json"));

        let sqlite = OutputSection {
            sink: SinkKind::Sqlite,
            path: dir.path().join("out.db"),
            ..OutputSection::default()
        };
        let store = open_store(&sqlite).await.unwrap();
        assert!(store.describe().contains("codebase:chunks"));
    }
}
