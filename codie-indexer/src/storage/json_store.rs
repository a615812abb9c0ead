//! File-based sink: the whole record set as one indented JSON array.
//!
//! The document is written to a temporary file in the target's directory and
//! then renamed over the target, so readers see either the previous artifact
//! or the complete new one.

use super::{CodeRecord, RecordStore};
use crate::error::StoreError;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, Clone)]
pub struct JsonRecordStore {
    path: PathBuf,
}

impl JsonRecordStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back a previously written artifact.
    pub fn load(&self) -> Result<Vec<CodeRecord>, StoreError> {
        let source = std::fs::read_to_string(&self.path).map_err(|source| self.io_error(source))?;
        Ok(serde_json::from_str(&source)?)
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn write_atomically(&self, document: &[u8]) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;

        let mut staged = NamedTempFile::new_in(&dir).map_err(|e| self.io_error(e))?;
        staged.write_all(document).map_err(|e| self.io_error(e))?;
        staged.flush().map_err(|e| self.io_error(e))?;
        staged
            .persist(&self.path)
            .map_err(|e| self.io_error(e.error))?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for JsonRecordStore {
    async fn replace_all(&self, records: &[CodeRecord]) -> Result<(), StoreError> {
        let document = serde_json::to_vec_pretty(records)?;
        self.write_atomically(&document)?;
        tracing::info!("Wrote {} records to {}", records.len(), self.path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("json file {}", self.path.display())
    }
}
