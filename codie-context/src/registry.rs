//! Extension-keyed dispatch between syntax-aware and paragraph chunking.
use crate::syntax::{ChunkError, Grammar, SyntaxChunker};
use crate::text::{Chunk, ParagraphChunker};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

/// A strategy that splits one file's content into chunks.
///
/// Implementations must be deterministic: splitting the same content twice
/// yields the same chunks.
pub trait SpanSplitter: Send + Sync {
    fn name(&self) -> &str;

    /// Split `source` into ordered chunks. `max_size` is a byte bound that
    /// splitters producing atomic units may ignore.
    fn split(&self, source: &str, max_size: usize) -> Result<Vec<Chunk>, ChunkError>;
}

impl SpanSplitter for ParagraphChunker {
    fn name(&self) -> &str {
        "paragraph"
    }

    fn split(&self, source: &str, max_size: usize) -> Result<Vec<Chunk>, ChunkError> {
        Ok(ParagraphChunker::split(self, source, max_size))
    }
}

impl SpanSplitter for SyntaxChunker {
    fn name(&self) -> &str {
        self.grammar().name()
    }

    fn split(&self, source: &str, _max_size: usize) -> Result<Vec<Chunk>, ChunkError> {
        SyntaxChunker::split(self, source)
    }
}

/// Chooses a splitter per file and falls back to paragraph chunking.
///
/// Chunking through the registry never fails. A splitter error, or a splitter
/// that finds nothing, sends the file down the paragraph path instead.
#[derive(Clone)]
pub struct ChunkerRegistry {
    splitters: HashMap<String, Arc<dyn SpanSplitter>>,
    fallback: ParagraphChunker,
}

impl Default for ChunkerRegistry {
    fn default() -> Self {
        Self::with_default_grammars()
    }
}

impl std::fmt::Debug for ChunkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkerRegistry")
            .field("extensions", &self.supported_extensions())
            .finish()
    }
}

impl ChunkerRegistry {
    /// A registry with no syntax-aware splitters; every file is paragraph-chunked.
    pub fn paragraph_only() -> Self {
        Self {
            splitters: HashMap::new(),
            fallback: ParagraphChunker,
        }
    }

    /// A registry with every built-in grammar registered.
    pub fn with_default_grammars() -> Self {
        let mut registry = Self::paragraph_only();
        for grammar in Grammar::ALL {
            let splitter: Arc<dyn SpanSplitter> = Arc::new(SyntaxChunker::new(grammar));
            for extension in grammar.extensions() {
                registry.register(extension, splitter.clone());
            }
        }
        registry
    }

    /// Register `splitter` for files ending in `extension` (case-insensitive).
    pub fn register(&mut self, extension: &str, splitter: Arc<dyn SpanSplitter>) {
        let key = extension.trim_start_matches('.').to_ascii_lowercase();
        self.splitters.insert(key, splitter);
    }

    pub fn splitter_for(&self, path: &Path) -> Option<Arc<dyn SpanSplitter>> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        self.splitters.get(&extension).cloned()
    }

    pub fn supported_extensions(&self) -> Vec<&str> {
        let mut extensions: Vec<&str> = self.splitters.keys().map(String::as_str).collect();
        extensions.sort_unstable();
        extensions
    }

    /// Chunk one file's content.
    ///
    /// Returned chunks carry the file name, are numbered from zero, and are
    /// never empty after trimming.
    pub fn chunk_file(&self, path: &Path, content: &str, max_size: usize) -> Vec<Chunk> {
        let chunks = match self.splitter_for(path) {
            Some(splitter) => match splitter.split(content, max_size) {
                Ok(chunks) if !chunks.is_empty() => chunks,
                Ok(_) => {
                    debug!(
                        "{} splitter found no definitions in {}, using paragraphs",
                        splitter.name(),
                        path.display()
                    );
                    self.fallback.split(content, max_size)
                }
                Err(e) => {
                    warn!(
                        "{} splitter failed on {}: {e}; using paragraphs",
                        splitter.name(),
                        path.display()
                    );
                    self.fallback.split(content, max_size)
                }
            },
            None => self.fallback.split(content, max_size),
        };

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());

        chunks
            .into_iter()
            .filter(|chunk| !chunk.text.trim().is_empty())
            .enumerate()
            .map(|(sequence, mut chunk)| {
                chunk.sequence = sequence;
                chunk.file_name = file_name.clone();
                chunk
            })
            .collect()
    }
}
