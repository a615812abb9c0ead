//! Source chunking for codie.
//!
//! [`ChunkerRegistry`] is the entry point: it picks a tree-sitter splitter by
//! file extension and falls back to [`ParagraphChunker`] for everything else.
pub mod registry;
pub mod syntax;
pub mod text;

pub use registry::{ChunkerRegistry, SpanSplitter};
pub use syntax::{ChunkError, Grammar, SpanKind, SyntaxChunker, SyntaxSpan};
pub use text::{Chunk, DEFAULT_MAX_CHUNK_SIZE, ParagraphChunker};
