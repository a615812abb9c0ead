use codie_context::{Chunk, ChunkerRegistry, DEFAULT_MAX_CHUNK_SIZE};
use std::path::Path;

/// Configuration for chunking files
#[derive(Debug, Clone)]
pub struct ChunkingConfig {
    /// Maximum size of each paragraph chunk in bytes
    pub max_chunk_size: usize,
    /// Use tree-sitter splitting where a grammar is registered
    pub syntax_aware: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            syntax_aware: true,
        }
    }
}

impl ChunkingConfig {
    pub fn with_max_chunk_size(mut self, max_chunk_size: usize) -> Self {
        self.max_chunk_size = max_chunk_size;
        self
    }

    pub fn with_syntax_aware(mut self, syntax_aware: bool) -> Self {
        self.syntax_aware = syntax_aware;
        self
    }
}

/// Strategy for chunking files - delegates to the codie-context registry
#[derive(Debug, Clone)]
pub struct ChunkingStrategy {
    config: ChunkingConfig,
    registry: ChunkerRegistry,
}

impl ChunkingStrategy {
    /// Create a new chunking strategy with the given configuration
    pub fn new(config: ChunkingConfig) -> Self {
        let registry = if config.syntax_aware {
            ChunkerRegistry::with_default_grammars()
        } else {
            ChunkerRegistry::paragraph_only()
        };
        Self { config, registry }
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Chunk a file's content. Never fails; unparseable files are paragraph-chunked.
    pub fn chunk_content(&self, file_path: &Path, content: &str) -> Vec<Chunk> {
        let chunks = self
            .registry
            .chunk_file(file_path, content, self.config.max_chunk_size);

        tracing::debug!(
            "Chunked {} into {} chunks (max size: {})",
            file_path.display(),
            chunks.len(),
            self.config.max_chunk_size
        );

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_chunking_strategy() {
        let strategy = ChunkingStrategy::new(ChunkingConfig::default());

        let rust_content = r#"
use std::collections::HashMap;

fn main() {
    println!("Hello, world!");
}

struct Config {
    name: String,
}
"#;

        let chunks = strategy.chunk_content(&PathBuf::from("src/main.rs"), rust_content);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].function.as_deref(), Some("main"));
        assert_eq!(chunks[1].class.as_deref(), Some("Config"));
        assert!(chunks.iter().all(|c| c.file_name.as_deref() == Some("main.rs")));
    }

    #[test]
    fn test_paragraph_only_strategy() {
        let strategy = ChunkingStrategy::new(
            ChunkingConfig::default()
                .with_syntax_aware(false)
                .with_max_chunk_size(10),
        );

        let chunks = strategy.chunk_content(Path::new("main.go"), "func a() {}\n\nfunc b() {}");
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["func a() {}", "func b() {}"]);
        assert!(chunks.iter().all(|c| c.function.is_none()));
    }

    #[test]
    fn test_empty_content() {
        let strategy = ChunkingStrategy::new(ChunkingConfig::default());
        assert!(strategy.chunk_content(Path::new("empty.go"), "").is_empty());
    }
}
