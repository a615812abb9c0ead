//! Settings for an indexing run.
//!
//! Settings are layered, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. A TOML file (`codie.toml` in the working directory, or an explicit path)
//! 3. Environment variables (`OPENAI_API_KEY`, `OPENAI_BASE_URL`,
//!    `CODIE_EMBEDDING_MODEL`), including those loaded from `.env`
//! 4. Command-line flags, applied by the binary
//!
//! ```toml
//! [indexing]
//! max_chunk_size = 8000
//! worker_multiplier = 4
//!
//! [embedding]
//! model = "text-embedding-3-small"
//! batch_size = 20
//!
//! [rate_limit]
//! requests_per_minute = 3000
//! max_concurrent = 5
//!
//! [output]
//! sink = "json"
//! path = "embeddings.json"
//! ```
use crate::error::ConfigError;
use codie_embed::config::{
    DEFAULT_BASE_URL, DEFAULT_BATCH_SIZE, DEFAULT_MAX_TOKENS_PER_TEXT, DEFAULT_MODEL,
};
use codie_embed::{EmbedConfig, RateLimitConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "codie.toml";
pub const DEFAULT_INDEX_NAME: &str = "codebase:chunks";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerSettings {
    pub indexing: IndexingSection,
    pub embedding: EmbeddingSection,
    pub rate_limit: RateLimitSection,
    pub retry: RetrySection,
    pub output: OutputSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingSection {
    /// Upper bound in bytes for paragraph chunks
    pub max_chunk_size: usize,
    /// Fixed worker count; derived from the host when unset
    pub workers: Option<usize>,
    /// Workers per available core when `workers` is unset
    pub worker_multiplier: usize,
    pub parallel_discovery: bool,
    /// Use tree-sitter splitting for supported languages
    pub syntax_chunking: bool,
    /// How many file errors to print before summarizing the rest
    pub error_preview: usize,
}

impl Default for IndexingSection {
    fn default() -> Self {
        Self {
            max_chunk_size: codie_context::DEFAULT_MAX_CHUNK_SIZE,
            workers: None,
            worker_multiplier: 4,
            parallel_discovery: false,
            syntax_chunking: true,
            error_preview: 10,
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSection {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub max_tokens_per_text: usize,
}

impl std::fmt::Debug for EmbeddingSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingSection")
            .field("api_key", &self.api_key.as_ref().map(|_| "<set>"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("batch_size", &self.batch_size)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_tokens_per_text", &self.max_tokens_per_text)
            .finish()
    }
}

impl Default for EmbeddingSection {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            timeout_secs: 30,
            max_tokens_per_text: DEFAULT_MAX_TOKENS_PER_TEXT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub requests_per_minute: u32,
    pub max_concurrent: usize,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        let defaults = RateLimitConfig::default();
        Self {
            requests_per_minute: defaults.requests_per_minute,
            max_concurrent: defaults.max_concurrent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub rate_limit_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            rate_limit_delay_ms: 4000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// One pretty-printed JSON document
    #[default]
    Json,
    /// Key/value rows in a SQLite database
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    pub sink: SinkKind,
    pub path: PathBuf,
    /// Collection name used by the key/value sink
    pub index_name: String,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            sink: SinkKind::Json,
            path: PathBuf::from("embeddings.json"),
            index_name: DEFAULT_INDEX_NAME.to_string(),
        }
    }
}

impl IndexerSettings {
    pub fn from_toml_str(source: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Load settings from `path`, or from `codie.toml` when no path is given.
    ///
    /// An explicit path must exist. The implicit `codie.toml` is optional and
    /// defaults are used when it is absent.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        if !required && !path.exists() {
            tracing::debug!("No {} found, using defaults", path.display());
            return Ok(Self::default());
        }

        let source = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let settings = Self::from_toml_str(&source, &path)?;
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay values from `lookup`; blank values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.embedding.api_key = Some(key);
        }
        if let Some(url) = lookup("OPENAI_BASE_URL") {
            self.embedding.base_url = url;
        }
        if let Some(model) = lookup("CODIE_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
    }

    /// Number of indexing workers for this host.
    pub fn worker_count(&self) -> usize {
        self.indexing
            .workers
            .unwrap_or_else(|| {
                let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
                cores * self.indexing.worker_multiplier.max(1)
            })
            .max(1)
    }

    pub fn embed_config(&self) -> EmbedConfig {
        EmbedConfig::new(self.embedding.api_key.clone().unwrap_or_default())
            .with_base_url(self.embedding.base_url.clone())
            .with_model(self.embedding.model.clone())
            .with_batch_size(self.embedding.batch_size)
            .with_request_timeout(Duration::from_secs(self.embedding.timeout_secs))
            .with_rate_limit(RateLimitConfig {
                requests_per_minute: self.rate_limit.requests_per_minute,
                max_concurrent: self.rate_limit.max_concurrent,
            })
            .with_retry(RetryConfig {
                max_attempts: self.retry.max_attempts,
                base_delay: Duration::from_millis(self.retry.base_delay_ms),
                rate_limit_delay: Duration::from_millis(self.retry.rate_limit_delay_ms),
            })
            .with_max_tokens_per_text(self.embedding.max_tokens_per_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let settings = IndexerSettings::default();
        assert_eq!(settings.indexing.max_chunk_size, 8000);
        assert_eq!(settings.indexing.error_preview, 10);
        assert_eq!(settings.output.sink, SinkKind::Json);
        assert_eq!(settings.output.index_name, "codebase:chunks");

        let embed = settings.embed_config();
        assert_eq!(embed.batch_size, 20);
        assert_eq!(embed.rate_limit, RateLimitConfig::default());
        assert_eq!(embed.retry, RetryConfig::default());
        assert!(!embed.has_credential());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let source = r#"
            [indexing]
            max_chunk_size = 4000
            workers = 3

            [rate_limit]
            max_concurrent = 2

            [output]
            sink = "sqlite"
            path = "index.db"
        "#;
        let settings = IndexerSettings::from_toml_str(source, Path::new("codie.toml")).unwrap();

        assert_eq!(settings.indexing.max_chunk_size, 4000);
        assert_eq!(settings.worker_count(), 3);
        assert_eq!(settings.rate_limit.max_concurrent, 2);
        assert_eq!(settings.rate_limit.requests_per_minute, 3000);
        assert_eq!(settings.output.sink, SinkKind::Sqlite);
        assert_eq!(settings.output.path, PathBuf::from("index.db"));
        assert_eq!(settings.embedding.model, "text-embedding-3-small");
    }

    #[test]
    fn test_invalid_toml_is_reported_with_path() {
        let err = IndexerSettings::from_toml_str("[indexing]\nworkers = \"many\"", Path::new("bad.toml"))
            .unwrap_err();
        assert!(err.to_string().starts_with("Invalid config bad.toml"));
    }

    #[test]
    fn test_load_explicit_path() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[embedding]\nbatch_size = 7\n")?;

        let settings = IndexerSettings::load(Some(&path))?;
        assert_eq!(settings.embedding.batch_size, 7);

        let missing = IndexerSettings::load(Some(&dir.path().join("nope.toml")));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
        Ok(())
    }

    #[test]
    fn test_env_overrides_file() {
        let mut settings = IndexerSettings::from_toml_str(
            "[embedding]\nmodel = \"from-file\"\napi_key = \"file-key\"\n",
            Path::new("codie.toml"),
        )
        .unwrap();
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "env-key"),
            ("CODIE_EMBEDDING_MODEL", "  "),
            ("OPENAI_BASE_URL", "http://localhost:11434/v1"),
        ]
        .into_iter()
        .collect();

        settings.apply_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.embedding.api_key.as_deref(), Some("env-key"));
        assert_eq!(settings.embedding.model, "from-file");
        assert_eq!(
            settings.embed_config().endpoint(),
            "http://localhost:11434/v1/embeddings"
        );
    }

    #[test]
    fn test_worker_count_derived_from_host() {
        let settings = IndexerSettings::default();
        let cores = std::thread::available_parallelism().map_or(1, |n| n.get());
        assert_eq!(settings.worker_count(), cores * 4);
    }
}
