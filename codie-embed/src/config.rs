//! Configuration for the embedding client

use crate::error::{EmbedError, Result};
use derive_builder::Builder;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_BATCH_SIZE: usize = 20;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Approximate token ceiling per input text (characters / 4).
pub const DEFAULT_MAX_TOKENS_PER_TEXT: usize = 8192;

/// Admission limits for the shared rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Minimum spacing between admissions, expressed per minute
    pub requests_per_minute: u32,
    /// Maximum number of admitted calls in flight
    pub max_concurrent: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 3000,
            max_concurrent: 5,
        }
    }
}

impl RateLimitConfig {
    /// Time between two consecutive admissions.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(60) / self.requests_per_minute.max(1)
    }
}

/// Per-window retry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts per window, the first one included
    pub max_attempts: u32,
    /// Starting delay for ordinary failures, doubled per attempt
    pub base_delay: Duration,
    /// Starting delay after a rate-limit response, doubled per attempt
    pub rate_limit_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            rate_limit_delay: Duration::from_secs(4),
        }
    }
}

/// Configuration for an OpenAI-compatible embedding endpoint
#[derive(Clone, Builder)]
#[builder(setter(into))]
pub struct EmbedConfig {
    /// Bearer credential sent with every request
    pub api_key: String,
    /// Base URL; `/embeddings` is appended
    #[builder(default = "DEFAULT_BASE_URL.to_string()")]
    pub base_url: String,
    /// Name of the embedding model to use
    #[builder(default = "DEFAULT_MODEL.to_string()")]
    pub model: String,
    /// Maximum number of texts sent in one call
    #[builder(default = "DEFAULT_BATCH_SIZE")]
    pub batch_size: usize,
    /// Timeout applied to each remote call
    #[builder(default = "DEFAULT_REQUEST_TIMEOUT")]
    pub request_timeout: Duration,
    /// Texts estimated above this many tokens are skipped
    #[builder(default = "DEFAULT_MAX_TOKENS_PER_TEXT")]
    pub max_tokens_per_text: usize,
    #[builder(default)]
    pub rate_limit: RateLimitConfig,
    #[builder(default)]
    pub retry: RetryConfig,
}

impl std::fmt::Debug for EmbedConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbedConfig")
            .field("api_key", &if self.has_credential() { "<set>" } else { "<missing>" })
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("batch_size", &self.batch_size)
            .field("request_timeout", &self.request_timeout)
            .field("max_tokens_per_text", &self.max_tokens_per_text)
            .field("rate_limit", &self.rate_limit)
            .field("retry", &self.retry)
            .finish()
    }
}

impl EmbedConfig {
    /// Create a new embedding configuration using the builder
    pub fn builder() -> EmbedConfigBuilder {
        EmbedConfigBuilder::default()
    }

    /// Create a configuration with default settings for the given credential
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_tokens_per_text: DEFAULT_MAX_TOKENS_PER_TEXT,
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Set the base URL (builder style)
    pub fn with_base_url<S: Into<String>>(self, base_url: S) -> Self {
        Self {
            base_url: base_url.into(),
            ..self
        }
    }

    /// Set the model name (builder style)
    pub fn with_model<S: Into<String>>(self, model: S) -> Self {
        Self {
            model: model.into(),
            ..self
        }
    }

    /// Set the batch size for embedding requests (builder style)
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    /// Set the per-call timeout (builder style)
    pub fn with_request_timeout(self, request_timeout: Duration) -> Self {
        Self {
            request_timeout,
            ..self
        }
    }

    /// Set the per-text token ceiling (builder style)
    pub fn with_max_tokens_per_text(self, max_tokens_per_text: usize) -> Self {
        Self {
            max_tokens_per_text,
            ..self
        }
    }

    /// Set the rate limits (builder style)
    pub fn with_rate_limit(self, rate_limit: RateLimitConfig) -> Self {
        Self { rate_limit, ..self }
    }

    /// Set the retry settings (builder style)
    pub fn with_retry(self, retry: RetryConfig) -> Self {
        Self { retry, ..self }
    }

    /// Whether a non-blank credential is configured
    pub fn has_credential(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    /// Full URL of the embeddings endpoint
    pub fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url.trim_end_matches('/'))
    }

    /// Validate settings that would otherwise stall or reject every request.
    ///
    /// A missing credential is reported as [`EmbedError::Auth`] so callers can
    /// treat it as fatal before any work is dispatched.
    pub fn validate(&self) -> Result<()> {
        if !self.has_credential() {
            return Err(EmbedError::auth("no API key configured"));
        }
        if self.model.trim().is_empty() {
            return Err(EmbedError::invalid_config("model name must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(EmbedError::invalid_config("batch size must be at least 1"));
        }
        if self.rate_limit.max_concurrent == 0 {
            return Err(EmbedError::invalid_config(
                "max concurrent requests must be at least 1",
            ));
        }
        if self.rate_limit.requests_per_minute == 0 {
            return Err(EmbedError::invalid_config(
                "requests per minute must be at least 1",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(EmbedError::invalid_config("retry attempts must be at least 1"));
        }

        tracing::debug!("Embedding configuration valid for model: {}", self.model);
        Ok(())
    }
}
