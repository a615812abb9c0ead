//! Batched, rate-limited, retrying embedding requests.
//!
//! [`EmbeddingClient::embed_batch`] is the workhorse:
//!
//! 1. Each input is cleaned (leading blank lines and trailing whitespace are
//!    removed, indentation is kept). Inputs that are empty after cleaning, or
//!    whose estimated token count (`chars / 4`) exceeds the ceiling, are skipped
//!    and logged. Skipping is never an error by itself.
//! 2. The remaining inputs are partitioned into windows of at most `batch_size`.
//! 3. All windows are submitted concurrently. Every remote call passes through
//!    the shared [`RateLimiter`] and the per-call timeout, and each window is
//!    retried according to the [`RetryPolicy`].
//! 4. Vectors are assigned back to their inputs by position. A window that
//!    exhausts its retries leaves its inputs without a vector but does not
//!    affect sibling windows.
//!
//! The call fails only when no window succeeded.
use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use crate::provider::{EmbeddingProvider, OpenAiProvider};
use crate::rate_limiter::RateLimiter;
use crate::retry::RetryPolicy;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Outcome of one [`EmbeddingClient::embed_batch`] call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchEmbeddings {
    /// One slot per input text, in input order. `None` means the text was
    /// skipped or its window failed.
    pub vectors: Vec<Option<Vec<f32>>>,
    /// Inputs excluded before any request was made
    pub skipped: usize,
    /// Valid inputs that ended without a vector
    pub lost: usize,
    pub total_batches: usize,
    pub failed_batches: usize,
    /// Final error of every failed window
    pub batch_errors: Vec<String>,
}

impl BatchEmbeddings {
    /// Number of inputs that received a vector.
    pub fn embedded(&self) -> usize {
        self.vectors.iter().filter(|v| v.is_some()).count()
    }

    /// Key the vectors by their original input text.
    ///
    /// Byte-identical inputs collapse into a single entry, so callers that need
    /// one result per input should read [`BatchEmbeddings::vectors`] instead.
    pub fn into_text_map(self, texts: &[String]) -> HashMap<String, Vec<f32>> {
        texts
            .iter()
            .zip(self.vectors)
            .filter_map(|(text, vector)| vector.map(|v| (text.clone(), v)))
            .collect()
    }
}

/// Strip leading blank lines and trailing whitespace, keeping indentation.
pub fn clean_text(text: &str) -> &str {
    let Some(first) = text.find(|c: char| !c.is_whitespace()) else {
        return "";
    };
    let line_start = text[..first].rfind('\n').map_or(0, |i| i + 1);
    text[line_start..].trim_end()
}

/// Rough token estimate used for the per-text ceiling.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    request_timeout: Duration,
    max_tokens_per_text: usize,
    batch_size: usize,
}

impl std::fmt::Debug for EmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingClient")
            .field("provider", &self.provider.provider_name())
            .field("limiter", &self.limiter)
            .field("retry", &self.retry)
            .field("request_timeout", &self.request_timeout)
            .field("max_tokens_per_text", &self.max_tokens_per_text)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl EmbeddingClient {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        limiter: Arc<RateLimiter>,
        config: &EmbedConfig,
    ) -> Self {
        Self {
            provider,
            limiter,
            retry: RetryPolicy::new(config.retry),
            request_timeout: config.request_timeout,
            max_tokens_per_text: config.max_tokens_per_text,
            batch_size: config.batch_size,
        }
    }

    /// Client for the configured OpenAI-compatible endpoint with its own limiter.
    pub fn from_config(config: &EmbedConfig) -> Result<Self> {
        config.validate()?;
        let provider = Arc::new(OpenAiProvider::new(config)?);
        let limiter = Arc::new(RateLimiter::new(config.rate_limit));
        Ok(Self::new(provider, limiter, config))
    }

    /// Replace the retry policy (builder style)
    pub fn with_retry_policy(self, retry: RetryPolicy) -> Self {
        Self { retry, ..self }
    }

    /// Default window size from the configuration.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Probe the provider once, through the limiter, without retries.
    pub async fn verify_credentials(&self) -> Result<()> {
        let permit = self.limiter.acquire().await?;
        let result = tokio::time::timeout(self.request_timeout, self.provider.verify_credentials())
            .await
            .map_err(|_| self.timeout_error());
        permit.release();
        result?
    }

    /// Embed `texts` in windows of at most `batch_size`.
    pub async fn embed_batch(&self, texts: &[String], batch_size: usize) -> Result<BatchEmbeddings> {
        if batch_size == 0 {
            return Err(EmbedError::invalid_config("batch size must be at least 1"));
        }

        let mut valid: Vec<(usize, String)> = Vec::with_capacity(texts.len());
        let mut skipped = 0;
        for (index, text) in texts.iter().enumerate() {
            let cleaned = clean_text(text);
            if cleaned.is_empty() {
                warn!("Skipping empty text at index {index}");
                skipped += 1;
                continue;
            }
            let tokens = estimate_tokens(cleaned);
            if tokens > self.max_tokens_per_text {
                warn!(
                    "Skipping text at index {index}: ~{tokens} tokens exceeds limit of {}",
                    self.max_tokens_per_text
                );
                skipped += 1;
                continue;
            }
            valid.push((index, cleaned.to_string()));
        }

        if valid.is_empty() {
            return Err(EmbedError::NoValidTexts { skipped });
        }

        let windows: Vec<&[(usize, String)]> = valid.chunks(batch_size).collect();
        let total_batches = windows.len();
        debug!(
            "Embedding {} texts in {total_batches} batches of up to {batch_size}",
            valid.len()
        );

        let outcomes = join_all(windows.iter().enumerate().map(|(n, window)| async move {
            let inputs: Vec<String> = window.iter().map(|(_, text)| text.clone()).collect();
            let label = format!("Embedding batch {}/{total_batches}", n + 1);
            let outcome = self
                .retry
                .run(&label, |_| self.call_provider(&inputs))
                .await;
            (*window, outcome)
        }))
        .await;

        let mut result = BatchEmbeddings {
            vectors: vec![None; texts.len()],
            skipped,
            total_batches,
            ..BatchEmbeddings::default()
        };
        let mut first_error = None;
        for (window, outcome) in outcomes {
            match outcome {
                Ok(vectors) => {
                    for ((index, _), vector) in window.iter().zip(vectors) {
                        if vector.is_empty() {
                            warn!("Provider returned an empty embedding for text at index {index}");
                            result.lost += 1;
                        } else {
                            result.vectors[*index] = Some(vector);
                        }
                    }
                }
                Err(e) => {
                    result.failed_batches += 1;
                    result.lost += window.len();
                    result.batch_errors.push(e.to_string());
                    first_error.get_or_insert(e);
                }
            }
        }

        if result.failed_batches == total_batches {
            return Err(match first_error {
                Some(e) if e.is_auth() => e,
                _ => EmbedError::AllBatchesFailed {
                    batches: total_batches,
                    last_error: result.batch_errors.last().cloned().unwrap_or_default(),
                },
            });
        }

        if result.lost > 0 {
            warn!(
                "{} of {} texts were not embedded ({} of {total_batches} batches failed)",
                result.lost,
                valid.len(),
                result.failed_batches
            );
        }
        Ok(result)
    }

    /// Embed a single text.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut batch = self.embed_batch(&[text.to_string()], 1).await?;
        batch
            .vectors
            .pop()
            .flatten()
            .ok_or_else(|| EmbedError::invalid_response("provider returned an empty embedding"))
    }

    async fn call_provider(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let permit = self.limiter.acquire().await?;
        let result = tokio::time::timeout(self.request_timeout, self.provider.embed_texts(inputs)).await;
        permit.release();

        let vectors = result.map_err(|_| self.timeout_error())??;
        if vectors.len() != inputs.len() {
            return Err(EmbedError::invalid_response(format!(
                "provider returned {} embeddings for {} inputs",
                vectors.len(),
                inputs.len()
            )));
        }
        Ok(vectors)
    }

    fn timeout_error(&self) -> EmbedError {
        EmbedError::Timeout {
            seconds: self.request_timeout.as_secs(),
        }
    }
}
