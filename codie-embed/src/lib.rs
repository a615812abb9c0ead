//! # codie-embed
//!
//! Batched, rate-limited, retrying access to a remote embedding provider.
//!
//! ## Quick Start
//!
//! ```no_run
//! use codie_embed::{EmbedConfig, EmbeddingClient};
//!
//! # async fn example() -> codie_embed::Result<()> {
//! let client = EmbeddingClient::from_config(&EmbedConfig::new("sk-..."))?;
//!
//! let texts = vec!["fn add(a: i32, b: i32) -> i32 { a + b }".to_string()];
//! let batch = client.embed_batch(&texts, client.batch_size()).await?;
//!
//! println!("embedded {} of {} texts", batch.embedded(), texts.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`provider`]: The [`EmbeddingProvider`] seam, an OpenAI-compatible HTTP
//!   implementation, and a deterministic [`MockProvider`]
//! - [`rate_limiter`]: The shared pacing and concurrency gate
//! - [`retry`]: Attempt budget and backoff schedule, with an injectable sleeper
//! - [`client`]: Windowing, concurrent submission, and result assembly
//! - [`config`]: Client settings and their defaults
//! - [`error`]: Error types and result handling
//!
//! The rate limiter is passed in explicitly, so several clients can share one
//! limiter and tests can substitute an unpaced one.

pub mod client;
pub mod config;
pub mod error;
pub mod provider;
pub mod rate_limiter;
pub mod retry;

// Re-export main types for easy access
pub use client::{BatchEmbeddings, EmbeddingClient};
pub use config::{EmbedConfig, RateLimitConfig, RetryConfig};
pub use error::{EmbedError, FailureClass, Result};
pub use provider::{EmbeddingProvider, MockProvider, OpenAiProvider};
pub use rate_limiter::{RateLimiter, RatePermit};
pub use retry::{RecordingSleeper, RetryPolicy, Sleeper, TokioSleeper};
