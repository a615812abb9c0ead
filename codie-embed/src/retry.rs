//! Bounded retry with backoff for remote embedding calls.
//!
//! [`RetryPolicy`] owns the attempt budget and the backoff schedule, and asks
//! each error for its [`FailureClass`] to pick between the two schedules:
//!
//! | After attempt | Rate limited          | Other failure   |
//! |---------------|-----------------------|-----------------|
//! | 1             | `rate_limit_delay * 2` | `base_delay`     |
//! | 2             | `rate_limit_delay * 4` | `base_delay * 2` |
//!
//! No delay follows the final attempt. Waiting goes through a [`Sleeper`] so
//! tests can observe the schedule without real delays.
use crate::config::RetryConfig;
use crate::error::{FailureClass, Result};
use async_trait::async_trait;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Something that can wait for a duration.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Returns immediately and remembers every requested delay.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|delays| delays.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(duration);
        }
    }
}

#[derive(Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the sleeper (builder style)
    pub fn with_sleeper(self, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { sleeper, ..self }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32, class: FailureClass) -> Duration {
        let attempt = attempt.clamp(1, 16);
        match class {
            FailureClass::RateLimited => self.config.rate_limit_delay.saturating_mul(1 << attempt),
            FailureClass::Other => self.config.base_delay.saturating_mul(1 << (attempt - 1)),
        }
    }

    /// Run `operation` until it succeeds or the attempt budget is spent.
    ///
    /// `operation` receives the 1-based attempt number. The error of the last
    /// attempt is returned when every attempt fails.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{label} succeeded on attempt {attempt}/{max_attempts}");
                    }
                    return Ok(value);
                }
                Err(e) if attempt >= max_attempts => {
                    warn!("{label} failed after {max_attempts} attempts: {e}");
                    return Err(e);
                }
                Err(e) => {
                    let class = e.failure_class();
                    let delay = self.delay_for(attempt, class);
                    match class {
                        FailureClass::RateLimited => warn!(
                            "{label} rate limited on attempt {attempt}/{max_attempts}, backing off {delay:?}"
                        ),
                        FailureClass::Other => warn!(
                            "{label} attempt {attempt}/{max_attempts} failed: {e}; retrying in {delay:?}"
                        ),
                    }
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EmbedError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tracing_test::traced_test;

    fn policy_with_recorder() -> (RetryPolicy, Arc<RecordingSleeper>) {
        let sleeper = Arc::new(RecordingSleeper::new());
        let policy = RetryPolicy::new(RetryConfig::default()).with_sleeper(sleeper.clone());
        (policy, sleeper)
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::new(RetryConfig::default());
        let secs = |d: Duration| d.as_secs();

        assert_eq!(secs(policy.delay_for(1, FailureClass::Other)), 1);
        assert_eq!(secs(policy.delay_for(2, FailureClass::Other)), 2);
        assert_eq!(secs(policy.delay_for(3, FailureClass::Other)), 4);
        assert_eq!(secs(policy.delay_for(1, FailureClass::RateLimited)), 8);
        assert_eq!(secs(policy.delay_for(2, FailureClass::RateLimited)), 16);
    }

    #[tokio::test]
    async fn test_succeeds_without_sleeping() -> Result<()> {
        let (policy, sleeper) = policy_with_recorder();
        let value = policy.run("batch 1", |_| async { Ok(7) }).await?;
        assert_eq!(value, 7);
        assert!(sleeper.delays().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_retries_until_success() -> Result<()> {
        let (policy, sleeper) = policy_with_recorder();
        let calls = AtomicU32::new(0);

        let value = policy
            .run("batch 1", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(EmbedError::transient("connection reset"))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await?;

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
        Ok(())
    }

    #[tokio::test]
    #[traced_test]
    async fn test_rate_limited_failures_use_longer_backoff() {
        let (policy, sleeper) = policy_with_recorder();

        let result: Result<()> = policy
            .run("batch 2", |_| async {
                Err(EmbedError::rate_limited("429 Too Many Requests"))
            })
            .await;

        assert!(matches!(result, Err(EmbedError::RateLimited { .. })));
        // Three attempts, two waits, nothing after the last one.
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_secs(8), Duration::from_secs(16)]
        );
        assert!(logs_contain("batch 2 rate limited on attempt 1/3"));
        assert!(logs_contain("failed after 3 attempts"));
    }

    #[tokio::test]
    async fn test_single_attempt_budget() {
        let sleeper = Arc::new(RecordingSleeper::new());
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 1,
            ..RetryConfig::default()
        })
        .with_sleeper(sleeper.clone());

        let result: Result<()> = policy
            .run("batch 1", |_| async { Err(EmbedError::auth("bad key")) })
            .await;

        assert!(result.unwrap_err().is_auth());
        assert!(sleeper.delays().is_empty());
    }
}
