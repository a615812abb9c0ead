//! Shared admission gate in front of the embedding endpoint.
//!
//! A [`RateLimiter`] enforces two independent constraints:
//!
//! - **Concurrency**: at most `max_concurrent` admitted calls are in flight.
//!   This is a counting permit pool backed by a tokio [`Semaphore`].
//! - **Pacing**: consecutive admissions are spaced by at least
//!   `60s / requests_per_minute`, like a steady ticker.
//!
//! [`RateLimiter::acquire`] waits for a permit first and then for the next pulse,
//! so a caller that holds the pulse lock is always one that may proceed. The
//! returned [`RatePermit`] gives the permit back when dropped, which pairs every
//! acquire with exactly one release on every path, error paths included.
//!
//! The limiter is an ordinary value: construct one per pipeline and share it
//! through an [`Arc`].
//!
//! ```
//! use codie_embed::{RateLimitConfig, RateLimiter};
//!
//! # async fn example() -> codie_embed::Result<()> {
//! let limiter = RateLimiter::new(RateLimitConfig::default());
//! let permit = limiter.acquire().await?;
//! // ... issue the remote call ...
//! permit.release();
//! # Ok(())
//! # }
//! ```
use crate::config::RateLimitConfig;
use crate::error::{EmbedError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

#[derive(Debug)]
struct Pulse {
    interval: Duration,
    next_admission: Mutex<Option<Instant>>,
}

#[derive(Debug, Default)]
struct Counters {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    admitted: AtomicU64,
    released: AtomicU64,
}

#[derive(Debug)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    pulse: Option<Pulse>,
    counters: Arc<Counters>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let mut limiter = Self::unlimited(config.max_concurrent);
        limiter.pulse = Some(Pulse {
            interval: config.interval(),
            next_admission: Mutex::new(None),
        });
        limiter
    }

    /// A limiter that only caps concurrency and never waits for a pulse.
    pub fn unlimited(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            pulse: None,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Wait for a free permit and the next pulse.
    pub async fn acquire(&self) -> Result<RatePermit> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EmbedError::transient("rate limiter is closed"))?;

        if let Some(pulse) = &self.pulse {
            let mut next = pulse.next_admission.lock().await;
            if let Some(at) = *next {
                tokio::time::sleep_until(at).await;
            }
            *next = Some(Instant::now() + pulse.interval);
        }

        let counters = &self.counters;
        let in_flight = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        counters.admitted.fetch_add(1, Ordering::SeqCst);

        Ok(RatePermit {
            _permit: permit,
            counters: self.counters.clone(),
        })
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Spacing between admissions, if pacing is enabled.
    pub fn interval(&self) -> Option<Duration> {
        self.pulse.as_ref().map(|p| p.interval)
    }

    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously admitted callers seen so far.
    pub fn peak_in_flight(&self) -> usize {
        self.counters.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn admitted(&self) -> u64 {
        self.counters.admitted.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u64 {
        self.counters.released.load(Ordering::SeqCst)
    }
}

/// One admitted slot. Dropping it releases the slot.
#[derive(Debug)]
#[must_use = "dropping a RatePermit releases it immediately"]
pub struct RatePermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl RatePermit {
    /// Return the slot to the pool.
    pub fn release(self) {}
}

impl Drop for RatePermit {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}
