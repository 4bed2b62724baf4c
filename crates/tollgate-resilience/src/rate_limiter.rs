//! Token-bucket rate limiting.
//!
//! A bucket holds up to `burst_capacity` tokens and refills continuously
//! at `replenish_rate` tokens per second. Each check consumes one token if
//! one is available.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;

/// Outcome of a limiter check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    /// Tokens remaining after this check.
    pub tokens_left: f64,
}

#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("invalid limiter parameters: replenish rate {replenish_rate}, burst capacity {burst_capacity}")]
    InvalidParameters {
        replenish_rate: f64,
        burst_capacity: f64,
    },

    #[error("limiter backend unavailable: {0}")]
    Unavailable(String),
}

/// A counter store answering "may this key make one more call?".
///
/// Every check is independent; callers must not cache decisions.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn allow(
        &self,
        key: &str,
        replenish_rate: f64,
        burst_capacity: f64,
    ) -> Result<Decision, LimiterError>;
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    /// Refill for the elapsed time, then try to take one token.
    fn try_consume(&mut self, rate_per_second: f64, burst_capacity: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        let refill = elapsed.as_secs_f64() * rate_per_second;
        self.tokens = (self.tokens + refill).min(burst_capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// In-process [`RateLimiter`] with one lock per key.
pub struct TokenBucketLimiter {
    buckets: DashMap<String, Mutex<Bucket>>,
    /// Buckets untouched for this long are dropped.
    idle_ttl: Duration,
    last_cleanup: Mutex<Instant>,
}

impl Default for TokenBucketLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenBucketLimiter {
    pub fn new() -> Self {
        Self::with_idle_ttl(Duration::from_secs(300))
    }

    pub fn with_idle_ttl(idle_ttl: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            idle_ttl,
            last_cleanup: Mutex::new(Instant::now()),
        }
    }

    /// Synchronous check; [`RateLimiter::allow`] delegates here.
    pub fn check(
        &self,
        key: &str,
        replenish_rate: f64,
        burst_capacity: f64,
    ) -> Result<Decision, LimiterError> {
        if !(replenish_rate.is_finite() && burst_capacity.is_finite())
            || replenish_rate < 0.0
            || burst_capacity < 1.0
        {
            return Err(LimiterError::InvalidParameters {
                replenish_rate,
                burst_capacity,
            });
        }

        self.maybe_cleanup();

        if let Some(bucket) = self.buckets.get(key) {
            return Ok(consume(&bucket, replenish_rate, burst_capacity));
        }
        let bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(Bucket::new(burst_capacity)));
        Ok(consume(&bucket, replenish_rate, burst_capacity))
    }

    /// Number of keys currently tracked.
    pub fn active_keys(&self) -> usize {
        self.buckets.len()
    }

    fn maybe_cleanup(&self) {
        let now = Instant::now();
        let Some(mut last) = self.last_cleanup.try_lock() else {
            return;
        };
        if now.duration_since(*last) < self.idle_ttl {
            return;
        }
        *last = now;
        drop(last);

        let ttl = self.idle_ttl;
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.get_mut().last_refill) < ttl);
    }
}

fn consume(bucket: &Mutex<Bucket>, replenish_rate: f64, burst_capacity: f64) -> Decision {
    let mut bucket = bucket.lock();
    let allowed = bucket.try_consume(replenish_rate, burst_capacity);
    Decision {
        allowed,
        tokens_left: bucket.tokens,
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn allow(
        &self,
        key: &str,
        replenish_rate: f64,
        burst_capacity: f64,
    ) -> Result<Decision, LimiterError> {
        self.check(key, replenish_rate, burst_capacity)
    }
}
