//! # Rate Limiters
//!
//! Decide how long a key waits before it is redelivered after a failure.
//!
//! Rate limiters only compute delay. Whether a key is retried at all is decided by
//! the worker, which calls [`WorkQueue::add_rate_limited`](super::WorkQueue::add_rate_limited)
//! on failure and [`WorkQueue::forget`](super::WorkQueue::forget) on success.
//!
//! The default controller limiter takes the longer of two delays:
//!
//! - a per-key exponential backoff: 5ms, 10ms, 20ms, ... capped at 1000s
//! - an overall token bucket: 10 qps with a burst of 100
//!
//! ## Usage
//!
//! ```rust
//! use clusterissuer_controller::controller::queue::{ItemExponentialRateLimiter, ObjectKey, RateLimiter};
//! use std::time::Duration;
//!
//! let limiter = ItemExponentialRateLimiter::new(Duration::from_millis(5), Duration::from_secs(1000));
//! let key = ObjectKey::cluster("prod-ca");
//! assert_eq!(limiter.when(&key), Duration::from_millis(5));
//! assert_eq!(limiter.when(&key), Duration::from_millis(10));
//! limiter.forget(&key);
//! assert_eq!(limiter.when(&key), Duration::from_millis(5));
//! ```

use super::ObjectKey;
use crate::constants::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_SECS, DEFAULT_RATE_LIMIT_BURST,
    DEFAULT_RATE_LIMIT_QPS,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Computes redelivery delays for failing keys
pub trait RateLimiter: Send + Sync + fmt::Debug {
    /// Delay before `key` should be delivered again; records one more failure
    fn when(&self, key: &ObjectKey) -> Duration;
    /// Stop tracking `key`, resetting its delay to the base value
    fn forget(&self, key: &ObjectKey);
    /// Number of failures recorded for `key` since the last `forget`
    fn num_requeues(&self, key: &ObjectKey) -> u32;
}

/// Per-key exponential backoff
///
/// Each key has its own failure count. The delay is `base * 2^failures`, capped at `max`.
#[derive(Debug)]
pub struct ItemExponentialRateLimiter {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<ObjectKey, u32>>,
}

impl ItemExponentialRateLimiter {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    fn backoff_for(&self, exponent: u32) -> Duration {
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl RateLimiter for ItemExponentialRateLimiter {
    fn when(&self, key: &ObjectKey) -> Duration {
        let exponent = match self.failures.lock() {
            Ok(mut failures) => {
                let count = failures.entry(key.clone()).or_insert(0);
                let exponent = *count;
                *count = count.saturating_add(1);
                exponent
            }
            // A poisoned map means a panic mid-update; fall back to the cap
            Err(_) => return self.max,
        };
        self.backoff_for(exponent)
    }

    fn forget(&self, key: &ObjectKey) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.remove(key);
        }
    }

    fn num_requeues(&self, key: &ObjectKey) -> u32 {
        self.failures
            .lock()
            .map(|failures| failures.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

/// Overall token bucket shared by every key
///
/// Protects the API server from a burst of retries across many keys. Each call to
/// `when` reserves a token; once the bucket is empty the delay grows by `1/qps` per
/// reservation.
#[derive(Debug)]
pub struct BucketRateLimiter {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl BucketRateLimiter {
    #[must_use]
    pub fn new(qps: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            qps: qps.max(f64::MIN_POSITIVE),
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last: Instant::now(),
            }),
        }
    }
}

impl RateLimiter for BucketRateLimiter {
    fn when(&self, _key: &ObjectKey) -> Duration {
        let Ok(mut bucket) = self.bucket.lock() else {
            return Duration::ZERO;
        };
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.qps).min(self.burst);
        bucket.last = now;
        bucket.tokens -= 1.0;
        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / self.qps)
        }
    }

    fn forget(&self, _key: &ObjectKey) {}

    fn num_requeues(&self, _key: &ObjectKey) -> u32 {
        0
    }
}

/// Combines limiters by taking the longest delay
#[derive(Debug)]
pub struct MaxOfRateLimiter {
    limiters: Vec<Box<dyn RateLimiter>>,
}

impl MaxOfRateLimiter {
    #[must_use]
    pub fn new(limiters: Vec<Box<dyn RateLimiter>>) -> Self {
        Self { limiters }
    }
}

impl RateLimiter for MaxOfRateLimiter {
    fn when(&self, key: &ObjectKey) -> Duration {
        // Every member must record the failure, so no short-circuiting here
        self.limiters
            .iter()
            .map(|limiter| limiter.when(key))
            .fold(Duration::ZERO, Duration::max)
    }

    fn forget(&self, key: &ObjectKey) {
        for limiter in &self.limiters {
            limiter.forget(key);
        }
    }

    fn num_requeues(&self, key: &ObjectKey) -> u32 {
        self.limiters
            .iter()
            .map(|limiter| limiter.num_requeues(key))
            .max()
            .unwrap_or(0)
    }
}

/// Limiter settings, usually taken from [`ControllerConfig`](crate::config::ControllerConfig)
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterSettings {
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub qps: f64,
    pub burst: u32,
}

impl Default for RateLimiterSettings {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            backoff_max: Duration::from_secs(DEFAULT_BACKOFF_MAX_SECS),
            qps: DEFAULT_RATE_LIMIT_QPS,
            burst: DEFAULT_RATE_LIMIT_BURST,
        }
    }
}

/// Per-key exponential backoff combined with an overall token bucket
#[must_use]
pub fn default_controller_rate_limiter(settings: RateLimiterSettings) -> MaxOfRateLimiter {
    MaxOfRateLimiter::new(vec![
        Box::new(ItemExponentialRateLimiter::new(
            settings.backoff_base,
            settings.backoff_max,
        )),
        Box::new(BucketRateLimiter::new(settings.qps, settings.burst)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_exponential_sequence_is_monotonic_and_capped() {
        let limiter =
            ItemExponentialRateLimiter::new(Duration::from_millis(5), Duration::from_millis(100));
        let key = ObjectKey::cluster("prod-ca");

        let delays: Vec<Duration> = (0..8).map(|_| limiter.when(&key)).collect();
        let expected_ms = [5, 10, 20, 40, 80, 100, 100, 100];
        for (delay, ms) in delays.iter().zip(expected_ms) {
            assert_eq!(*delay, Duration::from_millis(ms));
        }
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(limiter.num_requeues(&key), 8);
    }

    #[test]
    fn test_item_exponential_forget_resets_to_base() {
        let limiter =
            ItemExponentialRateLimiter::new(Duration::from_millis(5), Duration::from_secs(1000));
        let key = ObjectKey::cluster("prod-ca");
        limiter.when(&key);
        limiter.when(&key);
        limiter.when(&key);

        limiter.forget(&key);

        assert_eq!(limiter.num_requeues(&key), 0);
        assert_eq!(limiter.when(&key), Duration::from_millis(5));
    }

    #[test]
    fn test_item_exponential_keys_are_independent() {
        let limiter =
            ItemExponentialRateLimiter::new(Duration::from_millis(5), Duration::from_secs(1000));
        let a = ObjectKey::cluster("a");
        let b = ObjectKey::cluster("b");
        limiter.when(&a);
        limiter.when(&a);

        assert_eq!(limiter.when(&b), Duration::from_millis(5));
        assert_eq!(limiter.when(&a), Duration::from_millis(20));
    }

    #[test]
    fn test_item_exponential_huge_exponent_saturates_at_max() {
        let limiter =
            ItemExponentialRateLimiter::new(Duration::from_millis(5), Duration::from_secs(1000));
        let key = ObjectKey::cluster("flapping");
        let last = (0..64).map(|_| limiter.when(&key)).last();
        assert_eq!(last, Some(Duration::from_secs(1000)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_allows_burst_then_spaces_out() {
        let limiter = BucketRateLimiter::new(10.0, 2);
        let key = ObjectKey::cluster("a");

        assert_eq!(limiter.when(&key), Duration::ZERO);
        assert_eq!(limiter.when(&key), Duration::ZERO);
        let third = limiter.when(&key).as_secs_f64();
        let fourth = limiter.when(&key).as_secs_f64();
        assert!((third - 0.1).abs() < 1e-6, "third delay was {third}");
        assert!((fourth - 0.2).abs() < 1e-6, "fourth delay was {fourth}");

        // Two seconds at 10 qps more than restores the whole burst
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(limiter.when(&key), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_of_takes_longest_delay() {
        let limiter = MaxOfRateLimiter::new(vec![
            Box::new(ItemExponentialRateLimiter::new(
                Duration::from_millis(5),
                Duration::from_secs(1000),
            )),
            Box::new(BucketRateLimiter::new(1.0, 1)),
        ]);
        let key = ObjectKey::cluster("a");

        assert_eq!(limiter.when(&key), Duration::from_millis(5));
        // Bucket is now empty: one token per second
        assert_eq!(limiter.when(&key), Duration::from_secs(1));
        assert_eq!(limiter.num_requeues(&key), 2);

        limiter.forget(&key);
        assert_eq!(limiter.num_requeues(&key), 0);
    }
}
