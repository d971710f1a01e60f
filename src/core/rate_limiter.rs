use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::store::RemoteStore;
use crate::utils::{log_degraded, log_rate_limit};

/// Admission capability shared by the limiter variants.
///
/// The pipeline holds exactly one limiter behind an atomically swappable
/// handle; reconfiguration replaces the whole limiter so concurrent calls see
/// either the old or the new parameters, never a mix.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Whether a request for `key` is admitted right now. Admission consumes
    /// capacity; a denied call leaves per-key state untouched apart from the
    /// sliding window's timestamp bookkeeping.
    async fn allow(&self, key: &str) -> bool;

    /// Configured sustained limit in requests per minute.
    fn limit(&self) -> u32;

    /// Configured burst. The sliding-window variant reports its window in
    /// seconds here, which is not a burst in the token-bucket sense; use
    /// [`RateLimiter::window_seconds`] to disambiguate.
    fn burst(&self) -> u32;

    /// Window size of the sliding-window variant; `None` for the token bucket.
    fn window_seconds(&self) -> Option<u64> {
        None
    }

    /// Drop idle per-key state. Called from the background sweeper.
    fn sweep(&self) {}
}

#[derive(Debug)]
struct Bucket {
    /// Fractional token count, `0 ≤ tokens ≤ burst`
    tokens: f64,
    last_refill: Instant,
}

/// Local token bucket limiter.
///
/// Buckets are created lazily per key with a full burst and refill at
/// `requests_per_minute / 60` tokens per second.
pub struct TokenBucketLimiter {
    rate_per_sec: f64,
    requests_per_minute: u32,
    burst: u32,
    /// Idle buckets older than this are evicted by `sweep`
    max_idle: Duration,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucketLimiter {
    pub fn new(requests_per_minute: u32, burst: u32) -> Self {
        Self {
            rate_per_sec: f64::from(requests_per_minute) / 60.0,
            requests_per_minute,
            burst,
            max_idle: Duration::from_secs(600),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.buckets.lock().len()
    }

    fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: f64::from(self.burst),
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens =
            (bucket.tokens + elapsed.as_secs_f64() * self.rate_per_sec).min(f64::from(self.burst));
        bucket.last_refill = now;

        debug_assert!(bucket.tokens >= 0.0, "token count must never go negative");

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn allow(&self, key: &str) -> bool {
        let allowed = self.check(key);
        log_rate_limit(key, !allowed);
        allowed
    }

    fn limit(&self) -> u32 {
        self.requests_per_minute
    }

    fn burst(&self) -> u32 {
        self.burst
    }

    fn sweep(&self) {
        let mut buckets = self.buckets.lock();
        buckets.retain(|_, bucket| bucket.last_refill.elapsed() <= self.max_idle);
    }
}

/// Distributed sliding-window limiter backed by the remote store.
///
/// Request timestamps live in a sorted set under `rate_limit:<key>` with a
/// TTL of the window. When the store is unreachable the limiter fails open.
pub struct SlidingWindowLimiter {
    store: RemoteStore,
    limit: u32,
    window: Duration,
}

impl SlidingWindowLimiter {
    const KEY_PREFIX: &'static str = "rate_limit:";

    pub fn new(store: RemoteStore, limit: u32, window: Duration) -> Self {
        Self { store, limit, window }
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn allow(&self, key: &str) -> bool {
        let redis_key = format!("{}{}", Self::KEY_PREFIX, key);
        match self.store.sliding_window_count(&redis_key, self.window).await {
            Ok(count) => {
                let allowed = count < i64::from(self.limit);
                log_rate_limit(key, !allowed);
                allowed
            }
            Err(err) => {
                // Fail open for availability when the store is down.
                log_degraded("rate_limiter", &err.to_string());
                true
            }
        }
    }

    fn limit(&self) -> u32 {
        self.limit
    }

    fn burst(&self) -> u32 {
        self.window.as_secs() as u32
    }

    fn window_seconds(&self) -> Option<u64> {
        Some(self.window.as_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_bucket_admits_burst_then_denies() {
        let limiter = TokenBucketLimiter::new(60, 10);

        for i in 0..10 {
            assert!(limiter.allow("198.51.100.7").await, "request {i} should pass");
        }
        assert!(!limiter.allow("198.51.100.7").await, "burst exhausted");
        assert!(!limiter.allow("198.51.100.7").await);
    }

    #[tokio::test]
    async fn token_bucket_keys_are_independent() {
        let limiter = TokenBucketLimiter::new(60, 2);

        assert!(limiter.allow("a").await);
        assert!(limiter.allow("a").await);
        assert!(!limiter.allow("a").await);

        assert!(limiter.allow("b").await);
    }

    #[tokio::test]
    async fn token_bucket_refills_over_time() {
        // 6000 rpm = 100 tokens/sec, so one token comes back within ~10ms.
        let limiter = TokenBucketLimiter::new(6000, 1);

        assert!(limiter.allow("k").await);
        assert!(!limiter.allow("k").await);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(limiter.allow("k").await, "refill should admit one more");
    }

    #[tokio::test]
    async fn token_bucket_refill_is_capped_at_burst() {
        let limiter = TokenBucketLimiter::new(6000, 3);

        for _ in 0..3 {
            assert!(limiter.allow("k").await);
        }
        // Plenty of time for far more than 3 tokens at 100/sec.
        tokio::time::sleep(Duration::from_millis(100)).await;

        for _ in 0..3 {
            assert!(limiter.allow("k").await);
        }
        assert!(!limiter.allow("k").await, "cap at burst despite long quiescence");
    }

    #[tokio::test]
    async fn token_bucket_sweep_drops_idle_buckets() {
        let mut limiter = TokenBucketLimiter::new(60, 5);
        limiter.max_idle = Duration::from_millis(10);

        limiter.allow("stale").await;
        assert_eq!(limiter.tracked_keys(), 1);

        tokio::time::sleep(Duration::from_millis(25)).await;
        limiter.sweep();
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn token_bucket_introspection() {
        let limiter = TokenBucketLimiter::new(120, 30);
        assert_eq!(limiter.limit(), 120);
        assert_eq!(limiter.burst(), 30);
        assert_eq!(limiter.window_seconds(), None);
    }
}
