//! Token-bucket rate limiting, global or keyed per identity.
//!
//! A bucket refills continuously at `rate` tokens per second up to `burst`
//! and each admission consumes one token. Callers choose between try
//! semantics ([`RateLimiter::try_acquire`], immediate rejection) and wait
//! semantics ([`RateLimiter::acquire`], sleeping exactly the shortfall while
//! racing cancellation). Bucket state is mutated only under its single lock,
//! and keyed buckets live in an explicit owned registry created lazily on
//! first use.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::trace;

use crate::bail;
use crate::error::{ErrorKind, TaskResult};
use crate::token::CancellationToken;

#[derive(Debug)]
struct BucketState {
    /// Available tokens, in `[0, burst]`.
    tokens: f64,
    /// Instant of the last refill; doubles as the bucket's last-use marker.
    last: Instant,
}

/// Token-bucket admission control for a single resource.
#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Creates a bucket that starts full and refills at `rate` tokens per
    /// second up to `burst`.
    pub fn new(rate: f64, burst: u32) -> TaskResult<Self> {
        if !rate.is_finite() || rate <= 0.0 {
            bail!(
                ErrorKind::ConfigError,
                "invalid rate limit",
                format!("rate must be a positive number, got {rate}")
            );
        }
        if burst == 0 {
            bail!(
                ErrorKind::ConfigError,
                "invalid burst size",
                "burst must be >= 1"
            );
        }

        Ok(Self {
            rate,
            burst: f64::from(burst),
            state: Mutex::new(BucketState {
                tokens: f64::from(burst),
                last: Instant::now(),
            }),
        })
    }

    /// Refills `state` for the elapsed time, capping at the burst capacity.
    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.rate).min(self.burst);
        state.last = now;
    }

    /// Consumes one token if available, otherwise fails immediately with
    /// [`ErrorKind::RateLimited`].
    pub fn try_acquire(&self) -> TaskResult<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut state, Instant::now());

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return Ok(());
        }

        bail!(ErrorKind::RateLimited, "admission denied by rate limiter")
    }

    /// Consumes one token, sleeping until enough tokens accrue. The sleep
    /// races `token` so cancellation unblocks a waiting caller.
    pub async fn acquire(&self, token: &CancellationToken) -> TaskResult<()> {
        loop {
            let wait = {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                self.refill(&mut state, Instant::now());

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }

                Duration::from_secs_f64((1.0 - state.tokens) / self.rate)
            };

            trace!(wait_ms = wait.as_millis() as u64, "rate limited, waiting for refill");

            tokio::select! {
                _ = sleep(wait) => {}
                cause = token.cancelled() => return Err(cause.into_error()),
            }
        }
    }

    /// Time since this bucket was last used for an admission check.
    fn idle_for(&self, now: Instant) -> Duration {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        now.saturating_duration_since(state.last)
    }
}

/// Per-identity token buckets sharing one rate/burst configuration.
///
/// Buckets are created lazily on first use and are never evicted
/// automatically; callers that admit unbounded identity sets should
/// periodically invoke [`KeyedRateLimiter::evict_idle`] to bound memory.
/// Admission checks for distinct identities do not synchronize with each
/// other beyond the brief registry lookup.
#[derive(Debug)]
pub struct KeyedRateLimiter<K> {
    rate: f64,
    burst: u32,
    buckets: Mutex<HashMap<K, Arc<RateLimiter>>>,
}

impl<K> KeyedRateLimiter<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty registry; per-key buckets use `rate` and `burst`.
    pub fn new(rate: f64, burst: u32) -> TaskResult<Self> {
        // Validate once up front so lazy bucket creation cannot fail.
        RateLimiter::new(rate, burst)?;

        Ok(Self {
            rate,
            burst,
            buckets: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the bucket for `key`, creating it on first use.
    fn bucket(&self, key: &K) -> Arc<RateLimiter> {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(bucket) = buckets.get(key) {
            return bucket.clone();
        }

        // Configuration was validated in `new`, so the bucket is built directly.
        let bucket = Arc::new(RateLimiter {
            rate: self.rate,
            burst: f64::from(self.burst),
            state: Mutex::new(BucketState {
                tokens: f64::from(self.burst),
                last: Instant::now(),
            }),
        });
        buckets.insert(key.clone(), bucket.clone());
        bucket
    }

    /// Try-semantics admission check for `key`.
    pub fn try_acquire(&self, key: &K) -> TaskResult<()> {
        self.bucket(key).try_acquire()
    }

    /// Wait-semantics admission check for `key`.
    pub async fn acquire(&self, token: &CancellationToken, key: &K) -> TaskResult<()> {
        self.bucket(key).acquire(token).await
    }

    /// Number of identities with a live bucket.
    pub fn len(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` when no identity has a bucket yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes buckets that have not been used for at least `max_idle`,
    /// returning how many were evicted. Opt-in hardening against unbounded
    /// growth of the identity set.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let before = buckets.len();
        buckets.retain(|_, bucket| bucket.idle_for(now) < max_idle);
        before - buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_configuration_is_rejected() {
        assert_eq!(
            RateLimiter::new(0.0, 5).unwrap_err().kind(),
            ErrorKind::ConfigError
        );
        assert_eq!(
            RateLimiter::new(-1.0, 5).unwrap_err().kind(),
            ErrorKind::ConfigError
        );
        assert_eq!(
            RateLimiter::new(1.0, 0).unwrap_err().kind(),
            ErrorKind::ConfigError
        );
    }

    #[tokio::test(start_paused = true)]
    async fn burst_then_denied_under_try_semantics() {
        let limiter = RateLimiter::new(1.0, 3).unwrap();

        for _ in 0..3 {
            limiter.try_acquire().unwrap();
        }

        let err = limiter.try_acquire().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_semantics_delay_at_least_one_over_rate() {
        let limiter = RateLimiter::new(2.0, 1).unwrap();
        let token = CancellationToken::new();

        limiter.acquire(&token).await.unwrap();

        let start = Instant::now();
        limiter.acquire(&token).await.unwrap();
        // Rate of 2/s means the next admission waits at least 500ms.
        assert!(Instant::now() - start >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn refill_never_exceeds_burst() {
        let limiter = RateLimiter::new(100.0, 2).unwrap();
        let token = CancellationToken::new();

        tokio::time::advance(Duration::from_secs(60)).await;

        limiter.acquire(&token).await.unwrap();
        limiter.try_acquire().unwrap();
        assert_eq!(
            limiter.try_acquire().unwrap_err().kind(),
            ErrorKind::RateLimited
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_unblocks_waiting_caller() {
        let limiter = Arc::new(RateLimiter::new(0.001, 1).unwrap());
        let token = CancellationToken::new();
        limiter.try_acquire().unwrap();

        let waiter = {
            let limiter = limiter.clone();
            let token = token.clone();
            tokio::spawn(async move { limiter.acquire(&token).await })
        };

        tokio::task::yield_now().await;
        token.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn keyed_buckets_are_independent_and_evictable() {
        let limiter = KeyedRateLimiter::new(1.0, 1).unwrap();

        limiter.try_acquire(&"alice").unwrap();
        // Alice is drained but Bob still has his own full bucket.
        assert_eq!(
            limiter.try_acquire(&"alice").unwrap_err().kind(),
            ErrorKind::RateLimited
        );
        limiter.try_acquire(&"bob").unwrap();
        assert_eq!(limiter.len(), 2);

        tokio::time::advance(Duration::from_secs(120)).await;
        limiter.try_acquire(&"bob").unwrap();

        let evicted = limiter.evict_idle(Duration::from_secs(60));
        assert_eq!(evicted, 1);
        assert_eq!(limiter.len(), 1);
    }
}
