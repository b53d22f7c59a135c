//! Thread-safe admission control.
//!
//! One [`RateLimiter`] is shared (behind `Arc`) by every task body that talks
//! to the same upstream. The limiter state sits behind a `std::sync::Mutex`
//! whose critical sections never await, so it is safe to call from both async
//! bodies and `spawn_blocking` bodies.

mod config;
mod sliding_window;
mod token_bucket;

pub use config::{Algorithm, RateLimitConfig};

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::RateLimitError;

use sliding_window::SlidingWindow;
use token_bucket::TokenBucket;

/// Lower and upper bounds on a single `wait` sleep.
const MIN_POLL: Duration = Duration::from_millis(1);
const MAX_POLL: Duration = Duration::from_millis(50);

#[derive(Debug)]
enum LimiterState {
    TokenBucket(TokenBucket),
    SlidingWindow(SlidingWindow),
}

#[derive(Debug)]
pub struct RateLimiter {
    algorithm: Algorithm,
    max_requests: u32,
    time_window: Duration,
    bucket_size: u32,
    refill_rate: f64,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Validate `config` and build a limiter with a full budget.
    pub fn new(config: RateLimitConfig) -> Result<Self, RateLimitError> {
        let max_requests = match config.max_requests {
            None => return Err(invalid("max_requests is required")),
            Some(0) => return Err(invalid("max_requests must be at least 1")),
            Some(n) => n,
        };

        let window_secs = config
            .time_window
            .ok_or_else(|| invalid("time_window is required"))?;
        if !window_secs.is_finite() || window_secs <= 0.0 {
            return Err(invalid(format!(
                "time_window must be a positive number of seconds (got {window_secs})"
            )));
        }
        let time_window = Duration::try_from_secs_f64(window_secs)
            .map_err(|e| invalid(format!("time_window out of range: {e}")))?;

        // Bucket fields only constrain the token bucket; a sliding window
        // reports the values derived from its own budget.
        let derived_rate = f64::from(max_requests) / window_secs;
        let (bucket_size, refill_rate) = match config.algorithm {
            Algorithm::TokenBucket => {
                let bucket_size = config.bucket_size.unwrap_or(max_requests);
                if bucket_size == 0 {
                    return Err(invalid("bucket_size must be at least 1"));
                }
                let refill_rate = config.refill_rate.unwrap_or(derived_rate);
                if !refill_rate.is_finite() || refill_rate <= 0.0 {
                    return Err(invalid(format!(
                        "refill_rate must be a positive number of tokens per second (got {refill_rate})"
                    )));
                }
                (bucket_size, refill_rate)
            }
            Algorithm::SlidingWindow => (max_requests, derived_rate),
        };

        let state = match config.algorithm {
            Algorithm::TokenBucket => {
                LimiterState::TokenBucket(TokenBucket::new(bucket_size, refill_rate, Instant::now()))
            }
            Algorithm::SlidingWindow => {
                LimiterState::SlidingWindow(SlidingWindow::new(max_requests, time_window))
            }
        };

        Ok(Self {
            algorithm: config.algorithm,
            max_requests,
            time_window,
            bucket_size,
            refill_rate,
            state: Mutex::new(state),
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub fn time_window(&self) -> Duration {
        self.time_window
    }

    pub fn bucket_size(&self) -> u32 {
        self.bucket_size
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Non-blocking attempt to take one slot.
    pub fn acquire(&self) -> bool {
        self.acquire_at(Instant::now())
    }

    pub(crate) fn acquire_at(&self, now: Instant) -> bool {
        match &mut *self.lock() {
            LimiterState::TokenBucket(bucket) => bucket.try_acquire(now),
            LimiterState::SlidingWindow(window) => window.try_acquire(now),
        }
    }

    /// Slots that `acquire` would grant right now.
    pub fn available(&self) -> u32 {
        let now = Instant::now();
        match &mut *self.lock() {
            LimiterState::TokenBucket(bucket) => bucket.available(now),
            LimiterState::SlidingWindow(window) => window.available(now),
        }
    }

    /// Lower bound on how long until `acquire` can succeed.
    pub fn time_until_available(&self) -> Duration {
        self.time_until_available_at(Instant::now())
    }

    fn time_until_available_at(&self, now: Instant) -> Duration {
        match &mut *self.lock() {
            LimiterState::TokenBucket(bucket) => bucket.time_until_available(now),
            LimiterState::SlidingWindow(window) => window.time_until_available(now),
        }
    }

    /// Retry `acquire` until it succeeds or `timeout` (default: one
    /// `time_window`) elapses.
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<(), RateLimitError> {
        let timeout = timeout.unwrap_or(self.time_window);
        let deadline = Instant::now().checked_add(timeout);
        loop {
            match self.next_wait_step(deadline) {
                WaitStep::Acquired => return Ok(()),
                WaitStep::TimedOut => return Err(self.timed_out(timeout)),
                WaitStep::Sleep(d) => tokio::time::sleep(d).await,
            }
        }
    }

    /// Blocking variant of [`RateLimiter::wait`] for `Task::blocking` bodies.
    /// Must not be called from an async context.
    pub fn wait_blocking(&self, timeout: Option<Duration>) -> Result<(), RateLimitError> {
        let timeout = timeout.unwrap_or(self.time_window);
        let deadline = Instant::now().checked_add(timeout);
        loop {
            match self.next_wait_step(deadline) {
                WaitStep::Acquired => return Ok(()),
                WaitStep::TimedOut => return Err(self.timed_out(timeout)),
                WaitStep::Sleep(d) => std::thread::sleep(d),
            }
        }
    }

    /// A `deadline` of `None` means the timeout is too large to represent
    /// and the wait never expires.
    fn next_wait_step(&self, deadline: Option<Instant>) -> WaitStep {
        let now = Instant::now();
        if self.acquire_at(now) {
            return WaitStep::Acquired;
        }
        let remaining = deadline.map_or(Duration::MAX, |d| d.saturating_duration_since(now));
        if remaining.is_zero() {
            return WaitStep::TimedOut;
        }
        let hint = self.time_until_available_at(now).clamp(MIN_POLL, MAX_POLL);
        WaitStep::Sleep(hint.min(remaining))
    }

    fn timed_out(&self, timeout: Duration) -> RateLimitError {
        debug!(algorithm = ?self.algorithm, ?timeout, "rate limit wait timed out");
        RateLimitError::Timeout(timeout)
    }

    /// Restore the full budget.
    pub fn reset(&self) {
        let now = Instant::now();
        match &mut *self.lock() {
            LimiterState::TokenBucket(bucket) => bucket.reset(now),
            LimiterState::SlidingWindow(window) => window.reset(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        // State is updated in place with no intermediate invalid values, so a
        // poisoned guard is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum WaitStep {
    Acquired,
    TimedOut,
    Sleep(Duration),
}

fn invalid(message: impl Into<String>) -> RateLimitError {
    RateLimitError::InvalidConfig(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sliding(max: u32, window: Duration) -> RateLimiter {
        RateLimiter::new(RateLimitConfig::sliding_window(max, window)).unwrap()
    }

    #[test]
    fn five_per_second_then_refills() {
        let limiter = sliding(5, Duration::from_secs(1));
        let start = Instant::now();

        for _ in 0..5 {
            assert!(limiter.acquire_at(start));
        }
        assert!(!limiter.acquire_at(start));

        let later = start + Duration::from_millis(1001);
        assert!(limiter.acquire_at(later));
    }

    #[test]
    fn token_bucket_allows_burst_up_to_bucket_size() {
        let limiter = RateLimiter::new(
            RateLimitConfig::token_bucket(10, Duration::from_secs(1)).with_bucket_size(3),
        )
        .unwrap();
        assert_eq!(limiter.bucket_size(), 3);
        assert_eq!(limiter.refill_rate(), 10.0);

        let start = Instant::now();
        let granted = (0..10).filter(|_| limiter.acquire_at(start)).count();
        assert_eq!(granted, 3);
    }

    #[test]
    fn token_bucket_defaults_derive_from_window() {
        let limiter =
            RateLimiter::new(RateLimitConfig::token_bucket(6, Duration::from_secs(2))).unwrap();
        assert_eq!(limiter.bucket_size(), 6);
        assert_eq!(limiter.refill_rate(), 3.0);
        assert_eq!(limiter.available(), 6);
    }

    #[test]
    fn reset_restores_budget() {
        let limiter = sliding(2, Duration::from_secs(60));
        assert!(limiter.acquire());
        assert!(limiter.acquire());
        assert!(!limiter.acquire());
        assert_eq!(limiter.available(), 0);

        limiter.reset();
        assert_eq!(limiter.available(), 2);
        assert!(limiter.acquire());
    }

    #[test]
    fn concurrent_acquires_never_exceed_budget() {
        let limiter = Arc::new(sliding(50, Duration::from_secs(60)));
        let granted = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|s| {
            for _ in 0..16 {
                let limiter = Arc::clone(&limiter);
                let granted = Arc::clone(&granted);
                s.spawn(move || {
                    for _ in 0..20 {
                        if limiter.acquire() {
                            granted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(granted.load(Ordering::SeqCst), 50);
    }

    #[test]
    fn concurrent_token_bucket_acquires_grant_exactly_bucket_size() {
        // Refill is negligible for the length of the test.
        let limiter = Arc::new(
            RateLimiter::new(
                RateLimitConfig::token_bucket(1, Duration::from_secs(1))
                    .with_bucket_size(40)
                    .with_refill_rate(1e-9),
            )
            .unwrap(),
        );
        let granted = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|s| {
            for _ in 0..16 {
                let limiter = Arc::clone(&limiter);
                let granted = Arc::clone(&granted);
                s.spawn(move || {
                    for _ in 0..20 {
                        if limiter.acquire() {
                            granted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(granted.load(Ordering::SeqCst), 40);
        assert_eq!(limiter.available(), 0);
    }

    #[tokio::test]
    async fn wait_succeeds_once_window_slides() {
        let limiter = sliding(1, Duration::from_millis(100));
        assert!(limiter.acquire());

        let start = Instant::now();
        limiter.wait(Some(Duration::from_secs(2))).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn wait_times_out() {
        let limiter = sliding(1, Duration::from_secs(60));
        assert!(limiter.acquire());

        let err = limiter.wait(Some(Duration::from_millis(30))).await.unwrap_err();
        assert_eq!(err, RateLimitError::Timeout(Duration::from_millis(30)));
    }

    #[test]
    fn wait_blocking_acquires_from_token_bucket() {
        let limiter = RateLimiter::new(
            RateLimitConfig::token_bucket(1, Duration::from_secs(1)).with_refill_rate(50.0),
        )
        .unwrap();
        assert!(limiter.acquire());
        limiter.wait_blocking(Some(Duration::from_secs(1))).unwrap();
    }

    #[tokio::test]
    async fn unbounded_timeout_still_acquires() {
        let limiter = sliding(1, Duration::from_millis(50));
        assert!(limiter.acquire());
        limiter.wait(Some(Duration::MAX)).await.unwrap();
    }

    #[tokio::test]
    async fn huge_window_default_timeout_does_not_overflow() {
        let limiter = sliding(1, Duration::from_secs(u64::MAX / 2));
        assert!(limiter.acquire());
        let waited = tokio::time::timeout(Duration::from_millis(50), limiter.wait(None)).await;
        assert!(waited.is_err(), "wait should still be pending");
    }

    #[test]
    fn tiny_refill_rate_times_out_instead_of_panicking() {
        let limiter = RateLimiter::new(
            RateLimitConfig::token_bucket(1, Duration::from_secs(1)).with_refill_rate(1e-300),
        )
        .unwrap();
        assert!(limiter.acquire());
        assert_eq!(limiter.time_until_available(), Duration::MAX);

        let err = limiter.wait_blocking(Some(Duration::from_millis(10))).unwrap_err();
        assert_eq!(err, RateLimitError::Timeout(Duration::from_millis(10)));
    }

    #[test]
    fn sliding_window_ignores_bucket_fields() {
        let config = RateLimitConfig {
            bucket_size: Some(0),
            refill_rate: Some(-1.0),
            ..RateLimitConfig::sliding_window(4, Duration::from_secs(2))
        };
        let limiter = RateLimiter::new(config).unwrap();
        assert_eq!(limiter.bucket_size(), 4);
        assert_eq!(limiter.refill_rate(), 2.0);
    }

    #[rstest]
    #[case::missing_max(RateLimitConfig { time_window: Some(1.0), ..Default::default() })]
    #[case::zero_max(RateLimitConfig { max_requests: Some(0), time_window: Some(1.0), ..Default::default() })]
    #[case::missing_window(RateLimitConfig { max_requests: Some(1), ..Default::default() })]
    #[case::zero_window(RateLimitConfig { max_requests: Some(1), time_window: Some(0.0), ..Default::default() })]
    #[case::negative_window(RateLimitConfig { max_requests: Some(1), time_window: Some(-1.0), ..Default::default() })]
    #[case::nan_window(RateLimitConfig { max_requests: Some(1), time_window: Some(f64::NAN), ..Default::default() })]
    #[case::zero_bucket(RateLimitConfig::token_bucket(1, Duration::from_secs(1)).with_bucket_size(0))]
    #[case::negative_refill(RateLimitConfig::token_bucket(1, Duration::from_secs(1)).with_refill_rate(-2.0))]
    fn invalid_configs_are_rejected(#[case] config: RateLimitConfig) {
        let err = RateLimiter::new(config).unwrap_err();
        assert!(matches!(err, RateLimitError::InvalidConfig(_)), "{err:?}");
    }
}
