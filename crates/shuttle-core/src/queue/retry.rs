//! Retry policy: decides backoff delays.

use std::time::Duration;

use crate::error::BuildError;

/// Backoff applied on top of each task's own `retry_interval`.
///
/// delay(n) = retry_interval * multiplier^(n - 1), capped at `max_delay`
/// (or at `retry_interval` itself if that is larger), where `n` is the
/// 1-indexed retry number.
///
/// `multiplier >= 1.0` keeps the curve monotonic non-decreasing.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for a single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const DEFAULT_MULTIPLIER: f64 = 2.0;
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

    pub fn new(multiplier: f64, max_delay: Duration) -> Result<Self, BuildError> {
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(BuildError::InvalidBackoff(format!(
                "multiplier must be a finite value >= 1.0 (got {multiplier})"
            )));
        }
        Ok(Self {
            multiplier,
            max_delay,
        })
    }

    /// Exponential backoff with the default multiplier and cap.
    pub fn exponential() -> Self {
        Self {
            multiplier: Self::DEFAULT_MULTIPLIER,
            max_delay: Self::DEFAULT_MAX_DELAY,
        }
    }

    /// Every retry waits exactly `retry_interval`.
    pub fn fixed() -> Self {
        Self {
            multiplier: 1.0,
            max_delay: Duration::MAX,
        }
    }

    /// Delay before retry number `retry` (1-indexed; 0 is treated as 1).
    ///
    /// Example with base=2s, multiplier=2.0:
    /// - retry 1: 2s
    /// - retry 2: 4s
    /// - retry 3: 8s
    pub fn next_delay(&self, base: Duration, retry: u32) -> Duration {
        let cap = self.max_delay.max(base);
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = base.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= cap.as_secs_f64() {
            return cap;
        }
        Duration::from_secs_f64(secs)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}
