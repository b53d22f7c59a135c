//! Rate limiter configuration surface.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Admission algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    TokenBucket,
    #[default]
    SlidingWindow,
}

/// Rate limiter configuration, consumed once at construction.
///
/// `max_requests` and `time_window` (seconds) are required; they are
/// optional here only so that a missing value is reported as an
/// `InvalidConfig` error instead of a generic parse failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_requests: Option<u32>,

    /// Window length in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<f64>,

    #[serde(default)]
    pub algorithm: Algorithm,

    /// Token bucket only. Defaults to `max_requests`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_size: Option<u32>,

    /// Token bucket only, tokens per second. Defaults to `max_requests / time_window`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refill_rate: Option<f64>,
}

impl RateLimitConfig {
    pub fn sliding_window(max_requests: u32, time_window: Duration) -> Self {
        Self {
            max_requests: Some(max_requests),
            time_window: Some(time_window.as_secs_f64()),
            algorithm: Algorithm::SlidingWindow,
            ..Default::default()
        }
    }

    pub fn token_bucket(max_requests: u32, time_window: Duration) -> Self {
        Self {
            max_requests: Some(max_requests),
            time_window: Some(time_window.as_secs_f64()),
            algorithm: Algorithm::TokenBucket,
            ..Default::default()
        }
    }

    pub fn with_bucket_size(mut self, bucket_size: u32) -> Self {
        self.bucket_size = Some(bucket_size);
        self
    }

    pub fn with_refill_rate(mut self, tokens_per_sec: f64) -> Self {
        self.refill_rate = Some(tokens_per_sec);
        self
    }
}
