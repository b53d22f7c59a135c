//! Scheduler configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::BuildError;
use crate::queue::RetryPolicy;

/// Scheduler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of worker tasks
    #[serde(rename = "max-workers")]
    pub max_workers: usize,

    /// Capacity of the bounded work queue between dispatcher and workers
    #[serde(rename = "queue-capacity")]
    pub queue_capacity: usize,

    /// Upper bound on the dispatcher's sleep between scans
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// Checkpoint directory; checkpoints stay in memory when unset
    #[serde(rename = "checkpoint-dir")]
    pub checkpoint_dir: Option<PathBuf>,

    /// Directory for summary reports
    #[serde(rename = "report-dir")]
    pub report_dir: PathBuf,

    /// Write a summary report as part of `stop()`. Off by default, so a
    /// scheduler only writes into `report-dir` when asked to.
    #[serde(rename = "report-on-stop")]
    pub report_on_stop: bool,

    /// Retry backoff
    pub retry: RetryConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            queue_capacity: 64,
            poll_interval_ms: 100,
            checkpoint_dir: None,
            report_dir: PathBuf::from("reports"),
            report_on_stop: false,
            retry: RetryConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy, BuildError> {
        RetryPolicy::new(
            self.retry.backoff_multiplier,
            Duration::from_millis(self.retry.max_delay_ms),
        )
    }

    /// Fail fast on values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.max_workers == 0 {
            return Err(BuildError::NoWorkers);
        }
        if self.queue_capacity == 0 {
            return Err(BuildError::NoQueueCapacity);
        }
        self.retry_policy().map(|_| ())
    }
}

/// Retry backoff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Growth factor between consecutive retry delays (1.0 = fixed delay)
    #[serde(rename = "backoff-multiplier")]
    pub backoff_multiplier: f64,

    /// Cap for a single retry delay
    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_multiplier: RetryPolicy::DEFAULT_MULTIPLIER,
            max_delay_ms: RetryPolicy::DEFAULT_MAX_DELAY.as_millis() as u64,
        }
    }
}
