//! SchedulerBuilder: wiring and fail-fast validation.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use super::{Scheduler, SchedulerConfig, Shared};
use crate::checkpoint::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
use crate::error::BuildError;
use crate::ports::{Clock, SystemClock};
use crate::queue::{RetryPolicy, TaskRegistry};

/// Builds a [`Scheduler`].
///
/// # Example
/// ```ignore
/// let scheduler = SchedulerBuilder::from_config(config.scheduler.clone())
///     .clock(Arc::new(SystemClock))
///     .build()?;
/// ```
///
/// Without an explicit [`CheckpointStore`], checkpoints go to
/// `checkpoint_dir` when configured and stay in memory otherwise.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    retry: Option<RetryPolicy>,
    store: Option<Arc<dyn CheckpointStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self::from_config(SchedulerConfig::default())
    }

    pub fn from_config(config: SchedulerConfig) -> Self {
        Self {
            config,
            retry: None,
            store: None,
            clock: None,
        }
    }

    pub fn max_workers(mut self, n: usize) -> Self {
        self.config.max_workers = n;
        self
    }

    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.config.queue_capacity = n;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.checkpoint_dir = Some(dir.into());
        self
    }

    pub fn report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.report_dir = dir.into();
        self
    }

    pub fn report_on_stop(mut self, enabled: bool) -> Self {
        self.config.report_on_stop = enabled;
        self
    }

    /// Overrides the backoff from the config's `retry` section.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<Scheduler, BuildError> {
        self.config.validate()?;
        let retry = match self.retry {
            Some(policy) => RetryPolicy::new(policy.multiplier, policy.max_delay)?,
            None => self.config.retry_policy()?,
        };

        let store: Arc<dyn CheckpointStore> = match (self.store, &self.config.checkpoint_dir) {
            (Some(store), _) => store,
            (None, Some(dir)) => Arc::new(FileCheckpointStore::new(dir.clone())),
            (None, None) => Arc::new(InMemoryCheckpointStore::new()),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let shared = Shared {
            registry: Mutex::new(TaskRegistry::new()),
            store,
            clock,
            retry,
            poll_interval: self.config.poll_interval().max(Duration::from_millis(1)),
            wake: Notify::new(),
            progress: Notify::new(),
            persisted: tokio::sync::Mutex::new(HashMap::new()),
        };

        Ok(Scheduler {
            shared: Arc::new(shared),
            config: self.config,
            running: Arc::new(tokio::sync::Mutex::new(None)),
        })
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_with_defaults() {
        let scheduler = SchedulerBuilder::new().build().unwrap();
        assert_eq!(scheduler.config().max_workers, 4);
    }

    #[test]
    fn test_build_rejects_zero_workers() {
        let err = SchedulerBuilder::new().max_workers(0).build().err();
        assert_eq!(err, Some(BuildError::NoWorkers));
    }

    #[test]
    fn test_build_rejects_zero_capacity() {
        let err = SchedulerBuilder::new().queue_capacity(0).build().err();
        assert_eq!(err, Some(BuildError::NoQueueCapacity));
    }

    #[test]
    fn test_build_rejects_shrinking_retry_policy() {
        let policy = RetryPolicy {
            multiplier: 0.1,
            max_delay: Duration::from_secs(1),
        };
        let err = SchedulerBuilder::new().retry_policy(policy).build().err();
        assert!(matches!(err, Some(BuildError::InvalidBackoff(_))));
    }

    #[test]
    fn test_setters_land_in_config() {
        let scheduler = SchedulerBuilder::new()
            .max_workers(3)
            .queue_capacity(7)
            .poll_interval(Duration::from_millis(25))
            .checkpoint_dir("/tmp/ckpt")
            .report_dir("/tmp/reports")
            .report_on_stop(true)
            .build()
            .unwrap();
        let config = scheduler.config();
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.queue_capacity, 7);
        assert_eq!(config.poll_interval_ms, 25);
        assert_eq!(config.checkpoint_dir, Some(PathBuf::from("/tmp/ckpt")));
        assert_eq!(config.report_dir, PathBuf::from("/tmp/reports"));
        assert!(config.report_on_stop);
    }
}
