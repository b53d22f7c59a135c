use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::domain::{TaskId, TaskStatus};

/// Usage errors surfaced by the scheduler's public API.
///
/// Task-body failures never show up here: they are absorbed into the task's
/// own `error` field and observed through `get_task`.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task {0} is already registered")]
    DuplicateTask(TaskId),

    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("cannot {action} task {id} while it is {status}")]
    InvalidState {
        id: TaskId,
        status: TaskStatus,
        action: &'static str,
    },

    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("dependency cycle detected: {}", join_ids(.0))]
    DependencyCycle(Vec<TaskId>),

    #[error("tasks still in flight after {0:?}")]
    IdleTimeout(Duration),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Task construction errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("task name must not be empty")]
    EmptyName,

    #[error("retry interval must be a finite, non-negative number of seconds (got {0})")]
    InvalidRetryInterval(f64),

    #[error("task {0} cannot depend on itself")]
    SelfDependency(TaskId),
}

/// Rate limiter errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RateLimitError {
    #[error("invalid rate limit config: {0}")]
    InvalidConfig(String),

    #[error("no rate limit slot became available within {0:?}")]
    Timeout(Duration),
}

/// Errors from the on-disk checkpoint and report storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode document for {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("corrupt record at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Scheduler construction errors (fail fast before anything is spawned).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("max_workers must be at least 1")]
    NoWorkers,

    #[error("queue_capacity must be at least 1")]
    NoQueueCapacity,

    #[error("invalid retry backoff: {0}")]
    InvalidBackoff(String),
}

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(transparent)]
    Scheduler(#[from] BuildError),

    #[error("rate limit '{name}': {source}")]
    RateLimit {
        name: String,
        #[source]
        source: RateLimitError,
    },
}

/// Error returned by a task body.
///
/// Deliberately just a message: the scheduler records it in the task's `error`
/// field and in checkpoints, so it has to be serializable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TaskFailure {
    message: String,
}

impl TaskFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn into_message(self) -> String {
        self.message
    }
}

impl From<String> for TaskFailure {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for TaskFailure {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<RateLimitError> for TaskFailure {
    fn from(err: RateLimitError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<std::io::Error> for TaskFailure {
    fn from(err: std::io::Error) -> Self {
        Self::new(format!("io: {err}"))
    }
}

impl From<serde_json::Error> for TaskFailure {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("json: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_failure_converts_from_common_errors() {
        let f: TaskFailure = "boom".into();
        assert_eq!(f.message(), "boom");

        let f: TaskFailure = RateLimitError::Timeout(Duration::from_secs(1)).into();
        assert!(f.message().contains("rate limit"));

        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let f: TaskFailure = json_err.into();
        assert!(f.message().starts_with("json:"));
    }

    #[test]
    fn cycle_error_lists_path() {
        let a = TaskId::generate();
        let b = TaskId::generate();
        let msg = SchedulerError::DependencyCycle(vec![a, b, a]).to_string();
        assert!(msg.contains(&format!("{a} -> {b} -> {a}")));
    }
}
