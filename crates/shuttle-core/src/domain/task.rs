//! Task: identity, body, dependencies, retry policy and mutable status.
//!
//! The body is an opaque command object. It captures its own arguments and
//! exposes a single zero-argument `run`, so the scheduler never needs to know
//! what a task does.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::snapshot::{SNAPSHOT_SCHEMA_VERSION, TaskSnapshot};
use super::{TaskId, TaskStatus};
use crate::error::{TaskFailure, ValidationError};
use crate::queue::RetryPolicy;

/// What a body returns: a JSON result on success, a message on failure.
pub type TaskOutput = Result<serde_json::Value, TaskFailure>;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// The callable part of a task.
///
/// Invoked at most once per attempt. Implemented for any
/// `Fn() -> impl Future<Output = TaskOutput>` closure, so most callers never
/// implement it by hand.
#[async_trait]
pub trait TaskBody: Send + Sync {
    async fn run(&self) -> TaskOutput;
}

#[async_trait]
impl<F, Fut> TaskBody for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = TaskOutput> + Send + 'static,
{
    async fn run(&self) -> TaskOutput {
        (self)().await
    }
}

/// Adapter running a synchronous closure on tokio's blocking pool.
struct BlockingBody<F> {
    f: Arc<F>,
}

#[async_trait]
impl<F> TaskBody for BlockingBody<F>
where
    F: Fn() -> TaskOutput + Send + Sync + 'static,
{
    async fn run(&self) -> TaskOutput {
        let f = Arc::clone(&self.f);
        match tokio::task::spawn_blocking(move || f()).await {
            Ok(output) => output,
            Err(join_err) => Err(TaskFailure::new(format!(
                "blocking body did not finish: {join_err}"
            ))),
        }
    }
}

/// A schedulable unit of work.
///
/// Only the scheduler mutates a task after registration; everything else sees
/// it through [`TaskSnapshot`].
pub struct Task {
    id: TaskId,
    name: String,
    body: Arc<dyn TaskBody>,
    status: TaskStatus,
    priority: i32,
    dependencies: BTreeSet<TaskId>,
    retry_count: u32,
    max_retries: u32,
    retry_interval: Duration,
    created_at: DateTime<Utc>,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    result: Option<serde_json::Value>,
    error: Option<String>,

    /// When a `Retrying` task becomes eligible again.
    next_run_at: Option<Instant>,
}

impl Task {
    /// Start building a task around an async closure.
    pub fn builder<F, Fut>(name: impl Into<String>, f: F) -> TaskBuilder
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskOutput> + Send + 'static,
    {
        TaskBuilder::new(name.into(), Arc::new(f))
    }

    /// Start building a task around a hand-written [`TaskBody`].
    pub fn with_body(name: impl Into<String>, body: Arc<dyn TaskBody>) -> TaskBuilder {
        TaskBuilder::new(name.into(), body)
    }

    /// Start building a task around a synchronous (blocking) closure.
    pub fn blocking<F>(name: impl Into<String>, f: F) -> TaskBuilder
    where
        F: Fn() -> TaskOutput + Send + Sync + 'static,
    {
        TaskBuilder::new(name.into(), Arc::new(BlockingBody { f: Arc::new(f) }))
    }

    /// Task with default priority, no dependencies and the default retry policy.
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Result<Self, ValidationError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskOutput> + Send + 'static,
    {
        Self::builder(name, f).build()
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn dependencies(&self) -> &BTreeSet<TaskId> {
        &self.dependencies
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Serializable view of the task. Never includes the body.
    pub fn to_snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            id: self.id,
            name: self.name.clone(),
            status: self.status,
            priority: self.priority,
            dependencies: self.dependencies.iter().copied().collect(),
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            result: self.result.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            start_time: self.start_time,
            end_time: self.end_time,
        }
    }

    pub(crate) fn body(&self) -> Arc<dyn TaskBody> {
        Arc::clone(&self.body)
    }

    pub(crate) fn next_run_at(&self) -> Option<Instant> {
        self.next_run_at
    }

    fn transition(&mut self, next: TaskStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal transition {} -> {} for {}",
            self.status,
            next,
            self.id
        );
        self.status = next;
    }

    /// Pending -> Running. Starts a new attempt.
    pub(crate) fn mark_running(&mut self, now: DateTime<Utc>) {
        self.transition(TaskStatus::Running);
        self.start_time = Some(now);
        self.end_time = None;
    }

    /// Running -> Completed.
    pub(crate) fn mark_completed(&mut self, result: serde_json::Value, now: DateTime<Utc>) {
        self.transition(TaskStatus::Completed);
        self.result = Some(result);
        self.error = None;
        self.end_time = Some(now);
    }

    /// Running -> Failed. Whether it stays failed is decided by `schedule_retry`.
    pub(crate) fn mark_failed(&mut self, error: String, now: DateTime<Utc>) {
        self.transition(TaskStatus::Failed);
        self.error = Some(error);
        self.result = None;
        self.end_time = Some(now);
    }

    /// Failed -> Retrying, if the retry budget allows it.
    ///
    /// Returns the backoff delay, or `None` when retries are exhausted and the
    /// task stays terminally failed.
    pub(crate) fn schedule_retry(&mut self, policy: &RetryPolicy, now: Instant) -> Option<Duration> {
        if self.status != TaskStatus::Failed || self.retry_count >= self.max_retries {
            return None;
        }
        self.retry_count += 1;
        let delay = policy.next_delay(self.retry_interval, self.retry_count);
        self.transition(TaskStatus::Retrying);
        self.next_run_at = Some(now + delay);
        Some(delay)
    }

    /// Retrying -> Pending once the backoff has elapsed.
    pub(crate) fn requeue(&mut self) {
        self.transition(TaskStatus::Pending);
        self.next_run_at = None;
    }

    /// Apply a checkpoint taken by a previous process.
    ///
    /// Terminal states are restored as-is. Anything in flight (running,
    /// retrying) comes back as pending: the interrupted attempt is lost, the
    /// retry budget already spent is kept.
    pub(crate) fn restore(&mut self, snapshot: &TaskSnapshot) {
        self.retry_count = snapshot.retry_count.min(self.max_retries);
        self.start_time = snapshot.start_time;
        self.end_time = snapshot.end_time;
        self.next_run_at = None;
        match snapshot.status {
            TaskStatus::Completed => {
                self.status = TaskStatus::Completed;
                self.result = snapshot.result.clone();
                self.error = None;
            }
            TaskStatus::Failed => {
                self.status = TaskStatus::Failed;
                self.result = None;
                self.error = snapshot.error.clone();
            }
            TaskStatus::Pending | TaskStatus::Running | TaskStatus::Retrying => {
                self.status = TaskStatus::Pending;
                self.result = None;
                self.error = snapshot.error.clone();
            }
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status)
            .field("priority", &self.priority)
            .field("dependencies", &self.dependencies)
            .field("retry_count", &self.retry_count)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Task`]. Validation happens in [`TaskBuilder::build`].
pub struct TaskBuilder {
    id: TaskId,
    name: String,
    body: Arc<dyn TaskBody>,
    priority: i32,
    dependencies: BTreeSet<TaskId>,
    max_retries: u32,
    retry_interval_secs: f64,
}

impl TaskBuilder {
    fn new(name: String, body: Arc<dyn TaskBody>) -> Self {
        Self {
            id: TaskId::generate(),
            name,
            body,
            priority: 0,
            dependencies: BTreeSet::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_interval_secs: DEFAULT_RETRY_INTERVAL.as_secs_f64(),
        }
    }

    /// The id the task will have. Useful for wiring dependencies before `build`.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Use a caller-chosen id instead of a fresh one.
    ///
    /// Checkpoints are keyed by id, so a process that wants to resume after a
    /// restart must register its tasks under the same ids again.
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on(mut self, id: TaskId) -> Self {
        self.dependencies.insert(id);
        self
    }

    pub fn dependencies(mut self, ids: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies.extend(ids);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval_secs = interval.as_secs_f64();
        self
    }

    /// Retry interval in (possibly fractional) seconds, as found in config files.
    pub fn retry_interval_secs(mut self, secs: f64) -> Self {
        self.retry_interval_secs = secs;
        self
    }

    pub fn build(self) -> Result<Task, ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if !self.retry_interval_secs.is_finite() || self.retry_interval_secs < 0.0 {
            return Err(ValidationError::InvalidRetryInterval(self.retry_interval_secs));
        }
        let retry_interval = Duration::try_from_secs_f64(self.retry_interval_secs)
            .map_err(|_| ValidationError::InvalidRetryInterval(self.retry_interval_secs))?;
        if self.dependencies.contains(&self.id) {
            return Err(ValidationError::SelfDependency(self.id));
        }

        Ok(Task {
            id: self.id,
            name: self.name,
            body: self.body,
            status: TaskStatus::Pending,
            priority: self.priority,
            dependencies: self.dependencies,
            retry_count: 0,
            max_retries: self.max_retries,
            retry_interval,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            result: None,
            error: None,
            next_run_at: None,
        })
    }
}
