//! shuttle-core
//!
//! In-process task orchestration: a priority- and dependency-aware scheduler
//! with a fixed worker pool, bounded retries with backoff, rate limiting for
//! task bodies, per-task checkpoints and run summary reports.
//!
//! # Modules
//! - **domain**: ids, task status, `Task` and its serializable snapshot
//! - **queue**: task registry, dependency graph, retry policy
//! - **scheduler**: `Scheduler`, its builder and config, dispatch and worker loops
//! - **ratelimit**: `RateLimiter` (token bucket, sliding window)
//! - **checkpoint**: `CheckpointStore` port with file and in-memory stores
//! - **report**: `ReportGenerator` and the report writer
//! - **ports**: clock abstraction
//! - **config**: YAML configuration
//! - **error**: error types

pub mod checkpoint;
pub mod config;
pub mod domain;
pub mod error;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod ratelimit;
pub mod report;
pub mod scheduler;
mod storage;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
pub use config::Config;
pub use domain::{Task, TaskBuilder, TaskId, TaskOutput, TaskSnapshot, TaskStatus};
pub use error::{SchedulerError, TaskFailure};
pub use ratelimit::{Algorithm, RateLimitConfig, RateLimiter};
pub use report::{Report, ReportGenerator};
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerConfig};
