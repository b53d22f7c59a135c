//! Domain model: ids, task status, tasks and their snapshots.

pub mod ids;
pub mod snapshot;
pub mod state;
pub mod task;

pub use ids::{ParseIdError, RunId, TaskId};
pub use snapshot::{SNAPSHOT_SCHEMA_VERSION, TaskSnapshot};
pub use state::TaskStatus;
pub use task::{
    DEFAULT_MAX_RETRIES, DEFAULT_RETRY_INTERVAL, Task, TaskBody, TaskBuilder, TaskOutput,
};
