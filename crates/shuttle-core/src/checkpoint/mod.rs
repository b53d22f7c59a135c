//! Checkpoint port: per-task snapshots that survive a restart.
//!
//! A checkpoint is the latest [`TaskSnapshot`] of one task, keyed by task id.
//! Records are independent; a damaged record never prevents the others from
//! loading.

mod file;
mod memory;

pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::{TaskId, TaskSnapshot};
use crate::error::StorageError;

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Insert or overwrite the record for `snapshot.id`.
    async fn save(&self, snapshot: &TaskSnapshot) -> Result<(), StorageError>;

    async fn load(&self, id: TaskId) -> Result<Option<TaskSnapshot>, StorageError>;

    /// Every readable record. Unreadable ones are logged and skipped.
    async fn load_all(&self) -> Result<HashMap<TaskId, TaskSnapshot>, StorageError>;

    /// Remove one record, or all of them when `id` is `None`. Removing a
    /// record that does not exist is not an error.
    async fn clear(&self, id: Option<TaskId>) -> Result<(), StorageError>;
}
