use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::CheckpointStore;
use crate::domain::{TaskId, TaskSnapshot};
use crate::error::StorageError;

/// Checkpoints held in process memory. Used by tests and by runs that do not
/// need to survive a restart.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    records: Mutex<HashMap<TaskId, TaskSnapshot>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, TaskSnapshot>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, snapshot: &TaskSnapshot) -> Result<(), StorageError> {
        self.records().insert(snapshot.id, snapshot.clone());
        Ok(())
    }

    async fn load(&self, id: TaskId) -> Result<Option<TaskSnapshot>, StorageError> {
        Ok(self.records().get(&id).cloned())
    }

    async fn load_all(&self) -> Result<HashMap<TaskId, TaskSnapshot>, StorageError> {
        Ok(self.records().clone())
    }

    async fn clear(&self, id: Option<TaskId>) -> Result<(), StorageError> {
        match id {
            Some(id) => {
                self.records().remove(&id);
            }
            None => self.records().clear(),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Task;
    use serde_json::json;

    fn snapshot(name: &str) -> TaskSnapshot {
        Task::new(name, || async { Ok(json!(null)) })
            .unwrap()
            .to_snapshot()
    }

    #[tokio::test]
    async fn save_overwrites_by_id() {
        let store = InMemoryCheckpointStore::new();
        let mut snap = snapshot("a");
        store.save(&snap).await.unwrap();

        snap.retry_count = 2;
        store.save(&snap).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.load(snap.id).await.unwrap(), Some(snap));
    }

    #[tokio::test]
    async fn clear_one_or_all() {
        let store = InMemoryCheckpointStore::new();
        let a = snapshot("a");
        let b = snapshot("b");
        store.save(&a).await.unwrap();
        store.save(&b).await.unwrap();

        store.clear(Some(a.id)).await.unwrap();
        assert!(store.load(a.id).await.unwrap().is_none());
        assert_eq!(store.len(), 1);

        store.clear(None).await.unwrap();
        assert!(store.is_empty());
    }
}
