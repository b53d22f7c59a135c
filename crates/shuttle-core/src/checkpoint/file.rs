use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use super::CheckpointStore;
use crate::domain::{TaskId, TaskSnapshot};
use crate::error::StorageError;
use crate::storage::{is_temp_file, read_json, write_json_atomic};

/// One JSON document per task at `{dir}/{task_id}.json`.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// The directory is created lazily on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, id: TaskId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Paths of every checkpoint-looking file. A missing directory has none.
    async fn record_paths(&self) -> Result<Vec<PathBuf>, StorageError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.dir, e)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&self.dir, e))?
        {
            let path = entry.path();
            if is_record(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }
}

/// `{task_id}.json`, or a temp file left behind while writing one. Other
/// JSON documents sharing the directory (reports, for one) are not records.
fn is_record(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    let Some((stem, rest)) = name.split_once(".json") else {
        return false;
    };
    (rest.is_empty() || is_temp_file(path)) && stem.parse::<TaskId>().is_ok()
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, snapshot: &TaskSnapshot) -> Result<(), StorageError> {
        let path = self.path_for(snapshot.id);
        write_json_atomic(&path, snapshot).await?;
        debug!(task_id = %snapshot.id, status = %snapshot.status, path = %path.display(), "checkpoint saved");
        Ok(())
    }

    async fn load(&self, id: TaskId) -> Result<Option<TaskSnapshot>, StorageError> {
        read_json(&self.path_for(id)).await
    }

    async fn load_all(&self) -> Result<HashMap<TaskId, TaskSnapshot>, StorageError> {
        let mut out = HashMap::new();
        for path in self.record_paths().await? {
            if is_temp_file(&path) {
                continue;
            }
            match read_json::<TaskSnapshot>(&path).await {
                Ok(Some(snapshot)) => {
                    out.insert(snapshot.id, snapshot);
                }
                // Removed between listing and reading.
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable checkpoint"),
            }
        }
        Ok(out)
    }

    async fn clear(&self, id: Option<TaskId>) -> Result<(), StorageError> {
        let paths = match id {
            Some(id) => vec![self.path_for(id)],
            None => self.record_paths().await?,
        };
        for path in paths {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::io(&path, e)),
            }
        }
        Ok(())
    }
}
