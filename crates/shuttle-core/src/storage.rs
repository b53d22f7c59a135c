//! Atomic JSON documents on the local filesystem.
//!
//! Shared by the checkpoint store and the report writer: a document is written
//! to a sibling temp file and renamed into place, so readers see either the
//! old document or the new one, never a torn write.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use ulid::Ulid;

use crate::error::StorageError;

const TEMP_SUFFIX: &str = ".tmp";

pub(crate) async fn write_json_atomic<T: Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StorageError::Encode {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::io(parent, e))?;
    }

    let tmp = temp_path(path);
    fs::write(&tmp, &bytes)
        .await
        .map_err(|e| StorageError::io(&tmp, e))?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(StorageError::io(path, e));
    }
    Ok(())
}

/// `Ok(None)` when the file does not exist.
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::io(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StorageError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

pub(crate) fn is_temp_file(path: &Path) -> bool {
    path.to_str().is_some_and(|s| s.ends_with(TEMP_SUFFIX))
}

// Unique per write so concurrent writers of one document never share a temp file.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}{TEMP_SUFFIX}", Ulid::new()));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[tokio::test]
    async fn write_then_read_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");

        write_json_atomic(&path, &json!({"a": 1})).await.unwrap();
        let back: Option<Value> = read_json(&path).await.unwrap();
        assert_eq!(back, Some(json!({"a": 1})));

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| is_temp_file(p))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn overwrite_replaces_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");

        write_json_atomic(&path, &json!([1])).await.unwrap();
        write_json_atomic(&path, &json!([2])).await.unwrap();
        let back: Option<Value> = read_json(&path).await.unwrap();
        assert_eq!(back, Some(json!([2])));
    }

    #[tokio::test]
    async fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let back: Option<Value> = read_json(&dir.path().join("nope.json")).await.unwrap();
        assert!(back.is_none());
    }

    #[tokio::test]
    async fn garbage_reads_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = read_json::<Value>(&path).await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }

    #[test]
    fn temp_files_are_recognised() {
        assert!(is_temp_file(&temp_path(Path::new("/x/task-1.json"))));
        assert!(!is_temp_file(Path::new("/x/task-1.json")));
    }
}
