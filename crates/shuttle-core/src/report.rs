//! Run summary reports.
//!
//! [`ReportGenerator::build`] is pure over a set of snapshots; writing the
//! result to disk is a separate step so the document can be inspected or
//! shipped elsewhere.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{RunId, SNAPSHOT_SCHEMA_VERSION, TaskSnapshot, TaskStatus};
use crate::error::StorageError;
use crate::ports::Clock;
use crate::storage::write_json_atomic;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    /// Snapshot schema version of the entries in `data`.
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub data: Vec<TaskSnapshot>,
}

pub struct ReportGenerator {
    clock: Arc<dyn Clock>,
}

impl ReportGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn build(&self, snapshots: &[TaskSnapshot]) -> Report {
        let count = |status: TaskStatus| snapshots.iter().filter(|s| s.status == status).count();
        Report {
            metadata: ReportMetadata {
                run_id: RunId::generate(),
                created_at: self.clock.now(),
                total_tasks: snapshots.len(),
                completed_tasks: count(TaskStatus::Completed),
                failed_tasks: count(TaskStatus::Failed),
                version: SNAPSHOT_SCHEMA_VERSION,
            },
            data: snapshots.to_vec(),
        }
    }
}

/// Write `report` as `{dir}/report_{run_id}.json` plus one
/// `{dir}/{task_id}_{run_id}.json` per task. Returns the run file path.
pub async fn write_report(dir: &Path, report: &Report) -> Result<PathBuf, StorageError> {
    let run_id = report.metadata.run_id;
    for snapshot in &report.data {
        let path = dir.join(format!("{}_{run_id}.json", snapshot.id));
        write_json_atomic(&path, snapshot).await?;
    }

    let path = dir.join(format!("report_{run_id}.json"));
    write_json_atomic(&path, report).await?;
    info!(
        %run_id,
        total = report.metadata.total_tasks,
        completed = report.metadata.completed_tasks,
        failed = report.metadata.failed_tasks,
        path = %path.display(),
        "summary report written"
    );
    Ok(path)
}
