//! Serializable task snapshots, shared by checkpoints and reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::{TaskId, TaskStatus};

/// Bumped whenever the snapshot layout changes incompatibly.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Externally observable state of one task at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub schema_version: u32,
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub priority: i32,
    pub dependencies: Vec<TaskId>,
    pub retry_count: u32,
    pub max_retries: u32,

    /// Present (possibly `null`) only after a successful attempt.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub result: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl TaskSnapshot {
    /// Can this snapshot be applied by the running binary?
    pub fn is_compatible(&self) -> bool {
        self.schema_version == SNAPSHOT_SCHEMA_VERSION
    }
}

// A field that is present is `Some`, even when it is JSON `null`.
fn present<'de, D>(deserializer: D) -> Result<Option<serde_json::Value>, D::Error>
where
    D: Deserializer<'de>,
{
    serde_json::Value::deserialize(deserializer).map(Some)
}
