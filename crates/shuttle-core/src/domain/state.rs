//! Task status state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
///
/// State transitions:
/// - Pending -> Running -> Completed
/// - Pending -> Running -> Failed (terminal once retries are exhausted)
/// - Failed -> Retrying -> Pending (while retry_count < max_retries)
///
/// Nothing skips `Running`: every `Completed` or `Failed` is the result of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Registered, waiting for dependencies or a free worker.
    Pending,

    /// Body currently executing on a worker.
    Running,

    /// Last attempt succeeded.
    Completed,

    /// Last attempt failed. Terminal unless a retry is scheduled.
    Failed,

    /// Waiting out the backoff delay before going back to `Pending`.
    Retrying,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Retrying,
    ];

    /// Is this status final for the scheduler (no dispatch will pick it up again)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Is the transition `self -> next` allowed by the state machine?
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Failed, Retrying)
                | (Retrying, Pending)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Retrying => "retrying",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(TaskStatus::Pending, TaskStatus::Running, true)]
    #[case(TaskStatus::Running, TaskStatus::Completed, true)]
    #[case(TaskStatus::Running, TaskStatus::Failed, true)]
    #[case(TaskStatus::Failed, TaskStatus::Retrying, true)]
    #[case(TaskStatus::Retrying, TaskStatus::Pending, true)]
    #[case(TaskStatus::Pending, TaskStatus::Completed, false)]
    #[case(TaskStatus::Pending, TaskStatus::Failed, false)]
    #[case(TaskStatus::Retrying, TaskStatus::Running, false)]
    #[case(TaskStatus::Completed, TaskStatus::Pending, false)]
    #[case(TaskStatus::Failed, TaskStatus::Pending, false)]
    fn transitions(#[case] from: TaskStatus, #[case] to: TaskStatus, #[case] allowed: bool) {
        assert_eq!(from.can_transition_to(to), allowed);
    }

    #[test]
    fn only_completed_and_failed_are_terminal() {
        let terminal: Vec<_> = TaskStatus::ALL
            .into_iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(terminal, vec![TaskStatus::Completed, TaskStatus::Failed]);
    }

    #[test]
    fn status_serializes_snake_case() {
        let s = serde_json::to_string(&TaskStatus::Retrying).unwrap();
        assert_eq!(s, "\"retrying\"");
        assert_eq!(TaskStatus::Completed.to_string(), "completed");
    }
}
