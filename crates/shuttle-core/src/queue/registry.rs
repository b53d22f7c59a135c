//! Task registry: the single source of truth for task state.
//!
//! The scheduler wraps this in one mutex; every method here is one
//! read-modify-write critical section.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::DependencyGraph;
use crate::domain::{Task, TaskBody, TaskId, TaskSnapshot, TaskStatus};
use crate::error::SchedulerError;
use crate::observability::StatusCounts;

struct RegistryEntry {
    task: Task,

    /// Insertion order, the tie-breaker among equal priorities.
    seq: u64,

    /// Sitting in the work queue, waiting for a worker to claim it.
    queued: bool,
}

#[derive(Default)]
pub struct TaskRegistry {
    entries: HashMap<TaskId, RegistryEntry>,
    graph: DependencyGraph,
    next_seq: u64,
    checkpoint_stamp: u64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, task: Task) -> Result<(), SchedulerError> {
        let id = task.id();
        if self.entries.contains_key(&id) {
            return Err(SchedulerError::DuplicateTask(id));
        }

        for &dep in task.dependencies() {
            self.graph.add_dependency(id, dep);
        }
        if let Some(cycle) = self.graph.find_cycle_through(id) {
            self.graph.remove_task(id);
            return Err(SchedulerError::DependencyCycle(cycle));
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            id,
            RegistryEntry {
                task,
                seq,
                queued: false,
            },
        );
        Ok(())
    }

    pub fn remove(&mut self, id: TaskId) -> Result<Task, SchedulerError> {
        let entry = self.entries.get(&id).ok_or(SchedulerError::NotFound(id))?;
        let status = entry.task.status();
        if status == TaskStatus::Running {
            return Err(SchedulerError::InvalidState {
                id,
                status,
                action: "remove",
            });
        }

        self.graph.remove_task(id);
        let waiting = self.graph.get_waiting_tasks(id);
        if !waiting.is_empty() {
            warn!(task_id = %id, dependents = waiting.len(), "removed task still has dependents; they stay blocked");
        }
        let entry = self
            .entries
            .remove(&id)
            .ok_or(SchedulerError::NotFound(id))?;
        Ok(entry.task)
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.entries.get(&id).map(|e| &e.task)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.entries.get_mut(&id).map(|e| &mut e.task)
    }

    /// Stamp for snapshots taken in the current critical section. Stamps
    /// grow with the state they describe, so a checkpoint writer can drop a
    /// snapshot older than the one it already persisted.
    pub fn next_checkpoint_stamp(&mut self) -> u64 {
        self.checkpoint_stamp += 1;
        self.checkpoint_stamp
    }

    /// Snapshots in insertion order, optionally filtered by status.
    pub fn snapshots(&self, status: Option<TaskStatus>) -> Vec<TaskSnapshot> {
        let mut entries: Vec<&RegistryEntry> = self
            .entries
            .values()
            .filter(|e| status.is_none_or(|s| e.task.status() == s))
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries.iter().map(|e| e.task.to_snapshot()).collect()
    }

    pub fn counts(&self) -> StatusCounts {
        self.entries.values().map(|e| e.task.status()).collect()
    }

    /// Pending and every dependency completed.
    fn is_ready(&self, task: &Task) -> bool {
        task.status() == TaskStatus::Pending
            && task.dependencies().iter().all(|dep| {
                self.get(*dep)
                    .is_some_and(|t| t.status() == TaskStatus::Completed)
            })
    }

    /// Move retrying tasks whose backoff has elapsed back to pending.
    pub fn promote_due_retries(&mut self, now: Instant) -> usize {
        let mut promoted = 0;
        for entry in self.entries.values_mut() {
            let task = &mut entry.task;
            if task.status() == TaskStatus::Retrying && task.next_run_at().is_none_or(|t| t <= now)
            {
                task.requeue();
                debug!(task_id = %task.id(), retry = task.retry_count(), "retry due, back to pending");
                promoted += 1;
            }
        }
        promoted
    }

    /// Earliest backoff deadline among retrying tasks.
    pub fn next_retry_due(&self) -> Option<Instant> {
        self.entries
            .values()
            .filter(|e| e.task.status() == TaskStatus::Retrying)
            .filter_map(|e| e.task.next_run_at())
            .min()
    }

    /// Ready tasks not yet handed to the work queue, best first.
    ///
    /// Order is (priority desc, insertion order). The returned tasks are
    /// marked queued so the next scan does not hand them out twice.
    pub fn take_ready(&mut self) -> Vec<TaskId> {
        let mut ready: Vec<(i32, u64, TaskId)> = self
            .entries
            .values()
            .filter(|e| !e.queued && self.is_ready(&e.task))
            .map(|e| (e.task.priority(), e.seq, e.task.id()))
            .collect();
        ready.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        ready
            .into_iter()
            .map(|(_, _, id)| {
                if let Some(entry) = self.entries.get_mut(&id) {
                    entry.queued = true;
                }
                id
            })
            .collect()
    }

    /// Forget that `id` was handed out (the queue send did not happen).
    pub fn unqueue(&mut self, id: TaskId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.queued = false;
        }
    }

    /// Forget every hand-out. Called once the work queue has been dropped.
    pub fn release_queued(&mut self) {
        for entry in self.entries.values_mut() {
            entry.queued = false;
        }
    }

    /// Worker side of the queue: pending -> running.
    ///
    /// Returns `None` if the task was removed or is no longer runnable since
    /// it was queued.
    pub fn claim(&mut self, id: TaskId, now: DateTime<Utc>) -> Option<Arc<dyn TaskBody>> {
        let entry = self.entries.get_mut(&id)?;
        entry.queued = false;
        if entry.task.status() != TaskStatus::Pending {
            warn!(task_id = %id, status = %entry.task.status(), "queued task no longer pending, skipping");
            return None;
        }
        entry.task.mark_running(now);
        Some(entry.task.body())
    }

    /// Pending tasks that can never become ready: some dependency failed,
    /// is not registered, or is itself stuck.
    pub fn blocked(&self) -> Vec<TaskId> {
        let mut memo = HashMap::new();
        let mut blocked: Vec<(u64, TaskId)> = self
            .entries
            .values()
            .filter(|e| e.task.status() == TaskStatus::Pending)
            .filter(|e| self.is_stuck(e.task.id(), &mut memo))
            .map(|e| (e.seq, e.task.id()))
            .collect();
        blocked.sort();
        blocked.into_iter().map(|(_, id)| id).collect()
    }

    fn is_stuck(&self, id: TaskId, memo: &mut HashMap<TaskId, bool>) -> bool {
        if let Some(&known) = memo.get(&id) {
            return known;
        }
        let stuck = match self.get(id) {
            None => true,
            Some(task) => match task.status() {
                TaskStatus::Failed => true,
                TaskStatus::Pending => task
                    .dependencies()
                    .iter()
                    .any(|dep| self.dep_is_dead(*dep, memo)),
                _ => false,
            },
        };
        memo.insert(id, stuck);
        stuck
    }

    fn dep_is_dead(&self, dep: TaskId, memo: &mut HashMap<TaskId, bool>) -> bool {
        match self.get(dep).map(Task::status) {
            None | Some(TaskStatus::Failed) => true,
            Some(TaskStatus::Pending) => self.is_stuck(dep, memo),
            Some(_) => false,
        }
    }

    /// No task can make further progress: everything is terminal or blocked.
    pub fn is_idle(&self) -> bool {
        let mut memo = HashMap::new();
        self.entries.values().all(|e| match e.task.status() {
            TaskStatus::Completed | TaskStatus::Failed => true,
            TaskStatus::Pending => self.is_stuck(e.task.id(), &mut memo),
            TaskStatus::Running | TaskStatus::Retrying => false,
        })
    }

    /// Apply checkpoints to matching registered tasks. Returns how many applied.
    pub fn restore(&mut self, snapshots: &HashMap<TaskId, TaskSnapshot>) -> usize {
        let mut restored = 0;
        for entry in self.entries.values_mut() {
            let Some(snapshot) = snapshots.get(&entry.task.id()) else {
                continue;
            };
            if !snapshot.is_compatible() {
                warn!(
                    task_id = %snapshot.id,
                    schema_version = snapshot.schema_version,
                    "skipping checkpoint with unknown schema version"
                );
                continue;
            }
            if entry.task.status() == TaskStatus::Running {
                continue;
            }
            entry.task.restore(snapshot);
            entry.queued = false;
            restored += 1;
        }
        restored
    }
}
