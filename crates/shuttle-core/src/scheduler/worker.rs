use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::Shared;
use crate::domain::{TaskBody, TaskId, TaskOutput, TaskStatus};
use crate::error::TaskFailure;

/// Worker group handle.
/// - workers exit once the shutdown signal flips or the work queue closes
/// - `join()` waits for every worker; bodies already running finish first
pub(super) struct WorkerGroup {
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers sharing one work queue.
    pub(super) fn spawn(
        n: usize,
        shared: Arc<Shared>,
        queue: mpsc::Receiver<TaskId>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let queue = Arc::new(Mutex::new(queue));

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let shared = Arc::clone(&shared);
            let queue = Arc::clone(&queue);
            let rx = shutdown_rx.clone();

            joins.push(tokio::spawn(async move {
                worker_loop(worker_id, shared, queue, rx).await;
            }));
        }

        Self { joins }
    }

    pub(super) async fn join(self) {
        for join in self.joins {
            if let Err(e) = join.await {
                warn!(error = %e, "worker exited abnormally");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    shared: Arc<Shared>,
    queue: Arc<Mutex<mpsc::Receiver<TaskId>>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let next = tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                // sender gone: the scheduler itself was dropped
                if changed.is_err() {
                    break;
                }
                continue;
            }
            next = recv(&queue) => next,
        };

        // Queue closed: the dispatcher is gone.
        let Some(id) = next else {
            break;
        };
        run_one(worker_id, &shared, id).await;
    }
    debug!(worker_id, "worker stopped");
}

async fn recv(queue: &Mutex<mpsc::Receiver<TaskId>>) -> Option<TaskId> {
    queue.lock().await.recv().await
}

/// Claim, execute and record one attempt of `id`.
async fn run_one(worker_id: usize, shared: &Shared, id: TaskId) {
    let Some(body) = shared.registry().claim(id, shared.clock.now()) else {
        return;
    };
    debug!(worker_id, task_id = %id, "task started");

    let outcome = execute(body).await;

    // Running tasks cannot be removed, so the entry is still there.
    let (snapshot, stamp) = {
        let mut registry = shared.registry();
        let stamp = registry.next_checkpoint_stamp();
        let Some(task) = registry.get_mut(id) else {
            warn!(task_id = %id, "running task vanished from registry");
            return;
        };
        let now = shared.clock.now();
        match outcome {
            Ok(value) => task.mark_completed(value, now),
            Err(failure) => {
                task.mark_failed(failure.into_message(), now);
                if let Some(delay) = task.schedule_retry(&shared.retry, Instant::now()) {
                    debug!(task_id = %id, ?delay, "retry scheduled");
                }
            }
        }
        (task.to_snapshot(), stamp)
    };

    match snapshot.status {
        TaskStatus::Completed => {
            info!(worker_id, task_id = %id, name = %snapshot.name, "task completed");
        }
        TaskStatus::Retrying => info!(
            worker_id,
            task_id = %id,
            name = %snapshot.name,
            retry = snapshot.retry_count,
            max_retries = snapshot.max_retries,
            error = snapshot.error.as_deref().unwrap_or_default(),
            "task failed, will retry"
        ),
        _ => warn!(
            worker_id,
            task_id = %id,
            name = %snapshot.name,
            attempts = snapshot.retry_count + 1,
            error = snapshot.error.as_deref().unwrap_or_default(),
            "task failed"
        ),
    }

    shared.checkpoint(&snapshot, stamp).await;
    shared.state_changed();
}

/// Run the body on its own tokio task so a panic surfaces as a `JoinError`
/// instead of taking the worker down.
async fn execute(body: Arc<dyn TaskBody>) -> TaskOutput {
    match tokio::spawn(async move { body.run().await }).await {
        Ok(output) => output,
        Err(e) if e.is_panic() => Err(TaskFailure::new(format!(
            "task panicked: {}",
            panic_message(e.into_panic())
        ))),
        Err(e) => Err(TaskFailure::new(format!("task aborted: {e}"))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn execute_passes_through_success_and_failure() {
        let ok: Arc<dyn TaskBody> = Arc::new(|| async { Ok::<_, TaskFailure>(json!(7)) });
        assert_eq!(execute(ok).await, Ok(json!(7)));

        let err: Arc<dyn TaskBody> = Arc::new(|| async { Err::<serde_json::Value, _>(TaskFailure::new("boom")) });
        assert_eq!(execute(err).await, Err(TaskFailure::new("boom")));
    }

    #[tokio::test]
    async fn execute_turns_panics_into_failures() {
        let body: Arc<dyn TaskBody> = Arc::new(|| async {
            if true {
                panic!("kaboom");
            }
            Ok::<_, TaskFailure>(json!(null))
        });
        let failure = execute(body).await.unwrap_err();
        assert_eq!(failure.message(), "task panicked: kaboom");
    }

    #[test]
    fn panic_message_handles_owned_strings() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload), "non-string panic payload");
    }
}
