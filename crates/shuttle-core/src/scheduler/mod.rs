//! Scheduler: task registry, dispatch loop and worker pool.
//!
//! ```text
//! add_task ──► registry ──► dispatcher ──► bounded queue ──► workers
//!                 ▲                                            │
//!                 └──────────── outcome, retry, checkpoint ◄───┘
//! ```
//!
//! The registry sits behind one mutex. Neither the dispatcher nor the workers
//! hold it across an `.await`; task bodies always run with it released.

mod builder;
mod config;
mod dispatch;
mod worker;

pub use builder::SchedulerBuilder;
pub use config::{RetryConfig, SchedulerConfig};

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::domain::{RunId, Task, TaskId, TaskSnapshot, TaskStatus};
use crate::error::{SchedulerError, StorageError};
use crate::observability::StatusCounts;
use crate::ports::Clock;
use crate::queue::{RetryPolicy, TaskRegistry};
use crate::report::{ReportGenerator, write_report};

use dispatch::dispatch_loop;
use worker::WorkerGroup;

/// State shared by the scheduler handle, the dispatcher and every worker.
pub(crate) struct Shared {
    registry: Mutex<TaskRegistry>,
    store: Arc<dyn CheckpointStore>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    poll_interval: Duration,

    /// Wakes the dispatcher ahead of its poll interval.
    wake: Notify,

    /// Fired after every state change that can affect `wait_for_idle`.
    progress: Notify,

    /// Registry stamp of the newest checkpoint written per task. Held across
    /// the store write so writes for one id land in stamp order.
    persisted: tokio::sync::Mutex<HashMap<TaskId, u64>>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, TaskRegistry> {
        // Registry methods leave no half-applied state behind on panic.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_changed(&self) {
        self.wake.notify_one();
        self.progress.notify_waiters();
    }

    /// Best-effort checkpoint from a worker transition.
    async fn checkpoint(&self, snapshot: &TaskSnapshot, stamp: u64) {
        if let Err(e) = self.persist(snapshot, stamp).await {
            warn!(task_id = %snapshot.id, error = %e, "checkpoint write failed");
        }
    }

    /// Write `snapshot` unless a newer one for the same task is already on
    /// record. `stamp` must come from the registry critical section that took
    /// the snapshot.
    async fn persist(&self, snapshot: &TaskSnapshot, stamp: u64) -> Result<(), StorageError> {
        let mut persisted = self.persisted.lock().await;
        if persisted.get(&snapshot.id).is_some_and(|&newest| newest > stamp) {
            debug!(task_id = %snapshot.id, stamp, "skipping stale checkpoint");
            return Ok(());
        }
        self.store.save(snapshot).await?;
        persisted.insert(snapshot.id, stamp);
        Ok(())
    }

    async fn save_all(&self) -> Result<usize, StorageError> {
        let (snapshots, stamp) = {
            let mut registry = self.registry();
            let stamp = registry.next_checkpoint_stamp();
            (registry.snapshots(None), stamp)
        };
        for snapshot in &snapshots {
            self.persist(snapshot, stamp).await?;
        }
        Ok(snapshots.len())
    }

    /// Signal shutdown, join the dispatcher and workers, return undelivered
    /// work to the pool and flush checkpoints.
    async fn wind_down(&self, run: Running) -> Result<(), StorageError> {
        let _ = run.shutdown_tx.send(true);
        if let Err(e) = run.dispatcher.await {
            warn!(error = %e, "dispatcher exited abnormally");
        }
        run.workers.join().await;

        // Anything still sitting in the dropped queue goes back to the pool.
        self.registry().release_queued();
        self.state_changed();

        self.save_all().await?;
        Ok(())
    }
}

struct Running {
    run_id: RunId,
    shutdown_tx: watch::Sender<bool>,
    dispatcher: JoinHandle<()>,
    workers: WorkerGroup,
}

/// Runs registered tasks on a fixed pool of workers, honouring priorities,
/// dependencies and per-task retry budgets.
///
/// # Example
/// ```ignore
/// let scheduler = Scheduler::builder().max_workers(2).build()?;
/// let a = Task::new("fetch", || async { Ok(json!("data")) })?;
/// let b = Task::builder("parse", || async { Ok(json!(1)) })
///     .depends_on(a.id())
///     .build()?;
/// scheduler.add_task(a)?;
/// scheduler.add_task(b)?;
/// scheduler
///     .scope(scheduler.wait_for_idle(Duration::from_secs(10)))
///     .await??;
/// ```
pub struct Scheduler {
    shared: Arc<Shared>,
    config: SchedulerConfig,
    running: Arc<tokio::sync::Mutex<Option<Running>>>,
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// Scheduler with default settings and `max_workers` workers.
    pub fn new(max_workers: usize) -> Result<Self, crate::error::BuildError> {
        Self::builder().max_workers(max_workers).build()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn add_task(&self, task: Task) -> Result<TaskId, SchedulerError> {
        let id = task.id();
        let name = task.name().to_string();
        self.shared.registry().insert(task)?;
        debug!(task_id = %id, %name, "task added");
        self.shared.state_changed();
        Ok(id)
    }

    pub fn remove_task(&self, id: TaskId) -> Result<TaskSnapshot, SchedulerError> {
        let task = self.shared.registry().remove(id)?;
        debug!(task_id = %id, "task removed");
        self.shared.state_changed();
        Ok(task.to_snapshot())
    }

    pub fn get_task(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.shared.registry().get(id).map(Task::to_snapshot)
    }

    /// Snapshots in registration order, optionally filtered by status.
    pub fn get_tasks(&self, status: Option<TaskStatus>) -> Vec<TaskSnapshot> {
        self.shared.registry().snapshots(status)
    }

    pub fn counts(&self) -> StatusCounts {
        self.shared.registry().counts()
    }

    /// Pending tasks that can never run because a dependency failed or is
    /// not registered.
    pub fn blocked_tasks(&self) -> Vec<TaskId> {
        self.shared.registry().blocked()
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Restore checkpoints, then spawn the workers and the dispatcher.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        self.launch().await.map(|_| ())
    }

    async fn launch(&self) -> Result<RunId, SchedulerError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let checkpoints = self.shared.store.load_all().await?;
        let restored = self.shared.registry().restore(&checkpoints);
        if restored > 0 {
            info!(restored, "restored tasks from checkpoints");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (queue_tx, queue_rx) = mpsc::channel(self.config.queue_capacity);

        let workers = WorkerGroup::spawn(
            self.config.max_workers,
            Arc::clone(&self.shared),
            queue_rx,
            shutdown_rx.clone(),
        );
        let dispatcher = tokio::spawn(dispatch_loop(
            Arc::clone(&self.shared),
            queue_tx,
            shutdown_rx,
        ));

        let run_id = RunId::generate();
        *running = Some(Running {
            run_id,
            shutdown_tx,
            dispatcher,
            workers,
        });
        info!(
            %run_id,
            workers = self.config.max_workers,
            queue_capacity = self.config.queue_capacity,
            "scheduler started"
        );
        Ok(run_id)
    }

    /// Stop dispatching, let in-flight bodies finish, then flush checkpoints.
    ///
    /// A summary report is written only when `report-on-stop` is enabled;
    /// it is off by default so that embedding programs and tests do not
    /// write into `report-dir` unasked. [`Scheduler::generate_summary_report`]
    /// writes one explicitly.
    ///
    /// Calling `stop` on a scheduler that is not running is a no-op.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let mut running = self.running.lock().await;
        let Some(run) = running.take() else {
            return Ok(());
        };

        info!("scheduler stopping");
        self.shared.wind_down(run).await?;
        if self.config.report_on_stop {
            self.generate_summary_report().await?;
        }
        info!("scheduler stopped");
        Ok(())
    }

    /// Start, drive `fut` to completion, stop.
    ///
    /// If `fut` panics or the returned future is dropped early, the scheduler
    /// is wound down on a background task: workers are joined and checkpoints
    /// flushed. `is_running` and `start` wait for that to finish.
    pub async fn scope<F: Future>(&self, fut: F) -> Result<F::Output, SchedulerError> {
        let run_id = self.launch().await?;
        let guard = ShutdownGuard {
            shared: Arc::clone(&self.shared),
            running: Arc::clone(&self.running),
            run_id,
        };
        let out = fut.await;
        let stopped = self.stop().await;
        // Nothing left to wind down; the guard finds `running` empty.
        drop(guard);
        stopped?;
        Ok(out)
    }

    /// Resolve once no task can make further progress: every task is
    /// completed, failed, or blocked behind one that is.
    pub async fn wait_for_idle(&self, timeout: Duration) -> Result<(), SchedulerError> {
        // Too large to represent: no deadline.
        let deadline = tokio::time::Instant::now().checked_add(timeout);
        loop {
            let notified = self.shared.progress.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shared.registry().is_idle() {
                return Ok(());
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(SchedulerError::IdleTimeout(timeout));
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Write a checkpoint for every registered task.
    ///
    /// Safe to call while running: a snapshot older than one a worker has
    /// already written for the same task is skipped.
    pub async fn save_checkpoints(&self) -> Result<(), SchedulerError> {
        let count = self.shared.save_all().await?;
        debug!(count, "checkpoints saved");
        Ok(())
    }

    pub async fn clear_checkpoints(&self) -> Result<(), SchedulerError> {
        self.shared.store.clear(None).await?;
        debug!("checkpoints cleared");
        Ok(())
    }

    /// Write a summary report into the configured report directory.
    ///
    /// Returns the path of the run report, or `None` if no task is registered.
    pub async fn generate_summary_report(&self) -> Result<Option<PathBuf>, SchedulerError> {
        let snapshots = self.shared.registry().snapshots(None);
        if snapshots.is_empty() {
            return Ok(None);
        }
        let report = ReportGenerator::new(Arc::clone(&self.shared.clock)).build(&snapshots);
        let path = write_report(&self.config.report_dir, &report).await?;
        Ok(Some(path))
    }

    fn signal_shutdown(&self) {
        // Contended only while start/stop run; both leave a consistent state.
        if let Ok(running) = self.running.try_lock()
            && let Some(run) = running.as_ref()
        {
            let _ = run.shutdown_tx.send(true);
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

/// Winds the scheduler down if `scope` exits without reaching `stop`.
struct ShutdownGuard {
    shared: Arc<Shared>,
    running: Arc<tokio::sync::Mutex<Option<Running>>>,
    run_id: RunId,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // No runtime left to join on; the signal is all we can do.
            if let Ok(running) = self.running.try_lock()
                && let Some(run) = running.as_ref()
            {
                let _ = run.shutdown_tx.send(true);
            }
            return;
        };

        let shared = Arc::clone(&self.shared);
        let run_id = self.run_id;
        match Arc::clone(&self.running).try_lock_owned() {
            // Taking the lock here, not on the spawned task, means `start` and
            // `is_running` already see the teardown.
            Ok(running) => {
                if running.as_ref().is_some_and(|run| run.run_id == run_id) {
                    handle.spawn(finish_run(shared, running, run_id));
                }
            }
            Err(_) => {
                let running = Arc::clone(&self.running);
                handle.spawn(async move {
                    let running = running.lock_owned().await;
                    finish_run(shared, running, run_id).await;
                });
            }
        }
    }
}

/// Wind down run `run_id` if it is still the current one.
async fn finish_run(
    shared: Arc<Shared>,
    mut running: tokio::sync::OwnedMutexGuard<Option<Running>>,
    run_id: RunId,
) {
    if !running.as_ref().is_some_and(|run| run.run_id == run_id) {
        return;
    }
    let Some(run) = running.take() else {
        return;
    };
    warn!(%run_id, "scope exited early, stopping scheduler");
    if let Err(e) = shared.wind_down(run).await {
        warn!(%run_id, error = %e, "checkpoint flush after early scope exit failed");
    }
    info!(%run_id, "scheduler stopped");
}
