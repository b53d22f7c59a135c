//! Dispatch loop: turns ready tasks into queued work.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tracing::debug;

use super::Shared;
use crate::domain::TaskId;

pub(super) async fn dispatch_loop(
    shared: Arc<Shared>,
    queue: mpsc::Sender<TaskId>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!("dispatcher started");
    'scan: loop {
        // A dropped sender counts as shutdown too.
        if *shutdown_rx.borrow() || shutdown_rx.has_changed().is_err() {
            break;
        }

        let (ready, next_retry) = {
            let mut registry = shared.registry();
            let promoted = registry.promote_due_retries(Instant::now());
            if promoted > 0 {
                debug!(promoted, "retries due");
            }
            (registry.take_ready(), registry.next_retry_due())
        };

        for (i, id) in ready.iter().enumerate() {
            // A full queue parks the dispatcher here, never the workers.
            let sent = tokio::select! {
                biased;
                _ = shutdown_rx.changed() => false,
                res = queue.send(*id) => res.is_ok(),
            };
            if !sent {
                let mut registry = shared.registry();
                for id in &ready[i..] {
                    registry.unqueue(*id);
                }
                break 'scan;
            }
            debug!(task_id = %id, "task queued");
        }

        let mut nap = shared.poll_interval;
        if let Some(due) = next_retry {
            nap = nap.min(due.saturating_duration_since(Instant::now()));
        }

        tokio::select! {
            _ = shutdown_rx.changed() => {}
            _ = shared.wake.notified() => {}
            _ = tokio::time::sleep(nap) => {}
        }
    }
    debug!("dispatcher stopped");
}
