//! Scheduling pass: match eligible pending tasks to idle agents.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info};

use super::state::{ActiveTask, DispatcherCore};
use crate::agent::ReleaseOutcome;

/// Scheduler loop. Runs a dispatch pass on every tick and whenever the
/// core's wake signal fires (submission, registration, slot release).
pub(super) async fn run(core: Arc<DispatcherCore>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(core.config.scheduler_tick());
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => dispatch_pass(&core),
            _ = core.wake.notified() => dispatch_pass(&core),
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Scheduler loop stopped");
}

/// One dispatch pass: scan the pending queue in (priority, scheduled time,
/// submission) order and hand off every task that has both a free
/// concurrency slot and an idle agent of its type. Entries that cannot run
/// yet go back untouched and keep their position.
fn dispatch_pass(core: &Arc<DispatcherCore>) {
    if !core.is_running() {
        return;
    }

    let mut state = core.state.lock();
    let now = Utc::now();
    let mut deferred = Vec::new();

    while state.active.len() < core.config.max_concurrent_tasks {
        let Some(entry) = state.queue.pop() else {
            break;
        };
        // Stale entries remain in the heap after cancellation.
        let Some(rec) = state.pending.get(&entry.task_id) else {
            continue;
        };
        if entry.scheduled_at > now {
            deferred.push(entry);
            continue;
        }
        let agent_type = rec.agent_type.clone();
        let Some((agent, handler)) = state.agents.claim_available(&agent_type, &entry.task_id)
        else {
            // No idle agent of this type; later entries may still run.
            deferred.push(entry);
            continue;
        };

        let Some(mut record) = state.pending.remove(&entry.task_id) else {
            state
                .agents
                .release(&agent, &entry.task_id, ReleaseOutcome::Cancelled);
            continue;
        };
        record.mark_active(&agent);
        info!(
            task_id = %record.id,
            agent = %agent,
            kind = %record.kind,
            attempt = record.attempt,
            "Dispatching task"
        );

        let handle = tokio::spawn(super::executor::run_task(
            Arc::clone(core),
            record.id.clone(),
            agent,
            record.kind.clone(),
            record.payload.clone(),
            record.timeout,
            handler,
        ));
        state.active.insert(
            record.id.clone(),
            ActiveTask {
                record,
                abort: handle.abort_handle(),
            },
        );
    }

    for entry in deferred {
        state.queue.requeue(entry);
    }
}
