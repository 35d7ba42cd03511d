//! Task execution under a deadline, and the finalization paths.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::state::DispatcherCore;
use crate::agent::{ReleaseOutcome, TaskHandler};
use crate::events::DispatchEvent;
use crate::task::{TaskId, TaskPayload};

/// Run one task on one agent. The future is spawned by the scheduler and
/// aborted on cancellation; the timeout wrapper drops the handler future at
/// the deadline, so the slot release never depends on the handler
/// returning.
pub(super) async fn run_task(
    core: Arc<DispatcherCore>,
    task_id: TaskId,
    agent: String,
    kind: String,
    payload: TaskPayload,
    deadline: Duration,
    handler: Arc<dyn TaskHandler>,
) {
    let started = Instant::now();
    let outcome = tokio::time::timeout(deadline, handler.execute(&kind, &payload)).await;
    let elapsed = started.elapsed();

    match outcome {
        Ok(Ok(result)) => core.finish_success(&task_id, &agent, elapsed, result),
        Ok(Err(err)) => core.finish_failure(&task_id, &agent, err.to_string()),
        Err(_) => core.finish_timeout(&task_id, &agent, deadline),
    }
}

impl DispatcherCore {
    pub(crate) fn finish_success(
        &self,
        id: &TaskId,
        agent: &str,
        elapsed: Duration,
        result: serde_json::Value,
    ) {
        let mut state = self.state.lock();
        // Gone from the active map means cancellation won the race.
        let Some(active) = state.active.remove(id) else {
            return;
        };
        let mut record = active.record;
        state
            .agents
            .release(agent, id, ReleaseOutcome::Success(elapsed));
        record.mark_completed(result);
        state.completed.insert(id.clone(), record);
        drop(state);

        self.metrics.record_completed(elapsed);
        info!(task_id = %id, agent = %agent, elapsed_ms = elapsed.as_millis() as u64, "Task completed");
        self.events.emit(DispatchEvent::TaskCompleted {
            task: id.clone(),
            agent: agent.to_string(),
        });
        self.wake.notify_one();
    }

    pub(crate) fn finish_failure(&self, id: &TaskId, agent: &str, error: String) {
        let mut state = self.state.lock();
        let Some(active) = state.active.remove(id) else {
            return;
        };
        let mut record = active.record;
        state.agents.release(agent, id, ReleaseOutcome::Failure);

        let will_retry = record.can_retry();
        if will_retry {
            record.reset_for_retry();
            warn!(
                task_id = %id,
                agent = %agent,
                attempt = record.attempt,
                max_retries = record.max_retries,
                error = %error,
                "Handler failed, requeueing"
            );
            state
                .queue
                .push(id.clone(), record.priority, record.scheduled_at);
            state.pending.insert(id.clone(), record);
        } else {
            warn!(task_id = %id, agent = %agent, error = %error, "Handler failed, retries exhausted");
            record.mark_failed(error.clone());
            state.completed.insert(id.clone(), record);
        }
        drop(state);

        if will_retry {
            self.metrics.record_retried();
        } else {
            self.metrics.record_failed();
        }
        self.events.emit(DispatchEvent::TaskFailed {
            task: id.clone(),
            agent: agent.to_string(),
            error,
            will_retry,
        });
        self.wake.notify_one();
    }

    /// Timeouts are terminal: the handler may still be running somewhere,
    /// so re-running it risks duplicate side effects.
    pub(crate) fn finish_timeout(&self, id: &TaskId, agent: &str, deadline: Duration) {
        let mut state = self.state.lock();
        let Some(active) = state.active.remove(id) else {
            return;
        };
        let mut record = active.record;
        state.agents.release(agent, id, ReleaseOutcome::Failure);
        record.mark_timed_out(format!(
            "execution exceeded {}ms deadline",
            deadline.as_millis()
        ));
        state.completed.insert(id.clone(), record);
        drop(state);

        self.metrics.record_timed_out();
        warn!(task_id = %id, agent = %agent, deadline_ms = deadline.as_millis() as u64, "Task timed out");
        self.events.emit(DispatchEvent::TaskTimedOut {
            task: id.clone(),
            agent: agent.to_string(),
        });
        self.wake.notify_one();
    }
}
