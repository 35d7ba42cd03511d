//! Heartbeat monitoring, completed-map retention, and gauge emission.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::state::DispatcherCore;
use crate::agent::AgentStatus;
use crate::events::DispatchEvent;
use crate::metrics::SystemGauges;
use crate::task::TaskId;

/// Heartbeat loop: evict agents that have gone silent.
pub(super) async fn run_heartbeat(core: Arc<DispatcherCore>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(core.config.heartbeat_interval());
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => core.check_heartbeats(),
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Heartbeat monitor stopped");
}

/// Maintenance loop: sweep expired completed tasks and push gauges.
pub(super) async fn run_maintenance(
    core: Arc<DispatcherCore>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(core.config.maintenance_interval());
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                core.sweep_completed();
                core.emit_gauges();
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Maintenance loop stopped");
}

impl DispatcherCore {
    /// Mark agents silent past the heartbeat timeout as unhealthy and
    /// cancel whatever they were running. A later heartbeat brings the
    /// agent back to `Idle`.
    pub(crate) fn check_heartbeats(&self) {
        let timeout = self.config.heartbeat_timeout();
        let mut evicted: Vec<(String, Option<TaskId>)> = Vec::new();

        {
            let mut state = self.state.lock();
            let now = Utc::now();
            let stale: Vec<String> = state
                .agents
                .iter()
                .filter(|a| a.status != AgentStatus::Error)
                .filter(|a| {
                    now.signed_duration_since(a.last_heartbeat)
                        .to_std()
                        .map(|d| d > timeout)
                        .unwrap_or(false)
                })
                .map(|a| a.name.clone())
                .collect();

            let state = &mut *state;
            for name in stale {
                let in_flight = match state.agents.get_mut(&name) {
                    Some(agent) => {
                        agent.status = AgentStatus::Error;
                        agent.current_task.take()
                    }
                    None => continue,
                };
                if let Some(task_id) = &in_flight {
                    if let Some(active) = state.active.remove(task_id) {
                        active.abort.abort();
                        let mut record = active.record;
                        record.mark_cancelled();
                        state.completed.insert(task_id.clone(), record);
                    }
                }
                evicted.push((name, in_flight));
            }
        }

        let any = !evicted.is_empty();
        for (name, task) in evicted {
            warn!(agent = %name, "Agent heartbeat timed out, marking unhealthy");
            if let Some(task_id) = &task {
                self.metrics.record_cancelled();
                self.events.emit(DispatchEvent::TaskCancelled {
                    task: task_id.clone(),
                });
            }
            self.events.emit(DispatchEvent::AgentErrored { name, task });
        }
        if any {
            self.wake.notify_one();
        }
    }

    /// Drop completed tasks older than the retention window.
    pub(crate) fn sweep_completed(&self) {
        let cutoff =
            Utc::now() - chrono::Duration::seconds(self.config.completed_retention_secs as i64);
        let mut state = self.state.lock();
        let before = state.completed.len();
        state
            .completed
            .retain(|_, record| record.finished_at.map_or(true, |t| t > cutoff));
        let removed = before - state.completed.len();
        if removed > 0 {
            debug!(removed, "Swept expired completed tasks");
        }
    }

    pub(crate) fn emit_gauges(&self) {
        let gauges = {
            let state = self.state.lock();
            SystemGauges {
                total_agents: state.agents.len(),
                active_agents: state.agents.busy_count(),
                pending_tasks: state.pending.len(),
                active_tasks: state.active.len(),
                completed_tasks: state.completed.len(),
            }
        };
        self.metrics_sink.record_gauges(gauges);
    }
}
