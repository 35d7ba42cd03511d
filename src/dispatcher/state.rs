//! Shared dispatcher state: the single owner of the pending queue, active
//! map, completed map, and agent table.
//!
//! Every mutation happens under one lock so the per-record invariants hold:
//! a task lives in exactly one of the three containers, and an agent's
//! `current_task` and `Busy` status change together.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::agent::{AgentRegistry, AgentStatus, AgentStatusView, ReleaseOutcome, TaskHandler};
use crate::config::DispatcherConfig;
use crate::conflict::ConflictPolicy;
use crate::error::{DispatchError, Result};
use crate::events::{DispatchEvent, EventSink};
use crate::metrics::{DispatchMetrics, MetricsSink};
use crate::queue::PendingQueue;
use crate::task::{TaskId, TaskRecord, TaskSpec, TaskStatusView};

pub(crate) struct ActiveTask {
    pub record: TaskRecord,
    /// Aborting this drops the executor future, which is what guarantees
    /// the agent slot comes back regardless of handler cooperation.
    pub abort: AbortHandle,
}

#[derive(Default)]
pub(crate) struct CoreState {
    pub queue: PendingQueue,
    pub pending: HashMap<TaskId, TaskRecord>,
    pub active: HashMap<TaskId, ActiveTask>,
    pub completed: HashMap<TaskId, TaskRecord>,
    pub agents: AgentRegistry,
}

pub(crate) struct DispatcherCore {
    pub config: DispatcherConfig,
    pub policy: ConflictPolicy,
    pub state: Mutex<CoreState>,
    pub events: Arc<dyn EventSink>,
    pub metrics_sink: Arc<dyn MetricsSink>,
    pub metrics: DispatchMetrics,
    /// Edge trigger for the scheduler loop: pinged on submission, agent
    /// registration, and slot release.
    pub wake: Notify,
    pub running: AtomicBool,
}

impl DispatcherCore {
    pub fn new(
        config: DispatcherConfig,
        events: Arc<dyn EventSink>,
        metrics_sink: Arc<dyn MetricsSink>,
    ) -> Self {
        let policy = ConflictPolicy::from_config(&config.conflict);
        Self {
            config,
            policy,
            state: Mutex::new(CoreState::default()),
            events,
            metrics_sink,
            metrics: DispatchMetrics::new(),
            wake: Notify::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn submit(&self, spec: TaskSpec) -> Result<TaskId> {
        if !self.is_running() {
            return Err(DispatchError::Shutdown);
        }

        let record = TaskRecord::from_spec(
            spec,
            self.config.default_task_timeout(),
            self.config.default_max_retries,
        );
        let id = record.id.clone();
        let kind = record.kind.clone();

        {
            let mut state = self.state.lock();
            let in_flight = state
                .pending
                .values()
                .map(|r| (r.kind.as_str(), &r.payload))
                .chain(
                    state
                        .active
                        .values()
                        .map(|a| (a.record.kind.as_str(), &a.record.payload)),
                );
            if let Some(key) = self
                .policy
                .find_conflict(&record.kind, &record.payload, in_flight)
            {
                return Err(DispatchError::Conflict(key));
            }
            state
                .queue
                .push(id.clone(), record.priority, record.scheduled_at);
            state.pending.insert(id.clone(), record);
        }

        self.metrics.record_submitted();
        self.events.emit(DispatchEvent::TaskSubmitted {
            task: id.clone(),
            kind: kind.clone(),
        });
        debug!(task_id = %id, kind = %kind, "Task submitted");
        self.wake.notify_one();
        Ok(id)
    }

    /// Cancel a pending or active task. Terminal tasks report not-found.
    pub fn cancel(&self, id: &TaskId) -> bool {
        let mut state = self.state.lock();

        if let Some(mut record) = state.pending.remove(id) {
            state.queue.remove(id);
            record.mark_cancelled();
            state.completed.insert(id.clone(), record);
            drop(state);
            self.metrics.record_cancelled();
            self.events
                .emit(DispatchEvent::TaskCancelled { task: id.clone() });
            info!(task_id = %id, "Pending task cancelled");
            return true;
        }

        if let Some(active) = state.active.remove(id) {
            active.abort.abort();
            let mut record = active.record;
            if let Some(agent) = record.assigned_to.clone() {
                state.agents.release(&agent, id, ReleaseOutcome::Cancelled);
            }
            record.mark_cancelled();
            state.completed.insert(id.clone(), record);
            drop(state);
            self.metrics.record_cancelled();
            self.events
                .emit(DispatchEvent::TaskCancelled { task: id.clone() });
            info!(task_id = %id, "Active task cancelled");
            self.wake.notify_one();
            return true;
        }

        false
    }

    pub fn register_agent(
        &self,
        name: impl Into<String>,
        agent_type: impl Into<String>,
        capabilities: Vec<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<()> {
        let name = name.into();
        let agent_type = agent_type.into();
        self.state
            .lock()
            .agents
            .register(name.clone(), agent_type.clone(), capabilities, handler)?;

        info!(agent = %name, agent_type = %agent_type, "Agent registered");
        self.events.emit(DispatchEvent::AgentRegistered {
            name,
            agent_type,
        });
        self.wake.notify_one();
        Ok(())
    }

    /// Remove an agent; its in-flight task, if any, is cancelled first.
    pub fn unregister_agent(&self, name: &str) -> Result<()> {
        let cancelled = {
            let mut state = self.state.lock();
            let agent = state
                .agents
                .get(name)
                .ok_or_else(|| DispatchError::AgentNotFound(name.to_string()))?;
            let in_flight = agent.current_task.clone();

            let mut cancelled = None;
            if let Some(task_id) = in_flight {
                if let Some(active) = state.active.remove(&task_id) {
                    active.abort.abort();
                    let mut record = active.record;
                    record.mark_cancelled();
                    state.completed.insert(task_id.clone(), record);
                    cancelled = Some(task_id);
                }
            }
            state.agents.remove(name);
            cancelled
        };

        if let Some(task_id) = cancelled {
            self.metrics.record_cancelled();
            self.events
                .emit(DispatchEvent::TaskCancelled { task: task_id });
        }
        info!(agent = %name, "Agent unregistered");
        self.events.emit(DispatchEvent::AgentUnregistered {
            name: name.to_string(),
        });
        Ok(())
    }

    pub fn heartbeat(&self, name: &str) -> Result<()> {
        self.state.lock().agents.record_heartbeat(name)?;
        debug!(agent = %name, "Heartbeat");
        self.wake.notify_one();
        Ok(())
    }

    /// Park an agent out of selection, or bring it back.
    pub fn set_maintenance(&self, name: &str, maintenance: bool) -> Result<()> {
        let mut state = self.state.lock();
        let agent = state
            .agents
            .get_mut(name)
            .ok_or_else(|| DispatchError::AgentNotFound(name.to_string()))?;
        if maintenance {
            agent.status = AgentStatus::Maintenance;
        } else if agent.current_task.is_some() {
            agent.status = AgentStatus::Busy;
        } else {
            agent.status = AgentStatus::Idle;
        }
        drop(state);
        if !maintenance {
            self.wake.notify_one();
        }
        Ok(())
    }

    pub fn task_status(&self, id: &TaskId) -> Option<TaskStatusView> {
        let state = self.state.lock();
        state
            .pending
            .get(id)
            .map(|r| r.status_view())
            .or_else(|| state.active.get(id).map(|a| a.record.status_view()))
            .or_else(|| state.completed.get(id).map(|r| r.status_view()))
    }

    pub fn agent_status(&self, name: &str) -> Option<AgentStatusView> {
        self.state.lock().agents.get(name).map(|a| a.status_view())
    }

    pub fn system_status(&self) -> SystemStatus {
        let state = self.state.lock();
        SystemStatus {
            running: self.is_running(),
            total_agents: state.agents.len(),
            active_agents: state.agents.busy_count(),
            pending_count: state.pending.len(),
            active_count: state.active.len(),
            completed_count: state.completed.len(),
        }
    }

    /// Abort every in-flight task; used on shutdown.
    pub fn abort_all_active(&self) {
        let cancelled = {
            let mut state = self.state.lock();
            let ids: Vec<TaskId> = state.active.keys().cloned().collect();
            let mut cancelled = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(active) = state.active.remove(&id) {
                    active.abort.abort();
                    let mut record = active.record;
                    if let Some(agent) = record.assigned_to.clone() {
                        state.agents.release(&agent, &id, ReleaseOutcome::Cancelled);
                    }
                    record.mark_cancelled();
                    state.completed.insert(id.clone(), record);
                    cancelled.push(id);
                }
            }
            cancelled
        };

        for id in cancelled {
            self.metrics.record_cancelled();
            self.events.emit(DispatchEvent::TaskCancelled { task: id });
        }
    }
}

/// Aggregate view returned by `Dispatcher::system_status`.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct SystemStatus {
    pub running: bool,
    pub total_agents: usize,
    pub active_agents: usize,
    pub pending_count: usize,
    pub active_count: usize,
    pub completed_count: usize,
}
