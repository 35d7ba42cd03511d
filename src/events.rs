//! Lifecycle notifications to the external event sink.
//!
//! The core emits; it never implements the bus. Consumers bridge these into
//! whatever transport the surrounding system uses.

use serde::Serialize;

use crate::task::TaskId;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    AgentRegistered {
        name: String,
        agent_type: String,
    },
    AgentUnregistered {
        name: String,
    },
    /// Heartbeat silence marked the agent unhealthy.
    AgentErrored {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        task: Option<TaskId>,
    },
    TaskSubmitted {
        task: TaskId,
        kind: String,
    },
    TaskCompleted {
        task: TaskId,
        agent: String,
    },
    TaskFailed {
        task: TaskId,
        agent: String,
        error: String,
        will_retry: bool,
    },
    TaskTimedOut {
        task: TaskId,
        agent: String,
    },
    TaskCancelled {
        task: TaskId,
    },
}

impl DispatchEvent {
    /// Dotted type tag, matching the notification names consumers key on.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AgentRegistered { .. } => "agent.registered",
            Self::AgentUnregistered { .. } => "agent.unregistered",
            Self::AgentErrored { .. } => "agent.error",
            Self::TaskSubmitted { .. } => "task.submitted",
            Self::TaskCompleted { .. } => "task.completed",
            Self::TaskFailed { .. } => "task.failed",
            Self::TaskTimedOut { .. } => "task.timeout",
            Self::TaskCancelled { .. } => "task.cancelled",
        }
    }
}

/// External notification sink. Implementations must be cheap and
/// non-blocking; emission happens on the dispatcher's hot paths.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DispatchEvent);
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: DispatchEvent) {}
}
