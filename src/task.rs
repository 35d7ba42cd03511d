//! Task model: identity, priority, lifecycle state, and the runtime record.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque key/value data handed through to the agent handler.
///
/// The core never inspects it except for conflict-detection key fields.
pub type TaskPayload = serde_json::Map<String, serde_json::Value>;

/// Unique task identifier, assigned at submission and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Task lifecycle state.
///
/// Transitions: `Pending -> Active -> {Completed | Failed | TimedOut | Cancelled}`,
/// plus `Failed -> Pending` while retries remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Pending,
    Active,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::TimedOut | Self::Cancelled
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Submission-time description of one unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub kind: String,
    pub agent_type: String,
    #[serde(default)]
    pub payload: TaskPayload,
    #[serde(default)]
    pub priority: TaskPriority,
    /// Not eligible to run before this time; defaults to submission time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Maximum execution duration; defaults from config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl TaskSpec {
    pub fn new(kind: impl Into<String>, agent_type: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            agent_type: agent_type.into(),
            payload: TaskPayload::new(),
            priority: TaskPriority::default(),
            scheduled_at: None,
            timeout: None,
            max_retries: None,
        }
    }

    pub fn with_payload(mut self, payload: TaskPayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_payload_field(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Runtime record of a submitted task.
///
/// Lives in exactly one of the dispatcher's pending queue, active map, or
/// completed map; `result` and `error` are mutually exclusive and written
/// once per terminal transition.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: TaskId,
    pub kind: String,
    pub agent_type: String,
    pub payload: TaskPayload,
    pub priority: TaskPriority,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub timeout: Duration,
    pub attempt: u32,
    pub max_retries: u32,
    pub state: TaskState,
    pub assigned_to: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub(crate) fn from_spec(
        spec: TaskSpec,
        default_timeout: Duration,
        default_max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::generate(),
            kind: spec.kind,
            agent_type: spec.agent_type,
            payload: spec.payload,
            priority: spec.priority,
            created_at: now,
            scheduled_at: spec.scheduled_at.unwrap_or(now),
            timeout: spec.timeout.unwrap_or(default_timeout),
            attempt: 0,
            max_retries: spec.max_retries.unwrap_or(default_max_retries),
            state: TaskState::Pending,
            assigned_to: None,
            result: None,
            error: None,
            finished_at: None,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_retries
    }

    pub(crate) fn mark_active(&mut self, agent: impl Into<String>) {
        self.state = TaskState::Active;
        self.assigned_to = Some(agent.into());
    }

    pub(crate) fn mark_completed(&mut self, result: serde_json::Value) {
        debug_assert!(self.result.is_none() && self.error.is_none());
        self.state = TaskState::Completed;
        self.result = Some(result);
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn mark_failed(&mut self, error: impl Into<String>) {
        debug_assert!(self.result.is_none());
        self.state = TaskState::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn mark_timed_out(&mut self, error: impl Into<String>) {
        debug_assert!(self.result.is_none());
        self.state = TaskState::TimedOut;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.state = TaskState::Cancelled;
        self.finished_at = Some(Utc::now());
    }

    /// Reset a failed attempt back to pending for re-dispatch.
    pub(crate) fn reset_for_retry(&mut self) {
        self.state = TaskState::Pending;
        self.attempt += 1;
        self.assigned_to = None;
        self.error = None;
        self.finished_at = None;
    }

    pub(crate) fn status_view(&self) -> TaskStatusView {
        TaskStatusView {
            id: self.id.clone(),
            kind: self.kind.clone(),
            state: self.state,
            priority: self.priority,
            agent_type: self.agent_type.clone(),
            created_at: self.created_at,
            scheduled_at: self.scheduled_at,
            attempt: self.attempt,
            assigned_to: self.assigned_to.clone(),
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }
}

/// Point-in-time snapshot returned by status queries.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusView {
    pub id: TaskId,
    pub kind: String,
    pub state: TaskState,
    pub priority: TaskPriority,
    pub agent_type: String,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
