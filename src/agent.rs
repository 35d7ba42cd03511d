//! Agent registration, selection, and running statistics.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};
use crate::task::{TaskId, TaskPayload};

/// Execution handler supplied at agent registration.
///
/// The core only ever holds this interface; market-data fetchers, scoring
/// heuristics, order placement, and model callers all live behind it.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, kind: &str, payload: &TaskPayload) -> Result<serde_json::Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Busy,
    Error,
    Maintenance,
}

/// Running execution statistics for one agent.
///
/// Average execution time is an exponentially weighted moving average so
/// recent runs dominate.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AgentStats {
    pub completed: u64,
    pub failed: u64,
    pub avg_execution_ms: f64,
}

impl AgentStats {
    const EMA_ALPHA: f64 = 0.3;

    pub(crate) fn record_success(&mut self, elapsed: Duration) {
        self.completed += 1;
        let ms = elapsed.as_millis() as f64;
        if self.avg_execution_ms == 0.0 {
            self.avg_execution_ms = ms;
        } else {
            self.avg_execution_ms =
                Self::EMA_ALPHA * ms + (1.0 - Self::EMA_ALPHA) * self.avg_execution_ms;
        }
    }

    pub(crate) fn record_failure(&mut self) {
        self.failed += 1;
    }
}

/// One registered agent.
pub(crate) struct AgentRecord {
    pub name: String,
    pub agent_type: String,
    pub capabilities: Vec<String>,
    pub status: AgentStatus,
    pub handler: Arc<dyn TaskHandler>,
    pub last_heartbeat: DateTime<Utc>,
    pub current_task: Option<TaskId>,
    pub stats: AgentStats,
    /// Registration order; ties in selection resolve to the earliest.
    pub registered_seq: u64,
}

impl AgentRecord {
    pub fn status_view(&self) -> AgentStatusView {
        AgentStatusView {
            name: self.name.clone(),
            agent_type: self.agent_type.clone(),
            status: self.status,
            capabilities: self.capabilities.clone(),
            last_heartbeat: self.last_heartbeat,
            current_task: self.current_task.clone(),
            completed_count: self.stats.completed,
            failed_count: self.stats.failed,
            avg_execution_ms: self.stats.avg_execution_ms,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == AgentStatus::Idle && self.current_task.is_none()
    }
}

/// Point-in-time snapshot returned by agent status queries.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatusView {
    pub name: String,
    pub agent_type: String,
    pub status: AgentStatus,
    pub capabilities: Vec<String>,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<TaskId>,
    pub completed_count: u64,
    pub failed_count: u64,
    pub avg_execution_ms: f64,
}

/// Table of registered agents keyed by unique name.
///
/// Not internally synchronized; the dispatcher core owns it behind its
/// state lock.
#[derive(Default)]
pub(crate) struct AgentRegistry {
    agents: HashMap<String, AgentRecord>,
    next_seq: u64,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        agent_type: impl Into<String>,
        capabilities: Vec<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<()> {
        let name = name.into();
        if self.agents.contains_key(&name) {
            return Err(DispatchError::DuplicateAgent(name));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.agents.insert(
            name.clone(),
            AgentRecord {
                name,
                agent_type: agent_type.into(),
                capabilities,
                status: AgentStatus::Idle,
                handler,
                last_heartbeat: Utc::now(),
                current_task: None,
                stats: AgentStats::default(),
                registered_seq: seq,
            },
        );
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<AgentRecord> {
        self.agents.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&AgentRecord> {
        self.agents.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut AgentRecord> {
        self.agents.get_mut(name)
    }

    /// First idle agent of the given type, in registration order.
    pub fn find_available(&self, agent_type: &str) -> Option<String> {
        self.agents
            .values()
            .filter(|a| a.agent_type == agent_type && a.is_available())
            .min_by_key(|a| a.registered_seq)
            .map(|a| a.name.clone())
    }

    /// Atomically pick an idle agent of the given type and assign it the
    /// task. Returns the agent name and its handler.
    pub fn claim_available(
        &mut self,
        agent_type: &str,
        task_id: &TaskId,
    ) -> Option<(String, Arc<dyn TaskHandler>)> {
        let name = self.find_available(agent_type)?;
        let agent = self.agents.get_mut(&name)?;
        agent.status = AgentStatus::Busy;
        agent.current_task = Some(task_id.clone());
        Some((name, Arc::clone(&agent.handler)))
    }

    /// Record a liveness signal. An agent parked in `Error` comes back to
    /// `Idle` on its next heartbeat.
    pub fn record_heartbeat(&mut self, name: &str) -> Result<()> {
        let agent = self
            .agents
            .get_mut(name)
            .ok_or_else(|| DispatchError::AgentNotFound(name.to_string()))?;
        agent.last_heartbeat = Utc::now();
        if agent.status == AgentStatus::Error && agent.current_task.is_none() {
            agent.status = AgentStatus::Idle;
        }
        Ok(())
    }

    /// Clear the agent's assignment and record the run outcome in its stats.
    pub fn release(&mut self, name: &str, task_id: &TaskId, outcome: ReleaseOutcome) {
        if let Some(agent) = self.agents.get_mut(name) {
            if agent.current_task.as_ref() == Some(task_id) {
                agent.current_task = None;
                if agent.status == AgentStatus::Busy {
                    agent.status = AgentStatus::Idle;
                }
            }
            match outcome {
                ReleaseOutcome::Success(elapsed) => agent.stats.record_success(elapsed),
                ReleaseOutcome::Failure => agent.stats.record_failure(),
                ReleaseOutcome::Cancelled => {}
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentRecord> {
        self.agents.values()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn busy_count(&self) -> usize {
        self.agents
            .values()
            .filter(|a| a.status == AgentStatus::Busy)
            .count()
    }
}

/// How an agent slot was released.
pub(crate) enum ReleaseOutcome {
    Success(Duration),
    Failure,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl TaskHandler for NoopHandler {
        async fn execute(&self, _kind: &str, _payload: &TaskPayload) -> Result<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }
    }

    fn handler() -> Arc<dyn TaskHandler> {
        Arc::new(NoopHandler)
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = AgentRegistry::new();
        registry
            .register("collector-1", "collector", vec![], handler())
            .unwrap();

        let err = registry
            .register("collector-1", "collector", vec![], handler())
            .unwrap_err();
        assert!(matches!(err, DispatchError::DuplicateAgent(name) if name == "collector-1"));
    }

    #[test]
    fn test_find_available_registration_order() {
        let mut registry = AgentRegistry::new();
        registry
            .register("trader-b", "trader", vec![], handler())
            .unwrap();
        registry
            .register("trader-a", "trader", vec![], handler())
            .unwrap();

        // Registration order, not name order.
        assert_eq!(registry.find_available("trader").as_deref(), Some("trader-b"));
        assert_eq!(registry.find_available("analyst"), None);
    }

    #[test]
    fn test_busy_agent_not_selected() {
        let mut registry = AgentRegistry::new();
        registry
            .register("trader-1", "trader", vec![], handler())
            .unwrap();

        let task = TaskId::generate();
        let agent = registry.get_mut("trader-1").unwrap();
        agent.status = AgentStatus::Busy;
        agent.current_task = Some(task.clone());
        assert_eq!(registry.find_available("trader"), None);

        registry.release("trader-1", &task, ReleaseOutcome::Success(Duration::from_millis(10)));
        assert_eq!(registry.find_available("trader").as_deref(), Some("trader-1"));
        assert_eq!(registry.get("trader-1").unwrap().stats.completed, 1);
    }

    #[test]
    fn test_heartbeat_recovers_errored_agent() {
        let mut registry = AgentRegistry::new();
        registry
            .register("trader-1", "trader", vec![], handler())
            .unwrap();
        registry.get_mut("trader-1").unwrap().status = AgentStatus::Error;

        registry.record_heartbeat("trader-1").unwrap();
        assert_eq!(registry.get("trader-1").unwrap().status, AgentStatus::Idle);

        let err = registry.record_heartbeat("ghost").unwrap_err();
        assert!(matches!(err, DispatchError::AgentNotFound(_)));
    }

    #[test]
    fn test_maintenance_not_selected() {
        let mut registry = AgentRegistry::new();
        registry
            .register("trader-1", "trader", vec![], handler())
            .unwrap();
        registry.get_mut("trader-1").unwrap().status = AgentStatus::Maintenance;
        assert_eq!(registry.find_available("trader"), None);
    }

    #[test]
    fn test_stats_ema() {
        let mut stats = AgentStats::default();
        stats.record_success(Duration::from_millis(100));
        assert_eq!(stats.avg_execution_ms, 100.0);

        stats.record_success(Duration::from_millis(200));
        // 0.3 * 200 + 0.7 * 100
        assert!((stats.avg_execution_ms - 130.0).abs() < f64::EPSILON);
        assert_eq!(stats.completed, 2);
    }
}
