//! Dispatcher configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{DispatchError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Ceiling on concurrently executing tasks.
    pub max_concurrent_tasks: usize,
    /// Scheduler tick; dispatch is also edge-triggered on submission and
    /// completion, so this is a backstop.
    pub scheduler_tick_ms: u64,
    /// Heartbeat monitor tick.
    pub heartbeat_interval_ms: u64,
    /// Silence beyond this marks an agent unhealthy.
    pub heartbeat_timeout_ms: u64,
    /// Retention sweep and gauge emission tick.
    pub maintenance_interval_ms: u64,
    /// How long finished tasks stay queryable in the completed map.
    pub completed_retention_secs: u64,
    /// Execution deadline for tasks that do not set their own.
    pub default_task_timeout_secs: u64,
    /// Retry budget for tasks that do not set their own.
    pub default_max_retries: u32,
    pub conflict: ConflictConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 8,
            scheduler_tick_ms: 1_000,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 90_000,
            maintenance_interval_ms: 60_000,
            completed_retention_secs: 24 * 60 * 60,
            default_task_timeout_secs: 300,
            default_max_retries: 3,
            conflict: ConflictConfig::default(),
        }
    }
}

impl DispatcherConfig {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(DispatchError::Config(
                "max_concurrent_tasks must be at least 1".into(),
            ));
        }
        if self.scheduler_tick_ms == 0 {
            return Err(DispatchError::Config(
                "scheduler_tick_ms must be positive".into(),
            ));
        }
        if self.heartbeat_interval_ms == 0 || self.heartbeat_timeout_ms == 0 {
            return Err(DispatchError::Config(
                "heartbeat intervals must be positive".into(),
            ));
        }
        if self.heartbeat_timeout_ms < self.heartbeat_interval_ms {
            return Err(DispatchError::Config(
                "heartbeat_timeout_ms must not be shorter than the monitor interval".into(),
            ));
        }
        if self.maintenance_interval_ms == 0 {
            return Err(DispatchError::Config(
                "maintenance_interval_ms must be positive".into(),
            ));
        }
        if self.default_task_timeout_secs == 0 {
            return Err(DispatchError::Config(
                "default_task_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_millis(self.scheduler_tick_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    pub fn completed_retention(&self) -> Duration {
        Duration::from_secs(self.completed_retention_secs)
    }

    pub fn default_task_timeout(&self) -> Duration {
        Duration::from_secs(self.default_task_timeout_secs)
    }
}

/// Which task kinds mutate shared resources, and which payload fields form
/// the resource key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictConfig {
    pub mutating_kinds: Vec<String>,
    pub key_fields: Vec<String>,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            mutating_kinds: vec![
                "trade".to_string(),
                "order.place".to_string(),
                "order.cancel".to_string(),
                "rebalance".to_string(),
            ],
            key_fields: vec!["symbol".to_string(), "ownerId".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        DispatcherConfig::default().validate().unwrap();
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = DispatcherConfig {
            max_concurrent_tasks: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate().unwrap_err(),
            DispatchError::Config(_)
        ));
    }

    #[test]
    fn test_heartbeat_timeout_shorter_than_interval_rejected() {
        let config = DispatcherConfig {
            heartbeat_interval_ms: 60_000,
            heartbeat_timeout_ms: 30_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: DispatcherConfig = toml::from_str(
            r#"
            max_concurrent_tasks = 2

            [conflict]
            mutating_kinds = ["trade"]
            "#,
        )
        .unwrap();

        assert_eq!(config.max_concurrent_tasks, 2);
        assert_eq!(config.scheduler_tick_ms, 1_000);
        assert_eq!(config.conflict.mutating_kinds, vec!["trade"]);
        // key_fields falls back to its own default
        assert_eq!(config.conflict.key_fields, vec!["symbol", "ownerId"]);
    }
}
