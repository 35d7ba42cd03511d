pub mod agent;
pub mod config;
pub mod conflict;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod metrics;
pub mod queue;
pub mod task;

pub use agent::{AgentStatus, AgentStatusView, TaskHandler};
pub use config::{ConflictConfig, DispatcherConfig};
pub use conflict::ConflictPolicy;
pub use dispatcher::{Dispatcher, DispatcherBuilder, SystemStatus};
pub use error::{DispatchError, Result};
pub use events::{DispatchEvent, EventSink, NullEventSink};
pub use metrics::{DispatchMetrics, MetricsSink, MetricsSnapshot, NullMetricsSink, SystemGauges};
pub use task::{TaskId, TaskPayload, TaskPriority, TaskSpec, TaskState, TaskStatusView};
