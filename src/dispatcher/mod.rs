//! The dispatcher: public facade over the scheduling core.
//!
//! Construction goes through [`DispatcherBuilder`]; `start()` spawns the
//! scheduler, heartbeat, and maintenance loops, and `shutdown()` stops them
//! and aborts in-flight work. All public methods are safe to call from any
//! task concurrently with the loops.

mod executor;
mod monitor;
mod scheduler;
mod state;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::agent::{AgentStatusView, TaskHandler};
use crate::config::DispatcherConfig;
use crate::error::Result;
use crate::events::{EventSink, NullEventSink};
use crate::metrics::{MetricsSink, MetricsSnapshot, NullMetricsSink};
use crate::task::{TaskId, TaskSpec, TaskStatusView};

use self::state::DispatcherCore;

pub use self::state::SystemStatus;

pub struct Dispatcher {
    core: Arc<DispatcherCore>,
    shutdown_tx: watch::Sender<bool>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Dispatcher with default sinks; use [`Dispatcher::builder`] to attach
    /// event and metrics sinks.
    pub fn new(config: DispatcherConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: DispatcherConfig) -> DispatcherBuilder {
        DispatcherBuilder {
            config,
            events: Arc::new(NullEventSink),
            metrics_sink: Arc::new(NullMetricsSink),
        }
    }

    /// Spawn the scheduler, heartbeat, and maintenance loops. Must be
    /// called from within a Tokio runtime. Idempotent.
    pub fn start(&self) {
        if self.core.running.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Dispatcher started");

        let mut loops = self.loops.lock();
        loops.push(tokio::spawn(scheduler::run(
            Arc::clone(&self.core),
            self.shutdown_tx.subscribe(),
        )));
        loops.push(tokio::spawn(monitor::run_heartbeat(
            Arc::clone(&self.core),
            self.shutdown_tx.subscribe(),
        )));
        loops.push(tokio::spawn(monitor::run_maintenance(
            Arc::clone(&self.core),
            self.shutdown_tx.subscribe(),
        )));
    }

    /// Stop accepting submissions, abort in-flight tasks, and join the
    /// loops. The dispatcher is done after this; it does not restart.
    pub async fn shutdown(&self) {
        if !self.core.running.swap(false, Ordering::AcqRel) {
            return;
        }
        info!("Dispatcher shutting down");
        let _ = self.shutdown_tx.send(true);
        self.core.abort_all_active();

        let handles: Vec<_> = self.loops.lock().drain(..).collect();
        join_all(handles).await;
    }

    pub fn register_agent(
        &self,
        name: impl Into<String>,
        agent_type: impl Into<String>,
        capabilities: Vec<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<()> {
        self.core
            .register_agent(name, agent_type, capabilities, handler)
    }

    pub fn unregister_agent(&self, name: &str) -> Result<()> {
        self.core.unregister_agent(name)
    }

    pub fn heartbeat(&self, name: &str) -> Result<()> {
        self.core.heartbeat(name)
    }

    pub fn set_maintenance(&self, name: &str, maintenance: bool) -> Result<()> {
        self.core.set_maintenance(name, maintenance)
    }

    /// Screen for conflicts and enqueue. Fails fast with
    /// [`crate::DispatchError::Conflict`] when a mutating task targets a
    /// resource already in flight; the task is never enqueued in that case.
    pub fn submit(&self, spec: TaskSpec) -> Result<TaskId> {
        self.core.submit(spec)
    }

    pub fn cancel(&self, id: &TaskId) -> bool {
        self.core.cancel(id)
    }

    pub fn task_status(&self, id: &TaskId) -> Option<TaskStatusView> {
        self.core.task_status(id)
    }

    pub fn agent_status(&self, name: &str) -> Option<AgentStatusView> {
        self.core.agent_status(name)
    }

    pub fn system_status(&self) -> SystemStatus {
        self.core.system_status()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.core.metrics.snapshot()
    }
}

pub struct DispatcherBuilder {
    config: DispatcherConfig,
    events: Arc<dyn EventSink>,
    metrics_sink: Arc<dyn MetricsSink>,
}

impl DispatcherBuilder {
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = sink;
        self
    }

    pub fn build(self) -> Result<Dispatcher> {
        self.config.validate()?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Dispatcher {
            core: Arc::new(DispatcherCore::new(
                self.config,
                self.events,
                self.metrics_sink,
            )),
            shutdown_tx,
            loops: Mutex::new(Vec::new()),
        })
    }
}
