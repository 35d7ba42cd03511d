//! Shared fixtures for dispatcher integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use tradeflow::{
    DispatchError, DispatchEvent, EventSink, Result, TaskHandler, TaskId, TaskPayload,
};

/// Completes immediately, counting invocations.
pub struct InstantHandler {
    pub calls: AtomicU32,
}

impl InstantHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl TaskHandler for InstantHandler {
    async fn execute(&self, kind: &str, _payload: &TaskPayload) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "kind": kind }))
    }
}

/// Blocks until the test releases a permit on the gate.
pub struct GatedHandler {
    gate: Arc<Semaphore>,
}

impl GatedHandler {
    pub fn new() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (
            Arc::new(Self {
                gate: Arc::clone(&gate),
            }),
            gate,
        )
    }
}

#[async_trait]
impl TaskHandler for GatedHandler {
    async fn execute(&self, _kind: &str, _payload: &TaskPayload) -> Result<Value> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| DispatchError::HandlerFailed("gate closed".into()))?;
        permit.forget();
        Ok(json!("released"))
    }
}

/// Sleeps for a fixed duration, then succeeds.
pub struct SleepHandler {
    pub duration: Duration,
}

impl SleepHandler {
    pub fn new(duration: Duration) -> Arc<Self> {
        Arc::new(Self { duration })
    }
}

#[async_trait]
impl TaskHandler for SleepHandler {
    async fn execute(&self, _kind: &str, _payload: &TaskPayload) -> Result<Value> {
        tokio::time::sleep(self.duration).await;
        Ok(json!("slept"))
    }
}

/// Fails the first `failures` invocations, then succeeds.
pub struct FlakyHandler {
    pub calls: AtomicU32,
    failures: u32,
}

impl FlakyHandler {
    pub fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            failures,
        })
    }
}

#[async_trait]
impl TaskHandler for FlakyHandler {
    async fn execute(&self, _kind: &str, _payload: &TaskPayload) -> Result<Value> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(DispatchError::HandlerFailed(format!(
                "induced failure {}",
                call
            )))
        } else {
            Ok(json!("recovered"))
        }
    }
}

/// Captures emitted events for assertions.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DispatchEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.kind()).collect()
    }

    pub fn completed_tasks(&self) -> Vec<TaskId> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                DispatchEvent::TaskCompleted { task, .. } => Some(task.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn failed_retry_flags(&self) -> Vec<bool> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                DispatchEvent::TaskFailed { will_retry, .. } => Some(*will_retry),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: DispatchEvent) {
        self.events.lock().push(event);
    }
}

/// Polls until the condition holds; works under both the paused and the
/// real clock.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
