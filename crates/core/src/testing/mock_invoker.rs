//! Mock tool invoker for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::orchestrator::{Invocation, InvocationOutcome, QualityMetrics, ToolInvoker};

/// A recorded invocation for test assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedInvocation {
    pub job_id: String,
    pub step_index: usize,
    pub capability_id: String,
    pub inputs: Vec<PathBuf>,
}

/// Mock implementation of the ToolInvoker trait.
///
/// Provides controllable behavior for testing:
/// - Record every invocation
/// - Simulate per-capability delays (cancellation aware)
/// - Script failures, either once or on every call
/// - Panic inside a capability to exercise job isolation
///
/// Successful invocations write a small text file to the requested output.
#[derive(Debug, Default)]
pub struct MockInvoker {
    invocations: Mutex<Vec<RecordedInvocation>>,
    delays: Mutex<HashMap<String, Duration>>,
    default_delay: Mutex<Duration>,
    scripted_failures: Mutex<HashMap<String, VecDeque<AppError>>>,
    permanent_failures: Mutex<HashMap<String, AppError>>,
    panics: Mutex<HashSet<String>>,
    metrics: Mutex<HashMap<String, QualityMetrics>>,
}

impl MockInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay applied to every capability without its own delay.
    pub fn with_default_delay(self, delay: Duration) -> Self {
        *self.default_delay.lock() = delay;
        self
    }

    pub fn set_delay(&self, capability_id: &str, delay: Duration) {
        self.delays.lock().insert(capability_id.to_string(), delay);
    }

    /// The next call of `capability_id` fails with `error`. Queues up.
    pub fn fail_once(&self, capability_id: &str, error: AppError) {
        self.scripted_failures
            .lock()
            .entry(capability_id.to_string())
            .or_default()
            .push_back(error);
    }

    /// Every call of `capability_id` fails with `error`.
    pub fn fail_always(&self, capability_id: &str, error: AppError) {
        self.permanent_failures
            .lock()
            .insert(capability_id.to_string(), error);
    }

    pub fn panic_on(&self, capability_id: &str) {
        self.panics.lock().insert(capability_id.to_string());
    }

    /// Metrics reported by successful calls of `capability_id`.
    pub fn report_metrics(&self, capability_id: &str, metrics: QualityMetrics) {
        self.metrics
            .lock()
            .insert(capability_id.to_string(), metrics);
    }

    pub fn recorded_invocations(&self) -> Vec<RecordedInvocation> {
        self.invocations.lock().clone()
    }

    /// Capability ids in call order.
    pub fn invoked_capabilities(&self) -> Vec<String> {
        self.invocations
            .lock()
            .iter()
            .map(|i| i.capability_id.clone())
            .collect()
    }

    pub fn invocation_count(&self, capability_id: &str) -> usize {
        self.invocations
            .lock()
            .iter()
            .filter(|i| i.capability_id == capability_id)
            .count()
    }

    pub fn clear_recorded(&self) {
        self.invocations.lock().clear();
    }
}

#[async_trait]
impl ToolInvoker for MockInvoker {
    async fn invoke(
        &self,
        invocation: Invocation,
        progress: mpsc::Sender<f32>,
        cancel: CancellationToken,
    ) -> Result<InvocationOutcome> {
        let capability_id = invocation.capability.id.clone();
        self.invocations.lock().push(RecordedInvocation {
            job_id: invocation.job_id.clone(),
            step_index: invocation.step_index,
            capability_id: capability_id.clone(),
            inputs: invocation.inputs.clone(),
        });

        if self.panics.lock().contains(&capability_id) {
            panic!("mock capability {} panicked", capability_id);
        }

        let delay = self
            .delays
            .lock()
            .get(&capability_id)
            .copied()
            .unwrap_or(*self.default_delay.lock());
        let _ = progress.try_send(0.5);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return Err(AppError::Canceled),
        }

        let scripted = self
            .scripted_failures
            .lock()
            .get_mut(&capability_id)
            .and_then(|q| q.pop_front());
        if let Some(error) = scripted {
            return Err(error);
        }
        if let Some(error) = self.permanent_failures.lock().get(&capability_id) {
            return Err(error.clone());
        }

        if let Some(parent) = invocation.output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::io(parent, e))?;
        }
        let content = format!(
            "{} <- {:?}\n",
            capability_id,
            invocation
                .inputs
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
        );
        tokio::fs::write(&invocation.output, content)
            .await
            .map_err(|e| AppError::io(&invocation.output, e))?;
        let _ = progress.try_send(1.0);

        Ok(InvocationOutcome {
            output: invocation.output,
            metrics: self.metrics.lock().get(&capability_id).cloned(),
        })
    }
}
