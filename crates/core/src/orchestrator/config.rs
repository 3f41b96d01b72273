//! Orchestrator configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the job orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Maximum number of simultaneously running jobs.
    /// Jobs beyond the limit stay queued in FIFO order.
    #[serde(default = "default_max_running_jobs")]
    pub max_running_jobs: usize,

    /// Root directory for per-job intermediate and output files.
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: PathBuf,

    /// CPU budget for parallel recipe branches, in units of one fully
    /// CPU-bound step (`cpu = 1.0`).
    #[serde(default = "default_host_cpu_budget")]
    pub host_cpu_budget: f32,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Capacity of the job event broadcast channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// How often idle workers re-check the queue (milliseconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Largest input file a job accepts, in bytes.
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: u64,
}

fn default_max_running_jobs() -> usize {
    2
}

fn default_workspace_dir() -> PathBuf {
    PathBuf::from("./data/jobs")
}

fn default_host_cpu_budget() -> f32 {
    4.0
}

fn default_event_buffer() -> usize {
    256
}

fn default_poll_interval() -> u64 {
    500
}

fn default_max_input_bytes() -> u64 {
    512 * 1024 * 1024
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_running_jobs: default_max_running_jobs(),
            workspace_dir: default_workspace_dir(),
            host_cpu_budget: default_host_cpu_budget(),
            retry: RetryConfig::default(),
            event_buffer: default_event_buffer(),
            poll_interval_ms: default_poll_interval(),
            max_input_bytes: default_max_input_bytes(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_workspace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_dir = dir.into();
        self
    }

    pub fn with_max_input_bytes(mut self, max: u64) -> Self {
        self.max_input_bytes = max;
        self
    }

    pub fn with_max_running_jobs(mut self, max: usize) -> Self {
        self.max_running_jobs = max;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_host_cpu_budget(mut self, budget: f32) -> Self {
        self.host_cpu_budget = budget;
        self
    }
}

/// Step retry policy for retryable capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    2
}

fn default_initial_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }
}
