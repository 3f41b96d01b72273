//! Job orchestration: turning a selected path or recipe into a supervised,
//! controllable background job.
//!
//! - **Plans**: a path or recipe becomes a [`JobPlan`] of dependent steps
//! - **Execution**: a fixed worker pool pulls jobs in FIFO order
//! - **Persistence**: jobs, artifacts, logs and step checkpoints live in a [`JobStore`]

mod artifacts;
mod config;
mod invoker;
mod plan;
mod runner;
mod sqlite_store;
mod store;
mod types;

pub use artifacts::copy_with_checksum;
pub use config::{OrchestratorConfig, RetryConfig};
pub use invoker::{step_output_path, Invocation, InvocationOutcome, ProcessInvoker, ToolInvoker};
pub use plan::{JobPlan, JobStep, StepAction, StepInput};
pub use runner::{JobOrchestrator, OrchestratorDeps};
pub use sqlite_store::SqliteJobStore;
pub use store::JobStore;
pub use types::{
    Artifact, CreateJobRequest, Job, JobAction, JobError, JobEvent, JobFilter, JobOptions,
    JobState, LogEntry, LogLevel, OrchestratorStatus, QualityMetrics, StepCheckpoint,
};
