//! Job persistence trait.

use super::types::{Artifact, Job, JobFilter, JobState, LogEntry, LogLevel, StepCheckpoint};
use crate::error::Result;
use serde_json::Value;

/// Durable storage for jobs, their artifacts, logs and step checkpoints.
///
/// Implementations must be safe to call from any worker; every method is a
/// short synchronous transaction.
pub trait JobStore: Send + Sync {
    fn insert_job(&self, job: &Job) -> Result<()>;

    /// Replaces the stored record with `job`. Fails if the job is unknown.
    fn update_job(&self, job: &Job) -> Result<()>;

    fn get_job(&self, id: &str) -> Result<Option<Job>>;

    /// Jobs matching `filter`, newest first.
    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    /// Jobs in any of `states`, oldest first.
    fn jobs_in_states(&self, states: &[JobState]) -> Result<Vec<Job>>;

    fn insert_artifact(&self, artifact: &Artifact) -> Result<()>;

    fn artifacts(&self, job_id: &str) -> Result<Vec<Artifact>>;

    fn delete_artifacts(&self, job_id: &str) -> Result<()>;

    /// Appends a log line and returns it with its assigned sequence.
    fn append_log(
        &self,
        job_id: &str,
        level: LogLevel,
        message: &str,
        context: Option<Value>,
    ) -> Result<LogEntry>;

    /// Log entries with a sequence greater than `cursor`, ascending.
    fn logs_after(&self, job_id: &str, cursor: u64, limit: usize) -> Result<Vec<LogEntry>>;

    fn save_checkpoint(&self, checkpoint: &StepCheckpoint) -> Result<()>;

    fn checkpoints(&self, job_id: &str) -> Result<Vec<StepCheckpoint>>;

    fn clear_checkpoints(&self, job_id: &str) -> Result<()>;
}
