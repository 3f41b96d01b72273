//! Job, artifact and log records owned by the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

use super::plan::JobPlan;
use crate::error::{AppError, ErrorKind};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Paused,
    Succeeded,
    Failed,
    Canceled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "succeeded" => Some(Self::Succeeded),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options bag supplied at job creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobOptions {
    /// Keep partially produced artifacts when the job is canceled.
    #[serde(default)]
    pub keep_on_cancel: bool,

    /// Run this planner path (a ranked path id such as `md-html[html]>html-pdf`)
    /// instead of the recommended one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_id: Option<String>,

    /// Per-job input size cap in MiB; can only tighten the configured limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_size_mb: Option<u32>,

    /// Copy final artifacts into this directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,

    /// Everything else; recipe edge conditions read from here.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobOptions {
    pub fn with_flag(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }
}

/// Request to convert one or more files, producing one job per input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub inputs: Vec<PathBuf>,
    /// Required unless a recipe is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe_id: Option<String>,
    #[serde(default)]
    pub options: JobOptions,
}

impl CreateJobRequest {
    pub fn convert(input: impl Into<PathBuf>, target_format: impl Into<String>) -> Self {
        Self {
            inputs: vec![input.into()],
            target_format: Some(target_format.into()),
            ..Default::default()
        }
    }

    pub fn with_recipe(input: impl Into<PathBuf>, recipe_id: impl Into<String>) -> Self {
        Self {
            inputs: vec![input.into()],
            recipe_id: Some(recipe_id.into()),
            ..Default::default()
        }
    }

    pub fn with_input(mut self, input: impl Into<PathBuf>) -> Self {
        self.inputs.push(input.into());
        self
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }
}

/// Control actions accepted for a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobAction {
    Pause,
    Resume,
    Cancel,
    Retry,
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
            Self::Retry => "retry",
        };
        f.write_str(name)
    }
}

/// Terminal error of a failed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl From<&AppError> for JobError {
    fn from(err: &AppError) -> Self {
        let response = err.to_response();
        Self {
            kind: response.kind,
            message: response.message,
            suggestion: response.suggestion,
        }
    }
}

/// Optional fidelity measurements reported by capabilities.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QualityMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_cer: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structure_consistency: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_recall: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_bitrate_deviation: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_validation_passed: Option<bool>,
}

impl QualityMetrics {
    /// Overlays every value `other` reports.
    pub fn merge(&mut self, other: &QualityMetrics) {
        self.ocr_cer = other.ocr_cer.or(self.ocr_cer);
        self.structure_consistency = other.structure_consistency.or(self.structure_consistency);
        self.table_recall = other.table_recall.or(self.table_recall);
        self.media_bitrate_deviation = other
            .media_bitrate_deviation
            .or(self.media_bitrate_deviation);
        self.schema_validation_passed = other
            .schema_validation_passed
            .or(self.schema_validation_passed);
    }
}

/// One tracked execution of a path or recipe against an input file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub state: JobState,
    pub inputs: Vec<PathBuf>,
    pub target_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe_id: Option<String>,
    pub options: JobOptions,
    /// Fraction of steps completed, in [0, 1].
    pub progress: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    /// Retries spent on the step that failed the job.
    #[serde(default)]
    pub retry_count: u32,
    pub plan: JobPlan,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityMetrics>,
}

impl Job {
    pub fn new(
        input: PathBuf,
        target_format: impl Into<String>,
        recipe_id: Option<String>,
        options: JobOptions,
        plan: JobPlan,
    ) -> Self {
        let eta_ms = Some(plan.total_estimated_ms());
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            state: JobState::Queued,
            inputs: vec![input],
            target_format: target_format.into(),
            recipe_id,
            options,
            progress: 0.0,
            stage: None,
            eta_ms,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
            retry_count: 0,
            plan,
            quality: None,
        }
    }

    pub fn input(&self) -> Option<&PathBuf> {
        self.inputs.first()
    }
}

/// A file produced by a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    pub id: String,
    pub job_id: String,
    pub path: PathBuf,
    pub filename: String,
    pub size_bytes: u64,
    pub format: String,
    /// Hex-encoded SHA-256 of the file.
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "DEBUG" => Self::Debug,
            "WARN" => Self::Warn,
            "ERROR" => Self::Error,
            _ => Self::Info,
        }
    }
}

/// Append-only per-job log record. Sequences start at 1.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub job_id: String,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// A completed step whose output can be reused on resume or retry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepCheckpoint {
    pub job_id: String,
    pub step_index: usize,
    pub output: PathBuf,
    pub completed_at: DateTime<Utc>,
}

/// Out-of-band notifications about job transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Progress {
        job_id: String,
        progress: f32,
        stage: String,
        eta_ms: Option<u64>,
    },
    StateChanged {
        job_id: String,
        old_state: JobState,
        new_state: JobState,
        error: Option<JobError>,
    },
    ArtifactReady {
        job_id: String,
        artifact_id: String,
        path: PathBuf,
        size_bytes: u64,
        format: String,
    },
    Log {
        entry: LogEntry,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Progress { job_id, .. }
            | Self::StateChanged { job_id, .. }
            | Self::ArtifactReady { job_id, .. } => job_id,
            Self::Log { entry } => &entry.job_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::StateChanged { .. } => "state_changed",
            Self::ArtifactReady { .. } => "artifact_ready",
            Self::Log { .. } => "log",
        }
    }
}

/// Filter for listing jobs.
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub state: Option<JobState>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl JobFilter {
    pub fn new() -> Self {
        Self {
            state: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_state(mut self, state: JobState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Current status of the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    pub workers: usize,
    pub queued_jobs: usize,
    pub active_jobs: usize,
}
