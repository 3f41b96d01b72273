//! SQLite-backed job store.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::plan::JobPlan;
use super::store::JobStore;
use super::types::{
    Artifact, Job, JobError, JobFilter, JobOptions, JobState, LogEntry, LogLevel, QualityMetrics,
    StepCheckpoint,
};
use crate::error::{AppError, Result};

const JOB_COLUMNS: &str = "id, state, inputs, target_format, recipe_id, options, progress, stage, \
     eta_ms, created_at, started_at, finished_at, error, retry_count, plan, quality";

/// SQLite-backed job store.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Opens (or creates) the database at `path`.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| AppError::io(parent, e))?;
        }
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                inputs TEXT NOT NULL,
                target_format TEXT NOT NULL,
                recipe_id TEXT,
                options TEXT NOT NULL,
                progress REAL NOT NULL DEFAULT 0,
                stage TEXT,
                eta_ms INTEGER,
                created_at TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT,
                error TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                plan TEXT NOT NULL,
                quality TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
            CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);

            CREATE TABLE IF NOT EXISTS artifacts (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                path TEXT NOT NULL,
                filename TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                format TEXT NOT NULL,
                checksum TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_artifacts_job ON artifacts(job_id);

            CREATE TABLE IF NOT EXISTS job_logs (
                job_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                level TEXT NOT NULL,
                message TEXT NOT NULL,
                context TEXT,
                PRIMARY KEY (job_id, sequence)
            );

            CREATE TABLE IF NOT EXISTS step_checkpoints (
                job_id TEXT NOT NULL,
                step_index INTEGER NOT NULL,
                output TEXT NOT NULL,
                completed_at TEXT NOT NULL,
                PRIMARY KEY (job_id, step_index)
            );
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Database("connection lock poisoned".to_string()))
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let state: String = row.get(1)?;
        let inputs: String = row.get(2)?;
        let options: String = row.get(5)?;
        let eta_ms: Option<i64> = row.get(8)?;
        let created_at: String = row.get(9)?;
        let started_at: Option<String> = row.get(10)?;
        let finished_at: Option<String> = row.get(11)?;
        let error: Option<String> = row.get(12)?;
        let plan: String = row.get(14)?;
        let quality: Option<String> = row.get(15)?;

        Ok(Job {
            id: row.get(0)?,
            state: JobState::parse(&state).unwrap_or(JobState::Failed),
            inputs: serde_json::from_str::<Vec<PathBuf>>(&inputs).unwrap_or_default(),
            target_format: row.get(3)?,
            recipe_id: row.get(4)?,
            options: serde_json::from_str::<JobOptions>(&options).unwrap_or_default(),
            progress: row.get::<_, f64>(6)? as f32,
            stage: row.get(7)?,
            eta_ms: eta_ms.map(|v| v.max(0) as u64),
            created_at: parse_time(&created_at),
            started_at: started_at.as_deref().map(parse_time),
            finished_at: finished_at.as_deref().map(parse_time),
            error: error.and_then(|e| serde_json::from_str::<JobError>(&e).ok()),
            retry_count: row.get(13)?,
            plan: serde_json::from_str::<JobPlan>(&plan).unwrap_or_default(),
            quality: quality.and_then(|q| serde_json::from_str::<QualityMetrics>(&q).ok()),
        })
    }

    fn row_to_artifact(row: &rusqlite::Row) -> rusqlite::Result<Artifact> {
        let path: String = row.get(2)?;
        let size: i64 = row.get(4)?;
        let created_at: String = row.get(7)?;
        Ok(Artifact {
            id: row.get(0)?,
            job_id: row.get(1)?,
            path: PathBuf::from(path),
            filename: row.get(3)?,
            size_bytes: size.max(0) as u64,
            format: row.get(5)?,
            checksum: row.get(6)?,
            created_at: parse_time(&created_at),
        })
    }

    fn row_to_log(row: &rusqlite::Row) -> rusqlite::Result<LogEntry> {
        let sequence: i64 = row.get(1)?;
        let timestamp: String = row.get(2)?;
        let level: String = row.get(3)?;
        let context: Option<String> = row.get(5)?;
        Ok(LogEntry {
            job_id: row.get(0)?,
            sequence: sequence.max(0) as u64,
            timestamp: parse_time(&timestamp),
            level: LogLevel::parse(&level),
            message: row.get(4)?,
            context: context.and_then(|c| serde_json::from_str(&c).ok()),
        })
    }

    fn job_params(job: &Job) -> Result<JobRow> {
        Ok(JobRow {
            inputs: serde_json::to_string(&job.inputs)?,
            options: serde_json::to_string(&job.options)?,
            error: job.error.as_ref().map(serde_json::to_string).transpose()?,
            plan: serde_json::to_string(&job.plan)?,
            quality: job.quality.as_ref().map(serde_json::to_string).transpose()?,
        })
    }
}

/// JSON-encoded columns of a job row.
struct JobRow {
    inputs: String,
    options: String,
    error: Option<String>,
    plan: String,
    quality: Option<String>,
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl JobStore for SqliteJobStore {
    fn insert_job(&self, job: &Job) -> Result<()> {
        let encoded = Self::job_params(job)?;
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO jobs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                JOB_COLUMNS
            ),
            params![
                job.id,
                job.state.as_str(),
                encoded.inputs,
                job.target_format,
                job.recipe_id,
                encoded.options,
                job.progress as f64,
                job.stage,
                job.eta_ms.map(|v| v as i64),
                job.created_at.to_rfc3339(),
                job.started_at.map(|t| t.to_rfc3339()),
                job.finished_at.map(|t| t.to_rfc3339()),
                encoded.error,
                job.retry_count,
                encoded.plan,
                encoded.quality,
            ],
        )?;
        Ok(())
    }

    fn update_job(&self, job: &Job) -> Result<()> {
        let encoded = Self::job_params(job)?;
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE jobs SET state = ?, progress = ?, stage = ?, eta_ms = ?, started_at = ?, \
             finished_at = ?, error = ?, retry_count = ?, plan = ?, quality = ?, options = ? \
             WHERE id = ?",
            params![
                job.state.as_str(),
                job.progress as f64,
                job.stage,
                job.eta_ms.map(|v| v as i64),
                job.started_at.map(|t| t.to_rfc3339()),
                job.finished_at.map(|t| t.to_rfc3339()),
                encoded.error,
                job.retry_count,
                encoded.plan,
                encoded.quality,
                encoded.options,
                job.id,
            ],
        )?;
        if rows == 0 {
            return Err(AppError::Database(format!("job not found: {}", job.id)));
        }
        Ok(())
    }

    fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?", JOB_COLUMNS),
                params![id],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let conn = self.conn()?;
        let state = filter.state.map(|s| s.as_str().to_string());
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE (?1 IS NULL OR state = ?1) \
             ORDER BY created_at DESC, rowid DESC LIMIT ?2 OFFSET ?3",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(params![state, filter.limit, filter.offset], Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn jobs_in_states(&self, states: &[JobState]) -> Result<Vec<Job>> {
        if states.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let placeholders = vec!["?"; states.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE state IN ({}) ORDER BY created_at ASC, rowid ASC",
            JOB_COLUMNS, placeholders
        ))?;
        let names: Vec<&str> = states.iter().map(|s| s.as_str()).collect();
        let jobs = stmt
            .query_map(rusqlite::params_from_iter(names), Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn insert_artifact(&self, artifact: &Artifact) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO artifacts (id, job_id, path, filename, size_bytes, format, checksum, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                artifact.id,
                artifact.job_id,
                artifact.path.to_string_lossy(),
                artifact.filename,
                artifact.size_bytes as i64,
                artifact.format,
                artifact.checksum,
                artifact.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn artifacts(&self, job_id: &str) -> Result<Vec<Artifact>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, path, filename, size_bytes, format, checksum, created_at \
             FROM artifacts WHERE job_id = ? ORDER BY created_at ASC, rowid ASC",
        )?;
        let artifacts = stmt
            .query_map(params![job_id], Self::row_to_artifact)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(artifacts)
    }

    fn delete_artifacts(&self, job_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM artifacts WHERE job_id = ?", params![job_id])?;
        Ok(())
    }

    fn append_log(
        &self,
        job_id: &str,
        level: LogLevel,
        message: &str,
        context: Option<Value>,
    ) -> Result<LogEntry> {
        let context_json = context.as_ref().map(serde_json::to_string).transpose()?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let next: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence), 0) + 1 FROM job_logs WHERE job_id = ?",
            params![job_id],
            |row| row.get(0),
        )?;
        let timestamp = Utc::now();
        tx.execute(
            "INSERT INTO job_logs (job_id, sequence, timestamp, level, message, context) \
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                job_id,
                next,
                timestamp.to_rfc3339(),
                level.as_str(),
                message,
                context_json,
            ],
        )?;
        tx.commit()?;

        Ok(LogEntry {
            job_id: job_id.to_string(),
            sequence: next as u64,
            timestamp,
            level,
            message: message.to_string(),
            context,
        })
    }

    fn logs_after(&self, job_id: &str, cursor: u64, limit: usize) -> Result<Vec<LogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT job_id, sequence, timestamp, level, message, context FROM job_logs \
             WHERE job_id = ? AND sequence > ? ORDER BY sequence ASC LIMIT ?",
        )?;
        let entries = stmt
            .query_map(
                params![job_id, cursor as i64, limit as i64],
                Self::row_to_log,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn save_checkpoint(&self, checkpoint: &StepCheckpoint) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO step_checkpoints (job_id, step_index, output, completed_at) \
             VALUES (?, ?, ?, ?)",
            params![
                checkpoint.job_id,
                checkpoint.step_index as i64,
                checkpoint.output.to_string_lossy(),
                checkpoint.completed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn checkpoints(&self, job_id: &str) -> Result<Vec<StepCheckpoint>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT job_id, step_index, output, completed_at FROM step_checkpoints \
             WHERE job_id = ? ORDER BY step_index ASC",
        )?;
        let checkpoints = stmt
            .query_map(params![job_id], |row| {
                let step_index: i64 = row.get(1)?;
                let output: String = row.get(2)?;
                let completed_at: String = row.get(3)?;
                Ok(StepCheckpoint {
                    job_id: row.get(0)?,
                    step_index: step_index.max(0) as usize,
                    output: PathBuf::from(output),
                    completed_at: parse_time(&completed_at),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(checkpoints)
    }

    fn clear_checkpoints(&self, job_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM step_checkpoints WHERE job_id = ?",
            params![job_id],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(target: &str) -> Job {
        Job::new(
            PathBuf::from("/tmp/in.docx"),
            target,
            None,
            JobOptions::default(),
            JobPlan::default(),
        )
    }

    #[test]
    fn test_insert_and_get() {
        let store = SqliteJobStore::in_memory().unwrap();
        let job = job("pdf");
        store.insert_job(&job).unwrap();

        let loaded = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(loaded.id, job.id);
        assert_eq!(loaded.state, JobState::Queued);
        assert_eq!(loaded.inputs, vec![PathBuf::from("/tmp/in.docx")]);
        assert_eq!(loaded.target_format, "pdf");
        assert!(store.get_job("missing").unwrap().is_none());
    }

    #[test]
    fn test_update_persists_error_and_state() {
        let store = SqliteJobStore::in_memory().unwrap();
        let mut job = job("pdf");
        store.insert_job(&job).unwrap();

        job.state = JobState::Failed;
        job.retry_count = 2;
        job.error = Some(JobError::from(&AppError::tool("pandoc", "exit 2")));
        job.finished_at = Some(Utc::now());
        store.update_job(&job).unwrap();

        let loaded = store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(loaded.state, JobState::Failed);
        assert_eq!(loaded.retry_count, 2);
        assert_eq!(loaded.error.unwrap().message, "Tool error (pandoc): exit 2");
        assert!(loaded.finished_at.is_some());
    }

    #[test]
    fn test_update_unknown_job_fails() {
        let store = SqliteJobStore::in_memory().unwrap();
        assert!(store.update_job(&job("pdf")).is_err());
    }

    #[test]
    fn test_list_and_states() {
        let store = SqliteJobStore::in_memory().unwrap();
        let a = job("pdf");
        let mut b = job("png");
        b.state = JobState::Running;
        store.insert_job(&a).unwrap();
        store.insert_job(&b).unwrap();

        assert_eq!(store.list_jobs(&JobFilter::new()).unwrap().len(), 2);
        let running = store
            .list_jobs(&JobFilter::new().with_state(JobState::Running))
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, b.id);

        let pending = store
            .jobs_in_states(&[JobState::Queued, JobState::Running])
            .unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, a.id);
    }

    #[test]
    fn test_log_sequences_are_per_job_and_ascending() {
        let store = SqliteJobStore::in_memory().unwrap();
        for i in 0..7 {
            store
                .append_log("j1", LogLevel::Info, &format!("line {}", i), None)
                .unwrap();
        }
        store.append_log("j2", LogLevel::Warn, "other", None).unwrap();

        let all = store.logs_after("j1", 0, 100).unwrap();
        assert_eq!(all.len(), 7);
        assert!(all.windows(2).all(|w| w[0].sequence < w[1].sequence));
        assert_eq!(all[0].sequence, 1);

        let tail = store.logs_after("j1", 5, 100).unwrap();
        let seqs: Vec<u64> = tail.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![6, 7]);

        assert_eq!(store.logs_after("j2", 0, 100).unwrap()[0].sequence, 1);
    }

    #[test]
    fn test_artifacts_and_checkpoints() {
        let store = SqliteJobStore::in_memory().unwrap();
        let artifact = Artifact {
            id: "a1".to_string(),
            job_id: "j1".to_string(),
            path: PathBuf::from("/tmp/out.pdf"),
            filename: "out.pdf".to_string(),
            size_bytes: 42,
            format: "pdf".to_string(),
            checksum: "abc".to_string(),
            created_at: Utc::now(),
        };
        store.insert_artifact(&artifact).unwrap();
        assert_eq!(store.artifacts("j1").unwrap(), vec![artifact]);
        store.delete_artifacts("j1").unwrap();
        assert!(store.artifacts("j1").unwrap().is_empty());

        for i in [1usize, 0] {
            store
                .save_checkpoint(&StepCheckpoint {
                    job_id: "j1".to_string(),
                    step_index: i,
                    output: PathBuf::from(format!("/tmp/step{}", i)),
                    completed_at: Utc::now(),
                })
                .unwrap();
        }
        let checkpoints = store.checkpoints("j1").unwrap();
        assert_eq!(checkpoints.len(), 2);
        assert_eq!(checkpoints[0].step_index, 0);
        store.clear_checkpoints("j1").unwrap();
        assert!(store.checkpoints("j1").unwrap().is_empty());
    }

    #[test]
    fn test_file_store_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("jobs.db");
        let job = job("pdf");
        {
            let store = SqliteJobStore::new(&path).unwrap();
            store.insert_job(&job).unwrap();
        }
        let store = SqliteJobStore::new(&path).unwrap();
        assert!(store.get_job(&job.id).unwrap().is_some());
    }
}
