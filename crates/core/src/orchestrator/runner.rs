//! Job orchestrator.
//!
//! Admits jobs into a FIFO queue and runs them on a fixed pool of workers.
//! Each job executes its plan level by level; between levels it persists a
//! checkpoint per finished step, which is where pause, cancel and shutdown
//! take effect.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, watch, Notify, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::artifacts::{artifact_name, copy_with_checksum, default_output_dir, remove_workspace};
use super::config::OrchestratorConfig;
use super::invoker::{step_output_path, Invocation, ToolInvoker};
use super::plan::{JobPlan, JobStep, StepAction, StepInput};
use super::store::JobStore;
use super::types::{
    Artifact, CreateJobRequest, Job, JobAction, JobError, JobEvent, JobFilter, JobState,
    LogEntry, LogLevel, OrchestratorStatus, QualityMetrics, StepCheckpoint,
};
use crate::capability::Registry;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::detect::format_of_path;
use crate::planner::Planner;
use crate::probe::{AvailabilitySnapshot, Prober};
use crate::recipe::RecipeBook;

/// How long `stop` waits for workers before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Upper bound on log entries returned by one `get_logs` call.
const LOG_PAGE_SIZE: usize = 1000;

/// Semaphore units per fully CPU-bound step.
const CPU_UNITS: f32 = 10.0;

/// Per-job control handles shared between callers and the executing worker.
#[derive(Clone)]
struct JobControl {
    cancel: CancellationToken,
    pause: Arc<watch::Sender<bool>>,
}

impl JobControl {
    fn new(shutdown: &CancellationToken) -> Self {
        let (pause, _) = watch::channel(false);
        Self {
            cancel: shutdown.child_token(),
            pause: Arc::new(pause),
        }
    }

    fn pause_requested(&self) -> bool {
        *self.pause.borrow()
    }
}

/// How an execution attempt ended.
enum Outcome {
    Succeeded,
    Canceled,
    /// The orchestrator is shutting down; the job is picked up again on restart.
    Interrupted,
    Failed { error: AppError, retries: u32 },
}

/// A step that could not be completed.
struct StepFailure {
    error: AppError,
    retries: u32,
}

struct StepOutput {
    index: usize,
    output: PathBuf,
    metrics: Option<QualityMetrics>,
}

/// Dependencies handed to the orchestrator.
pub struct OrchestratorDeps {
    pub registry: Arc<Registry>,
    pub prober: Arc<Prober>,
    pub planner: Arc<Planner>,
    pub recipes: Arc<RecipeBook>,
    pub store: Arc<dyn JobStore>,
    pub invoker: Arc<dyn ToolInvoker>,
}

struct Inner {
    config: OrchestratorConfig,
    registry: Arc<Registry>,
    prober: Arc<Prober>,
    planner: Arc<Planner>,
    recipes: Arc<RecipeBook>,
    store: Arc<dyn JobStore>,
    invoker: Arc<dyn ToolInvoker>,

    events: broadcast::Sender<JobEvent>,
    queue: Mutex<VecDeque<String>>,
    queue_notify: Notify,
    controls: Mutex<HashMap<String, JobControl>>,
    cpu: Arc<Semaphore>,
    cpu_units: u32,

    running: AtomicBool,
    active: AtomicUsize,
    shutdown: Mutex<CancellationToken>,
    workers: Mutex<Option<JoinSet<()>>>,
}

/// Runs conversion jobs as supervised, controllable units of work.
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

impl JobOrchestrator {
    pub fn new(config: OrchestratorConfig, deps: OrchestratorDeps) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let cpu_units = (config.host_cpu_budget * CPU_UNITS).round().max(1.0) as u32;

        Self {
            inner: Arc::new(Inner {
                registry: deps.registry,
                prober: deps.prober,
                planner: deps.planner,
                recipes: deps.recipes,
                store: deps.store,
                invoker: deps.invoker,
                events,
                queue: Mutex::new(VecDeque::new()),
                queue_notify: Notify::new(),
                controls: Mutex::new(HashMap::new()),
                cpu: Arc::new(Semaphore::new(cpu_units as usize)),
                cpu_units,
                running: AtomicBool::new(false),
                active: AtomicUsize::new(0),
                shutdown: Mutex::new(CancellationToken::new()),
                workers: Mutex::new(None),
                config,
            }),
        }
    }

    /// Validates and enqueues one job per input file.
    ///
    /// Every input is validated before any job is persisted, so a bad input
    /// rejects the whole request.
    pub async fn create(&self, request: CreateJobRequest) -> Result<Vec<String>> {
        let inner = &self.inner;
        if request.inputs.is_empty() {
            return Err(AppError::validation_with(
                "at least one input file is required",
                "Pass the path of the file to convert",
            ));
        }
        let target = request
            .target_format
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        if target.is_none() && request.recipe_id.is_none() {
            return Err(AppError::validation(
                "either a target format or a recipe is required",
            ));
        }

        let max_input_bytes = request
            .options
            .max_file_size_mb
            .map(|mb| u64::from(mb) * 1024 * 1024)
            .map_or(inner.config.max_input_bytes, |cap| {
                cap.min(inner.config.max_input_bytes)
            });

        let snapshot = inner.prober.snapshot();
        let mut jobs = Vec::with_capacity(request.inputs.len());
        for input in &request.inputs {
            let size = match tokio::fs::metadata(input).await {
                Ok(meta) if meta.is_file() => meta.len(),
                _ => {
                    return Err(AppError::validation_with(
                        format!("input file not found: {}", input.display()),
                        "Check the input path",
                    ))
                }
            };
            if size > max_input_bytes {
                return Err(AppError::ResourceLimit(format!(
                    "input {} is {} bytes, over the {} byte limit",
                    input.display(),
                    size,
                    max_input_bytes
                )));
            }
            let (plan, target_format) = inner.plan_job(&snapshot, input, target, &request)?;
            jobs.push(Job::new(
                input.clone(),
                target_format,
                request.recipe_id.clone(),
                request.options.clone(),
                plan,
            ));
        }

        let mut ids = Vec::with_capacity(jobs.len());
        for job in &jobs {
            inner.store.insert_job(job)?;
            metrics::JOBS_CREATED.inc();
            inner.log(
                &job.id,
                LogLevel::Info,
                "Job created",
                Some(json!({
                    "input": job.inputs[0],
                    "target_format": job.target_format,
                    "steps": job.plan.len(),
                    "path_id": job.plan.path_id,
                    "recipe_id": job.plan.recipe_id,
                })),
            );
            info!(
                job_id = %job.id,
                target = %job.target_format,
                steps = job.plan.len(),
                "Job queued"
            );
            inner.enqueue(&job.id, false);
            ids.push(job.id.clone());
        }
        Ok(ids)
    }

    pub fn get(&self, id: &str) -> Result<Option<Job>> {
        self.inner.store.get_job(id)
    }

    pub fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        self.inner.store.list_jobs(filter)
    }

    pub fn get_artifacts(&self, id: &str) -> Result<Vec<Artifact>> {
        self.inner.require_job(id)?;
        self.inner.store.artifacts(id)
    }

    /// Log entries after `cursor` (exclusive), in ascending order.
    pub fn get_logs(&self, id: &str, cursor: Option<u64>) -> Result<Vec<LogEntry>> {
        self.inner.require_job(id)?;
        self.inner
            .store
            .logs_after(id, cursor.unwrap_or(0), LOG_PAGE_SIZE)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Applies a control action and returns the job as it stands afterwards.
    ///
    /// Pause and cancel of a running job are requests: the state changes once
    /// the job reaches its next step boundary.
    pub async fn control(&self, id: &str, action: JobAction) -> Result<Job> {
        let inner = &self.inner;
        let mut job = inner.require_job(id)?;
        debug!(job_id = %id, %action, state = %job.state, "Control requested");

        match action {
            JobAction::Pause => {
                if job.state != JobState::Running {
                    return Err(invalid_action(&job, action));
                }
                inner.control_for(id).pause.send_replace(true);
                inner.log(id, LogLevel::Info, "Pause requested", None);
            }
            JobAction::Resume => {
                let control = inner.controls.lock().get(id).cloned();
                match (job.state, control) {
                    (JobState::Paused | JobState::Running, Some(control))
                        if control.pause_requested() =>
                    {
                        control.pause.send_replace(false);
                        inner.log(id, LogLevel::Info, "Resume requested", None);
                    }
                    _ => return Err(invalid_action(&job, action)),
                }
            }
            JobAction::Cancel => {
                if job.state.is_terminal() {
                    return Err(invalid_action(&job, action));
                }
                if inner.dequeue(id) {
                    // Not held by a worker.
                    inner.controls.lock().remove(id);
                    inner.finish_canceled(&mut job).await?;
                } else {
                    inner.control_for(id).cancel.cancel();
                    inner.log(id, LogLevel::Info, "Cancel requested", None);
                }
            }
            JobAction::Retry => {
                if job.state != JobState::Failed {
                    return Err(invalid_action(&job, action));
                }
                job.retry_count = 0;
                job.finished_at = None;
                inner.transition(&mut job, JobState::Queued, None)?;
                inner.log(id, LogLevel::Info, "Job re-queued for retry", None);
                inner.enqueue(id, false);
            }
        }

        inner.require_job(id)
    }

    /// Recovers unfinished jobs and starts the worker pool.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.running.swap(true, Ordering::SeqCst) {
            warn!("Orchestrator already running");
            return Ok(());
        }
        *inner.shutdown.lock() = CancellationToken::new();
        inner.controls.lock().clear();

        let pending =
            inner
                .store
                .jobs_in_states(&[JobState::Queued, JobState::Running, JobState::Paused])?;
        // Rebuild the queue in admission order, keeping jobs created before start.
        inner.queue.lock().clear();
        for job in &pending {
            inner.enqueue(&job.id, job.state == JobState::Paused);
        }
        if !pending.is_empty() {
            info!(jobs = pending.len(), "Recovered unfinished jobs");
        }

        let workers = inner.config.max_running_jobs.max(1);
        let mut set = JoinSet::new();
        for worker_id in 0..workers {
            let inner = self.inner.clone();
            set.spawn(async move { inner.worker_loop(worker_id).await });
        }
        *inner.workers.lock() = Some(set);

        info!(workers, "Job orchestrator started");
        Ok(())
    }

    /// Stops the workers. Running jobs stop at their next boundary and stay
    /// persisted for recovery.
    pub async fn stop(&self) {
        let inner = &self.inner;
        if !inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping job orchestrator");
        inner.shutdown.lock().cancel();

        let workers = inner.workers.lock().take();
        if let Some(mut set) = workers {
            let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
                while set.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!("Workers did not stop in time, aborting");
                set.abort_all();
            }
        }
        info!("Job orchestrator stopped");
    }

    pub fn status(&self) -> OrchestratorStatus {
        let inner = &self.inner;
        let running = inner.running.load(Ordering::SeqCst);
        OrchestratorStatus {
            running,
            workers: if running {
                inner.config.max_running_jobs.max(1)
            } else {
                0
            },
            queued_jobs: inner.queue.lock().len(),
            active_jobs: inner.active.load(Ordering::SeqCst),
        }
    }
}

fn invalid_action(job: &Job, action: JobAction) -> AppError {
    AppError::validation(format!(
        "cannot {} job {} in state {}",
        action, job.id, job.state
    ))
}

impl Inner {
    fn require_job(&self, id: &str) -> Result<Job> {
        self.store
            .get_job(id)?
            .ok_or_else(|| AppError::validation(format!("unknown job: {}", id)))
    }

    /// Builds the step plan for one input and resolves the job's target format.
    fn plan_job(
        &self,
        snapshot: &AvailabilitySnapshot,
        input: &Path,
        target: Option<&str>,
        request: &CreateJobRequest,
    ) -> Result<(JobPlan, String)> {
        let source = format_of_path(input)?;

        let Some(recipe_id) = &request.recipe_id else {
            let target = target.unwrap_or_default();
            let path = self.planner.select_path(
                snapshot,
                &source,
                target,
                request.options.path_id.as_deref(),
            )?;
            let target = self.planner.canonical_format(target);
            return Ok((JobPlan::from_path(&path, &source), target));
        };

        let recipe = self.recipes.get(recipe_id).ok_or_else(|| {
            AppError::validation_with(
                format!("unknown recipe: {}", recipe_id),
                "Save the recipe before referencing it",
            )
        })?;
        let exec = self
            .recipes
            .validator()
            .validate_for_source(&recipe, snapshot, Some(&source))?;
        let plan = JobPlan::from_recipe(
            &exec,
            &request.options.extra,
            &source,
            &self.registry,
            &self.planner,
        )?;

        let mut missing = Vec::new();
        for id in plan.capability_ids() {
            match snapshot.get(&id) {
                Some(entry) if entry.available => {}
                Some(entry) if !entry.missing.is_empty() => missing.extend(entry.missing.clone()),
                _ => missing.push(id),
            }
        }
        if !missing.is_empty() {
            missing.sort();
            missing.dedup();
            return Err(AppError::validation_with(
                format!(
                    "recipe '{}' uses unavailable capabilities",
                    recipe_id
                ),
                format!("Install the missing requirements: {}", missing.join(", ")),
            ));
        }

        let sinks: Vec<String> = plan.sinks().map(|s| s.to_format.clone()).collect();
        let target_format = match target {
            Some(t) => {
                let t = self.planner.canonical_format(t);
                if !sinks.contains(&t) {
                    return Err(AppError::validation(format!(
                        "recipe '{}' does not produce '{}'",
                        recipe_id, t
                    )));
                }
                t
            }
            None => sinks.first().cloned().unwrap_or_default(),
        };
        Ok((plan, target_format))
    }

    fn control_for(&self, id: &str) -> JobControl {
        let shutdown = self.shutdown.lock().clone();
        self.controls
            .lock()
            .entry(id.to_string())
            .or_insert_with(|| JobControl::new(&shutdown))
            .clone()
    }

    fn enqueue(&self, id: &str, paused: bool) {
        let control = self.control_for(id);
        if paused {
            control.pause.send_replace(true);
        }
        {
            let mut queue = self.queue.lock();
            if queue.iter().any(|q| q == id) {
                return;
            }
            queue.push_back(id.to_string());
        }
        self.queue_notify.notify_one();
    }

    /// Removes a job from the queue; false if a worker already took it.
    fn dequeue(&self, id: &str) -> bool {
        let mut queue = self.queue.lock();
        match queue.iter().position(|q| q == id) {
            Some(pos) => {
                queue.remove(pos);
                true
            }
            None => false,
        }
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn log(&self, job_id: &str, level: LogLevel, message: &str, context: Option<Value>) {
        match self.store.append_log(job_id, level, message, context) {
            Ok(entry) => self.emit(JobEvent::Log { entry }),
            Err(e) => warn!(job_id = %job_id, error = %e, "Failed to append job log"),
        }
    }

    fn transition(&self, job: &mut Job, new_state: JobState, error: Option<JobError>) -> Result<()> {
        let old_state = job.state;
        job.state = new_state;
        job.error = error.clone();
        if new_state == JobState::Running && job.started_at.is_none() {
            job.started_at = Some(Utc::now());
        }
        if new_state.is_terminal() {
            job.finished_at = Some(Utc::now());
            job.eta_ms = None;
        }
        self.store.update_job(job)?;

        info!(job_id = %job.id, from = %old_state, to = %new_state, "Job state changed");
        self.emit(JobEvent::StateChanged {
            job_id: job.id.clone(),
            old_state,
            new_state,
            error,
        });
        Ok(())
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        let shutdown = self.shutdown.lock().clone();
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(10));
        debug!(worker_id, "Worker started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let next = self.queue.lock().pop_front();
            let Some(job_id) = next else {
                tokio::select! {
                    _ = self.queue_notify.notified() => {}
                    _ = tokio::time::sleep(poll) => {}
                    _ = shutdown.cancelled() => break,
                }
                continue;
            };

            self.active.fetch_add(1, Ordering::SeqCst);
            metrics::JOBS_RUNNING.inc();
            let task = tokio::spawn({
                let inner = self.clone();
                let job_id = job_id.clone();
                async move { inner.run_job(&job_id).await }
            });
            if let Err(e) = task.await {
                let message = if e.is_panic() {
                    "job task panicked".to_string()
                } else {
                    format!("job task aborted: {}", e)
                };
                error!(worker_id, job_id = %job_id, %message, "Job task failed");
                self.fail_after_crash(&job_id, AppError::Internal(message));
            }
            metrics::JOBS_RUNNING.dec();
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
        debug!(worker_id, "Worker stopped");
    }

    fn fail_after_crash(&self, job_id: &str, error: AppError) {
        let Ok(Some(mut job)) = self.store.get_job(job_id) else {
            return;
        };
        if job.state.is_terminal() {
            return;
        }
        self.controls.lock().remove(job_id);
        self.log(job_id, LogLevel::Error, &error.to_string(), None);
        if let Err(e) = self.transition(&mut job, JobState::Failed, Some(JobError::from(&error))) {
            error!(job_id = %job_id, error = %e, "Failed to record job failure");
        }
        metrics::JOBS_FINISHED
            .with_label_values(&[JobState::Failed.as_str()])
            .inc();
    }

    async fn run_job(&self, job_id: &str) {
        let mut job = match self.store.get_job(job_id) {
            Ok(Some(job)) if !job.state.is_terminal() => job,
            Ok(_) => return,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to load job");
                return;
            }
        };
        let control = self.control_for(job_id);

        let outcome = match self.execute(&mut job, &control).await {
            Ok(outcome) => outcome,
            Err(error) => Outcome::Failed { error, retries: 0 },
        };

        let finished = match outcome {
            Outcome::Succeeded => self.finish_succeeded(&mut job).await,
            Outcome::Canceled => self.finish_canceled(&mut job).await,
            Outcome::Failed { error, retries } => self.finish_failed(&mut job, error, retries),
            Outcome::Interrupted => {
                info!(job_id = %job_id, state = %job.state, "Job interrupted by shutdown");
                return;
            }
        };
        if let Err(e) = finished {
            error!(job_id = %job_id, error = %e, "Failed to finalize job");
            self.fail_after_crash(job_id, e);
        }
        self.controls.lock().remove(job_id);
    }

    fn interruption(&self, control: &JobControl) -> Option<Outcome> {
        if !control.cancel.is_cancelled() {
            return None;
        }
        if self.shutdown.lock().is_cancelled() {
            Some(Outcome::Interrupted)
        } else {
            Some(Outcome::Canceled)
        }
    }

    /// Step boundary: honors cancel and shutdown, and holds the job here
    /// while a pause is in effect.
    async fn boundary(
        &self,
        job: &mut Job,
        control: &JobControl,
        next_step: usize,
    ) -> Result<Option<Outcome>> {
        if let Some(outcome) = self.interruption(control) {
            return Ok(Some(outcome));
        }
        if !control.pause_requested() {
            if job.state == JobState::Paused {
                self.transition(job, JobState::Running, None)?;
            }
            return Ok(None);
        }

        if job.state != JobState::Paused {
            self.transition(job, JobState::Paused, None)?;
            self.log(
                &job.id,
                LogLevel::Info,
                &format!("Job paused before step {}", next_step + 1),
                None,
            );
        }

        let mut pause = control.pause.subscribe();
        loop {
            if !*pause.borrow_and_update() {
                break;
            }
            tokio::select! {
                changed = pause.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = control.cancel.cancelled() => {
                    return Ok(self.interruption(control));
                }
            }
        }

        self.transition(job, JobState::Running, None)?;
        self.log(&job.id, LogLevel::Info, "Job resumed", None);
        Ok(None)
    }

    fn workspace(&self, job_id: &str) -> PathBuf {
        self.config.workspace_dir.join(job_id)
    }

    async fn execute(&self, job: &mut Job, control: &JobControl) -> Result<Outcome> {
        match job.state {
            JobState::Queued => {
                self.transition(job, JobState::Running, None)?;
                self.log(&job.id, LogLevel::Info, "Job started", None);
            }
            _ => self.log(
                &job.id,
                LogLevel::Info,
                &format!("Job resumed after restart in state {}", job.state),
                None,
            ),
        }

        let workspace = self.workspace(&job.id);
        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|e| AppError::io(&workspace, e))?;

        let input = job
            .input()
            .cloned()
            .ok_or_else(|| AppError::Internal(format!("job {} has no input", job.id)))?;
        let plan = job.plan.clone();
        let total = plan.len().max(1) as f32;

        let mut outputs: HashMap<usize, PathBuf> = HashMap::new();
        for checkpoint in self.store.checkpoints(&job.id)? {
            if checkpoint.step_index < plan.len()
                && tokio::fs::metadata(&checkpoint.output).await.is_ok()
            {
                outputs.insert(checkpoint.step_index, checkpoint.output);
            }
        }
        if !outputs.is_empty() {
            debug!(job_id = %job.id, reused = outputs.len(), "Reusing step checkpoints");
        }

        for level in plan.levels() {
            let pending: Vec<&JobStep> = level
                .iter()
                .filter(|i| !outputs.contains_key(i))
                .filter_map(|i| plan.steps.get(*i))
                .collect();
            if pending.is_empty() {
                continue;
            }

            if let Some(outcome) = self.boundary(job, control, pending[0].index).await? {
                return Ok(outcome);
            }

            let done_before = outputs.len() as f32;
            job.stage = Some(
                pending
                    .iter()
                    .map(|s| s.label.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            );
            job.eta_ms = Some(plan.remaining_ms(&outputs.keys().copied().collect::<Vec<_>>()));
            self.store.update_job(job)?;

            let workspace = &workspace;
            let runs = pending.iter().map(|step| {
                let inputs = step
                    .inputs
                    .iter()
                    .map(|i| match i {
                        StepInput::Source => Ok(input.clone()),
                        StepInput::Step(j) => outputs.get(j).cloned().ok_or_else(|| {
                            AppError::Internal(format!("step {} ran before its input {}", step.index, j))
                        }),
                    })
                    .collect::<Result<Vec<_>>>();
                let job_ref = &*job;
                async move {
                    let inputs = inputs.map_err(|error| StepFailure { error, retries: 0 })?;
                    self.run_step(job_ref, step, inputs, workspace, control, done_before / total)
                        .await
                }
            });
            let results = join_all(runs).await;

            let mut failure: Option<StepFailure> = None;
            for result in results {
                match result {
                    Ok(done) => {
                        self.store.save_checkpoint(&StepCheckpoint {
                            job_id: job.id.clone(),
                            step_index: done.index,
                            output: done.output.clone(),
                            completed_at: Utc::now(),
                        })?;
                        if let Some(reported) = &done.metrics {
                            job.quality
                                .get_or_insert_with(QualityMetrics::default)
                                .merge(reported);
                        }
                        outputs.insert(done.index, done.output);
                    }
                    Err(f) => {
                        // Cancellation wins over a concurrent failure.
                        let keep_existing = matches!(
                            failure.as_ref().map(|f| &f.error),
                            Some(AppError::Canceled)
                        );
                        if !keep_existing {
                            failure = Some(f);
                        }
                    }
                }
            }

            job.progress = outputs.len() as f32 / total;
            let done: Vec<usize> = outputs.keys().copied().collect();
            job.eta_ms = Some(plan.remaining_ms(&done));
            self.store.update_job(job)?;
            self.emit(JobEvent::Progress {
                job_id: job.id.clone(),
                progress: job.progress,
                stage: job.stage.clone().unwrap_or_default(),
                eta_ms: job.eta_ms,
            });

            if let Some(f) = failure {
                if matches!(f.error, AppError::Canceled) {
                    return Ok(self.interruption(control).unwrap_or(Outcome::Canceled));
                }
                return Ok(Outcome::Failed {
                    error: f.error,
                    retries: f.retries,
                });
            }
        }

        if let Some(outcome) = self.interruption(control) {
            return Ok(outcome);
        }
        self.place_artifacts(job, &outputs).await?;
        Ok(Outcome::Succeeded)
    }

    async fn run_step(
        &self,
        job: &Job,
        step: &JobStep,
        inputs: Vec<PathBuf>,
        workspace: &Path,
        control: &JobControl,
        base_progress: f32,
    ) -> std::result::Result<StepOutput, StepFailure> {
        let fail = |error: AppError| StepFailure { error, retries: 0 };
        let first = inputs
            .first()
            .cloned()
            .ok_or_else(|| fail(AppError::Internal(format!("step {} has no input", step.index))))?;

        let capability_id = match &step.action {
            StepAction::Passthrough => {
                return Ok(StepOutput {
                    index: step.index,
                    output: first,
                    metrics: None,
                })
            }
            StepAction::Validate => {
                let len = tokio::fs::metadata(&first)
                    .await
                    .map(|m| m.len())
                    .map_err(|e| fail(AppError::io(&first, e)))?;
                if len == 0 {
                    return Err(fail(AppError::tool(
                        &step.label,
                        format!("{} is empty", first.display()),
                    )));
                }
                self.log(&job.id, LogLevel::Info, &format!("{} passed", step.label), None);
                return Ok(StepOutput {
                    index: step.index,
                    output: first,
                    metrics: None,
                });
            }
            StepAction::Convert { capability_id } => capability_id,
        };

        let capability = self.registry.get(capability_id).ok_or_else(|| {
            fail(AppError::Internal(format!(
                "capability '{}' is no longer registered",
                capability_id
            )))
        })?;
        let step_dir = workspace.join(format!("step-{:02}", step.index));
        let output = step_output_path(&step_dir, step.index, &step.to_format);
        let permits = ((capability.cost.cpu * CPU_UNITS).ceil() as u32).clamp(1, self.cpu_units);

        let mut attempt: u32 = 0;
        loop {
            let permit = tokio::select! {
                permit = self.cpu.clone().acquire_many_owned(permits) => permit
                    .map_err(|_| fail(AppError::Internal("cpu budget closed".to_string())))?,
                _ = control.cancel.cancelled() => return Err(fail(AppError::Canceled)),
            };

            self.log(
                &job.id,
                LogLevel::Info,
                &format!("Running step {}: {}", step.index + 1, step.label),
                Some(json!({ "capability": capability.id, "attempt": attempt + 1 })),
            );
            let started = Instant::now();
            let (tx, mut rx) = mpsc::channel::<f32>(16);
            let invocation = Invocation {
                job_id: job.id.clone(),
                step_index: step.index,
                capability: capability.clone(),
                inputs: inputs.clone(),
                output: output.clone(),
                output_dir: step_dir.clone(),
                format: step.to_format.clone(),
            };

            let total = job.plan.len().max(1) as f32;
            let forward = async {
                while let Some(fraction) = rx.recv().await {
                    self.emit(JobEvent::Progress {
                        job_id: job.id.clone(),
                        progress: (base_progress + fraction.clamp(0.0, 1.0) / total).min(1.0),
                        stage: step.label.clone(),
                        eta_ms: None,
                    });
                }
            };
            let (result, ()) = tokio::join!(
                self.invoker.invoke(invocation, tx, control.cancel.clone()),
                forward
            );
            metrics::STEP_DURATION
                .with_label_values(&[capability.id.as_str()])
                .observe(started.elapsed().as_secs_f64());

            let error = match result {
                Ok(outcome) => {
                    if tokio::fs::metadata(&outcome.output).await.is_err() {
                        return Err(StepFailure {
                            error: AppError::tool(
                                &capability.id,
                                format!("no output produced at {}", outcome.output.display()),
                            ),
                            retries: attempt,
                        });
                    }
                    debug!(job_id = %job.id, step = step.index, "Step completed");
                    return Ok(StepOutput {
                        index: step.index,
                        output: outcome.output,
                        metrics: outcome.metrics,
                    });
                }
                Err(error) => error,
            };

            if matches!(error, AppError::Canceled) {
                return Err(StepFailure { error, retries: attempt });
            }
            let retryable = capability.retryable && error.is_transient();
            if !retryable || attempt >= self.config.retry.max_attempts {
                self.log(
                    &job.id,
                    LogLevel::Error,
                    &format!("Step {} failed: {}", step.index + 1, error),
                    None,
                );
                return Err(StepFailure {
                    error,
                    retries: attempt,
                });
            }

            attempt += 1;
            metrics::STEP_RETRIES.inc();
            let delay = self.config.retry.delay_for(attempt);
            self.log(
                &job.id,
                LogLevel::Warn,
                &format!(
                    "Step {} failed, retrying in {}ms: {}",
                    step.index + 1,
                    delay.as_millis(),
                    error
                ),
                Some(json!({ "attempt": attempt })),
            );
            drop(permit);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = control.cancel.cancelled() => {
                    return Err(StepFailure { error: AppError::Canceled, retries: attempt });
                }
            }
        }
    }

    /// Copies sink outputs to their final location and records them.
    async fn place_artifacts(&self, job: &Job, outputs: &HashMap<usize, PathBuf>) -> Result<()> {
        let input = job.input().cloned().unwrap_or_default();
        let dir = match &job.options.output_dir {
            Some(dir) => dir.clone(),
            None => default_output_dir(&self.workspace(&job.id)),
        };

        self.store.delete_artifacts(&job.id)?;
        let mut taken: Vec<String> = Vec::new();
        for step in job.plan.sinks() {
            let Some(source) = outputs.get(&step.index) else {
                continue;
            };
            let filename = artifact_name(&input, &step.to_format, &taken);
            let path = dir.join(&filename);
            let (size_bytes, checksum) = copy_with_checksum(source, &path).await?;
            taken.push(filename.clone());

            let artifact = Artifact {
                id: uuid::Uuid::new_v4().to_string(),
                job_id: job.id.clone(),
                path: path.clone(),
                filename,
                size_bytes,
                format: step.to_format.clone(),
                checksum,
                created_at: Utc::now(),
            };
            self.store.insert_artifact(&artifact)?;
            self.emit(JobEvent::ArtifactReady {
                job_id: job.id.clone(),
                artifact_id: artifact.id.clone(),
                path,
                size_bytes,
                format: artifact.format.clone(),
            });
            self.log(
                &job.id,
                LogLevel::Info,
                &format!("Artifact ready: {}", artifact.filename),
                Some(json!({ "size_bytes": size_bytes, "checksum": artifact.checksum })),
            );
        }
        Ok(())
    }

    async fn finish_succeeded(&self, job: &mut Job) -> Result<()> {
        job.progress = 1.0;
        job.stage = None;
        job.retry_count = 0;
        self.transition(job, JobState::Succeeded, None)?;
        self.log(&job.id, LogLevel::Info, "Job succeeded", None);
        metrics::JOBS_FINISHED
            .with_label_values(&[JobState::Succeeded.as_str()])
            .inc();
        Ok(())
    }

    async fn finish_canceled(&self, job: &mut Job) -> Result<()> {
        if job.options.keep_on_cancel {
            self.log(&job.id, LogLevel::Info, "Keeping partial outputs", None);
        } else {
            self.store.delete_artifacts(&job.id)?;
            self.store.clear_checkpoints(&job.id)?;
            remove_workspace(&self.workspace(&job.id)).await?;
        }
        job.stage = None;
        self.transition(job, JobState::Canceled, None)?;
        self.log(&job.id, LogLevel::Info, "Job canceled", None);
        metrics::JOBS_FINISHED
            .with_label_values(&[JobState::Canceled.as_str()])
            .inc();
        Ok(())
    }

    fn finish_failed(&self, job: &mut Job, error: AppError, retries: u32) -> Result<()> {
        warn!(job_id = %job.id, error = %error, retries, "Job failed");
        job.retry_count = retries;
        self.transition(job, JobState::Failed, Some(JobError::from(&error)))?;
        self.log(
            &job.id,
            LogLevel::Error,
            &format!("Job failed: {}", error),
            Some(json!({ "kind": error.kind(), "retries": retries })),
        );
        metrics::JOBS_FINISHED
            .with_label_values(&[JobState::Failed.as_str()])
            .inc();
        Ok(())
    }
}
