//! Job orchestrator lifecycle integration tests.
//!
//! These tests drive complete jobs through the orchestrator:
//! queued -> running -> (paused) -> succeeded | failed | canceled

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use f2f_core::{
    orchestrator::{JobFilter, JobOptions, RetryConfig},
    recipe::{NodeType, RecipeEdge, RecipeNode},
    testing::{fixtures, FakeToolResolver, MockInvoker},
    AppError, CreateJobRequest, ErrorKind, JobAction, JobEvent, JobOrchestrator, JobState,
    JobStore, OrchestratorConfig, OrchestratorDeps, Planner, PlannerConfig, Prober, ProberConfig,
    Recipe, RecipeBook, RecipeValidator, SqliteJobStore,
};

/// Test helper wiring the orchestrator to a mock invoker and a real store.
struct TestHarness {
    orchestrator: JobOrchestrator,
    invoker: Arc<MockInvoker>,
    store: Arc<SqliteJobStore>,
    prober: Arc<Prober>,
    recipes: Arc<RecipeBook>,
    workspace: std::path::PathBuf,
    dir: TempDir,
}

impl TestHarness {
    async fn new() -> Self {
        Self::with_workers(2).await
    }

    async fn with_workers(workers: usize) -> Self {
        Self::with_config(workers, |config| config).await
    }

    /// Registry: md -> html -> pdf -> txt, where html-pdf is retryable.
    async fn with_config(
        workers: usize,
        adjust: impl FnOnce(OrchestratorConfig) -> OrchestratorConfig,
    ) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let workspace = dir.path().join("work");

        let mut html_pdf = fixtures::capability("html-pdf", "html", "pdf", 0.9);
        html_pdf.retryable = true;
        let registry = fixtures::registry(vec![
            fixtures::capability("md-html", "md", "html", 0.95),
            html_pdf,
            fixtures::capability("pdf-txt", "pdf", "txt", 0.8),
        ]);

        let prober = Arc::new(Prober::new(
            registry.clone(),
            Arc::new(FakeToolResolver::new()),
            ProberConfig::default(),
        ));
        prober.probe().await;

        let planner = Arc::new(Planner::new(registry.clone(), PlannerConfig::default()));
        let validator = Arc::new(RecipeValidator::new(registry.clone(), planner.clone()));
        let recipes = Arc::new(RecipeBook::new(validator));

        let store = Arc::new(
            SqliteJobStore::new(&dir.path().join("jobs.db")).expect("Failed to create job store"),
        );
        let invoker = Arc::new(MockInvoker::new().with_default_delay(Duration::from_millis(30)));

        let mut config = OrchestratorConfig::default()
            .with_workspace_dir(&workspace)
            .with_max_running_jobs(workers)
            .with_retry(RetryConfig {
                max_attempts: 2,
                initial_delay_ms: 10,
                max_delay_ms: 50,
                backoff_multiplier: 2.0,
            });
        config.poll_interval_ms = 20;
        let config = adjust(config);

        let orchestrator = JobOrchestrator::new(
            config,
            OrchestratorDeps {
                registry,
                prober: prober.clone(),
                planner,
                recipes: recipes.clone(),
                store: store.clone() as Arc<dyn JobStore>,
                invoker: invoker.clone(),
            },
        );

        Self {
            orchestrator,
            invoker,
            store,
            prober,
            recipes,
            workspace,
            dir,
        }
    }

    fn input(&self, name: &str) -> std::path::PathBuf {
        fixtures::input_file(self.dir.path(), name)
    }

    async fn create(&self, request: CreateJobRequest) -> String {
        self.orchestrator
            .create(request)
            .await
            .expect("Failed to create job")
            .remove(0)
    }

    fn state(&self, job_id: &str) -> Option<JobState> {
        self.store.get_job(job_id).ok().flatten().map(|j| j.state)
    }

    async fn wait_for_state(&self, job_id: &str, expected: JobState, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        let poll_interval = Duration::from_millis(10);

        while start.elapsed() < timeout {
            if let Some(state) = self.state(job_id) {
                if state == expected {
                    return true;
                }
                // Stop if we hit a different terminal state
                if state.is_terminal() {
                    return false;
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
        false
    }

    async fn wait_until<F: Fn() -> bool>(&self, condition: F, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_job_runs_to_success_and_places_artifact() {
    let harness = TestHarness::new().await;
    harness.orchestrator.start().await.unwrap();

    let input = harness.input("report.md");
    let job_id = harness.create(CreateJobRequest::convert(&input, "txt")).await;

    assert!(
        harness
            .wait_for_state(&job_id, JobState::Succeeded, TIMEOUT)
            .await,
        "Job should succeed"
    );

    let job = harness.orchestrator.get(&job_id).unwrap().unwrap();
    assert_eq!(job.progress, 1.0);
    assert!(job.error.is_none());
    assert!(job.started_at.is_some());
    assert!(job.finished_at.is_some());
    assert_eq!(job.plan.path_id.as_deref(), Some("md-html[html]>html-pdf[pdf]>pdf-txt"));
    assert_eq!(
        harness.invoker.invoked_capabilities(),
        vec!["md-html", "html-pdf", "pdf-txt"]
    );

    let artifacts = harness.orchestrator.get_artifacts(&job_id).unwrap();
    assert_eq!(artifacts.len(), 1);
    let artifact = &artifacts[0];
    assert_eq!(artifact.filename, "report.txt");
    assert_eq!(artifact.format, "txt");
    assert_eq!(artifact.checksum.len(), 64);
    let on_disk = std::fs::metadata(&artifact.path).expect("artifact should exist");
    assert_eq!(on_disk.len(), artifact.size_bytes);

    harness.orchestrator.stop().await;
}

#[tokio::test]
async fn test_events_are_broadcast() {
    let harness = TestHarness::new().await;
    let mut events = harness.orchestrator.subscribe();
    harness.orchestrator.start().await.unwrap();

    let input = harness.input("notes.md");
    let job_id = harness.create(CreateJobRequest::convert(&input, "html")).await;

    let mut saw_progress = false;
    let mut saw_artifact = false;
    let finished = tokio::time::timeout(TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(JobEvent::Progress { .. }) => saw_progress = true,
                Ok(JobEvent::ArtifactReady { format, .. }) => {
                    assert_eq!(format, "html");
                    saw_artifact = true;
                }
                Ok(JobEvent::StateChanged { new_state, .. }) if new_state.is_terminal() => {
                    return new_state;
                }
                Ok(_) => {}
                Err(e) => panic!("event stream closed: {}", e),
            }
        }
    })
    .await
    .expect("Job should finish");

    assert_eq!(finished, JobState::Succeeded);
    assert!(saw_progress);
    assert!(saw_artifact);
    assert_eq!(harness.state(&job_id), Some(JobState::Succeeded));

    harness.orchestrator.stop().await;
}

#[tokio::test]
async fn test_pause_and_resume_do_not_rerun_finished_steps() {
    let harness = TestHarness::new().await;
    harness
        .invoker
        .set_delay("md-html", Duration::from_millis(200));
    harness.orchestrator.start().await.unwrap();

    let input = harness.input("paper.md");
    let job_id = harness.create(CreateJobRequest::convert(&input, "txt")).await;
    assert!(
        harness
            .wait_for_state(&job_id, JobState::Running, TIMEOUT)
            .await
    );

    let job = harness
        .orchestrator
        .control(&job_id, JobAction::Pause)
        .await
        .unwrap();
    // Pause is honored at the next step boundary.
    assert_eq!(job.state, JobState::Running);

    assert!(
        harness
            .wait_for_state(&job_id, JobState::Paused, TIMEOUT)
            .await,
        "Job should pause after the first step"
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.invoker.invocation_count("md-html"), 1);
    assert_eq!(harness.invoker.invocation_count("html-pdf"), 0);
    assert_eq!(harness.state(&job_id), Some(JobState::Paused));

    harness
        .orchestrator
        .control(&job_id, JobAction::Resume)
        .await
        .unwrap();
    assert!(
        harness
            .wait_for_state(&job_id, JobState::Succeeded, TIMEOUT)
            .await
    );
    assert_eq!(
        harness.invoker.invoked_capabilities(),
        vec!["md-html", "html-pdf", "pdf-txt"]
    );

    harness.orchestrator.stop().await;
}

#[tokio::test]
async fn test_cancel_discards_partial_outputs() {
    let harness = TestHarness::new().await;
    harness
        .invoker
        .set_delay("html-pdf", Duration::from_secs(5));
    harness.orchestrator.start().await.unwrap();

    let input = harness.input("draft.md");
    let job_id = harness.create(CreateJobRequest::convert(&input, "txt")).await;
    let invoker = harness.invoker.clone();
    assert!(
        harness
            .wait_until(|| invoker.invocation_count("html-pdf") == 1, TIMEOUT)
            .await
    );

    harness
        .orchestrator
        .control(&job_id, JobAction::Cancel)
        .await
        .unwrap();
    assert!(
        harness
            .wait_for_state(&job_id, JobState::Canceled, TIMEOUT)
            .await
    );

    let job = harness.orchestrator.get(&job_id).unwrap().unwrap();
    assert!(job.error.is_none(), "Cancellation is not an error");
    assert!(job.finished_at.is_some());
    assert!(harness.orchestrator.get_artifacts(&job_id).unwrap().is_empty());
    assert!(harness.store.checkpoints(&job_id).unwrap().is_empty());
    assert!(!harness.workspace.join(&job_id).exists());

    // Terminal jobs reject further control.
    let err = harness
        .orchestrator
        .control(&job_id, JobAction::Cancel)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    harness.orchestrator.stop().await;
}

#[tokio::test]
async fn test_cancel_keeps_outputs_when_requested() {
    let harness = TestHarness::new().await;
    harness
        .invoker
        .set_delay("html-pdf", Duration::from_secs(5));
    harness.orchestrator.start().await.unwrap();

    let input = harness.input("keep.md");
    let options = JobOptions {
        keep_on_cancel: true,
        ..Default::default()
    };
    let job_id = harness
        .create(CreateJobRequest::convert(&input, "txt").with_options(options))
        .await;
    let invoker = harness.invoker.clone();
    assert!(
        harness
            .wait_until(|| invoker.invocation_count("html-pdf") == 1, TIMEOUT)
            .await
    );

    harness
        .orchestrator
        .control(&job_id, JobAction::Cancel)
        .await
        .unwrap();
    assert!(
        harness
            .wait_for_state(&job_id, JobState::Canceled, TIMEOUT)
            .await
    );

    assert!(harness.workspace.join(&job_id).exists());
    assert_eq!(harness.store.checkpoints(&job_id).unwrap().len(), 1);

    harness.orchestrator.stop().await;
}

#[tokio::test]
async fn test_cancel_queued_job_is_immediate() {
    let harness = TestHarness::with_workers(1).await;
    harness
        .invoker
        .set_delay("md-html", Duration::from_secs(5));
    harness.orchestrator.start().await.unwrap();

    let first = harness
        .create(CreateJobRequest::convert(harness.input("one.md"), "html"))
        .await;
    let second = harness
        .create(CreateJobRequest::convert(harness.input("two.md"), "html"))
        .await;
    assert!(
        harness
            .wait_for_state(&first, JobState::Running, TIMEOUT)
            .await
    );
    assert_eq!(harness.state(&second), Some(JobState::Queued));

    let job = harness
        .orchestrator
        .control(&second, JobAction::Cancel)
        .await
        .unwrap();
    assert_eq!(job.state, JobState::Canceled);

    // Pause only applies to running jobs.
    let err = harness
        .orchestrator
        .control(&second, JobAction::Pause)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    // A canceled job is never re-run; the caller has to submit a new one.
    let err = harness
        .orchestrator
        .control(&second, JobAction::Retry)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);
    let suggestion = AppError::Canceled.to_response().suggestion.unwrap();
    assert!(suggestion.starts_with("Submit the job again"));

    harness
        .orchestrator
        .control(&first, JobAction::Cancel)
        .await
        .unwrap();
    assert!(
        harness
            .wait_for_state(&first, JobState::Canceled, TIMEOUT)
            .await
    );
    assert_eq!(harness.invoker.invocation_count("md-html"), 1);

    harness.orchestrator.stop().await;
}

#[tokio::test]
async fn test_transient_failures_are_retried_up_to_the_bound() {
    let harness = TestHarness::new().await;
    harness
        .invoker
        .fail_always("html-pdf", AppError::tool("html-pdf", "renderer crashed"));
    harness.orchestrator.start().await.unwrap();

    let input = harness.input("flaky.md");
    let job_id = harness.create(CreateJobRequest::convert(&input, "txt")).await;
    assert!(
        harness
            .wait_for_state(&job_id, JobState::Failed, TIMEOUT)
            .await
    );

    let job = harness.orchestrator.get(&job_id).unwrap().unwrap();
    assert_eq!(job.retry_count, 2);
    let error = job.error.expect("failed job carries an error");
    assert_eq!(error.kind, ErrorKind::ToolError);
    assert!(error.message.contains("renderer crashed"));
    // First attempt plus two retries.
    assert_eq!(harness.invoker.invocation_count("html-pdf"), 3);
    assert_eq!(harness.invoker.invocation_count("pdf-txt"), 0);

    harness.orchestrator.stop().await;
}

#[tokio::test]
async fn test_transient_failure_recovers_on_retry() {
    let harness = TestHarness::new().await;
    harness
        .invoker
        .fail_once("html-pdf", AppError::tool("html-pdf", "busy"));
    harness.orchestrator.start().await.unwrap();

    let input = harness.input("busy.md");
    let job_id = harness.create(CreateJobRequest::convert(&input, "txt")).await;
    assert!(
        harness
            .wait_for_state(&job_id, JobState::Succeeded, TIMEOUT)
            .await
    );
    assert_eq!(harness.invoker.invocation_count("html-pdf"), 2);

    let logs = harness.orchestrator.get_logs(&job_id, None).unwrap();
    assert!(logs.iter().any(|l| l.message.contains("retrying")));

    harness.orchestrator.stop().await;
}

#[tokio::test]
async fn test_retry_of_failed_job_reuses_checkpoints() {
    let harness = TestHarness::new().await;
    // pdf-txt is not retryable, so the job fails on the first error.
    harness
        .invoker
        .fail_once("pdf-txt", AppError::tool("pdf-txt", "exit 1"));
    harness.orchestrator.start().await.unwrap();

    let input = harness.input("again.md");
    let job_id = harness.create(CreateJobRequest::convert(&input, "txt")).await;
    assert!(
        harness
            .wait_for_state(&job_id, JobState::Failed, TIMEOUT)
            .await
    );
    assert_eq!(harness.orchestrator.get(&job_id).unwrap().unwrap().retry_count, 0);

    let job = harness
        .orchestrator
        .control(&job_id, JobAction::Retry)
        .await
        .unwrap();
    assert!(matches!(job.state, JobState::Queued | JobState::Running));
    assert!(job.error.is_none());

    assert!(
        harness
            .wait_for_state(&job_id, JobState::Succeeded, TIMEOUT)
            .await
    );
    assert_eq!(harness.invoker.invocation_count("md-html"), 1);
    assert_eq!(harness.invoker.invocation_count("html-pdf"), 1);
    assert_eq!(harness.invoker.invocation_count("pdf-txt"), 2);

    harness.orchestrator.stop().await;
}

#[tokio::test]
async fn test_logs_are_ordered_and_paged_by_cursor() {
    let harness = TestHarness::new().await;
    harness.orchestrator.start().await.unwrap();

    let input = harness.input("logged.md");
    let job_id = harness.create(CreateJobRequest::convert(&input, "txt")).await;
    assert!(
        harness
            .wait_for_state(&job_id, JobState::Succeeded, TIMEOUT)
            .await
    );

    let logs = harness.orchestrator.get_logs(&job_id, None).unwrap();
    assert!(logs.len() > 5, "expected a detailed log, got {}", logs.len());
    assert!(logs.windows(2).all(|w| w[0].sequence < w[1].sequence));
    assert_eq!(logs[0].message, "Job created");

    let cursor = logs[2].sequence;
    let rest = harness.orchestrator.get_logs(&job_id, Some(cursor)).unwrap();
    assert_eq!(rest.len(), logs.len() - 3);
    assert!(rest.iter().all(|l| l.sequence > cursor));

    let last = logs.last().unwrap().sequence;
    assert!(harness
        .orchestrator
        .get_logs(&job_id, Some(last))
        .unwrap()
        .is_empty());

    harness.orchestrator.stop().await;
}

#[tokio::test]
async fn test_create_rejects_invalid_requests() {
    let harness = TestHarness::new().await;

    let mut empty = CreateJobRequest::convert("unused.md", "txt");
    empty.inputs.clear();
    let err = harness.orchestrator.create(empty).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    let missing = CreateJobRequest::convert(harness.dir.path().join("nope.md"), "txt");
    let err = harness.orchestrator.create(missing).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    let no_target = CreateJobRequest {
        inputs: vec![harness.input("a.md")],
        ..Default::default()
    };
    assert!(harness.orchestrator.create(no_target).await.is_err());

    // One unplannable input rejects the whole batch.
    let batch = CreateJobRequest::convert(harness.input("b.md"), "txt")
        .with_input(harness.input("c.wav"));
    let err = harness.orchestrator.create(batch).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    assert!(harness
        .orchestrator
        .list(&JobFilter::new())
        .unwrap()
        .is_empty());

    let err = harness
        .orchestrator
        .control("no-such-job", JobAction::Pause)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);
}

#[tokio::test]
async fn test_oversized_input_hits_resource_limit() {
    let harness = TestHarness::with_config(2, |config| config.with_max_input_bytes(64)).await;

    let big = harness.dir.path().join("big.md");
    std::fs::write(&big, vec![b'#'; 65]).unwrap();
    let err = harness
        .orchestrator
        .create(CreateJobRequest::convert(&big, "html"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceLimit);
    assert!(err.to_string().contains("64 byte limit"));

    let small = harness.dir.path().join("small.md");
    std::fs::write(&small, b"# ok").unwrap();
    assert!(harness
        .orchestrator
        .create(CreateJobRequest::convert(&small, "html"))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_job_option_tightens_input_size_limit() {
    let harness = TestHarness::new().await;

    let input = harness.dir.path().join("large.md");
    std::fs::write(&input, vec![b'a'; 1024 * 1024 + 1]).unwrap();
    let options = JobOptions {
        max_file_size_mb: Some(1),
        ..Default::default()
    };
    let err = harness
        .orchestrator
        .create(CreateJobRequest::convert(&input, "html").with_options(options))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceLimit);
    assert!(harness
        .orchestrator
        .list(&JobFilter::new())
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_multiple_inputs_create_one_job_each() {
    let harness = TestHarness::new().await;
    harness.orchestrator.start().await.unwrap();

    let request = CreateJobRequest::convert(harness.input("x.md"), "html")
        .with_input(harness.input("y.md"));
    let ids = harness.orchestrator.create(request).await.unwrap();
    assert_eq!(ids.len(), 2);

    for id in &ids {
        assert!(harness.wait_for_state(id, JobState::Succeeded, TIMEOUT).await);
    }
    let filenames: Vec<String> = ids
        .iter()
        .map(|id| harness.orchestrator.get_artifacts(id).unwrap()[0].filename.clone())
        .collect();
    assert_eq!(filenames, vec!["x.html", "y.html"]);

    harness.orchestrator.stop().await;
}

#[tokio::test]
async fn test_jobs_start_in_admission_order_within_worker_limit() {
    let harness = TestHarness::with_workers(1).await;
    harness.invoker.set_delay("md-html", Duration::from_millis(50));

    let mut ids = Vec::new();
    for name in ["first.md", "second.md", "third.md"] {
        ids.push(
            harness
                .create(CreateJobRequest::convert(harness.input(name), "html"))
                .await,
        );
    }
    harness.orchestrator.start().await.unwrap();

    let orchestrator = harness.orchestrator.clone();
    let mut max_active = 0;
    let deadline = std::time::Instant::now() + TIMEOUT;
    while std::time::Instant::now() < deadline {
        max_active = max_active.max(orchestrator.status().active_jobs);
        if ids
            .iter()
            .all(|id| harness.state(id) == Some(JobState::Succeeded))
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(max_active <= 1);

    let order: Vec<String> = harness
        .invoker
        .recorded_invocations()
        .into_iter()
        .map(|i| i.job_id)
        .collect();
    assert_eq!(order, ids);

    let status = harness.orchestrator.status();
    assert!(status.running);
    assert_eq!(status.workers, 1);
    assert_eq!(status.queued_jobs, 0);

    harness.orchestrator.stop().await;
    assert!(!harness.orchestrator.status().running);
}

#[tokio::test]
async fn test_panicking_step_fails_only_its_job() {
    let harness = TestHarness::new().await;
    harness.invoker.panic_on("md-html");
    harness.orchestrator.start().await.unwrap();

    let broken = harness
        .create(CreateJobRequest::convert(harness.input("boom.md"), "html"))
        .await;
    let healthy = harness
        .create(CreateJobRequest::convert(harness.input("fine.pdf"), "txt"))
        .await;

    assert!(
        harness
            .wait_for_state(&broken, JobState::Failed, TIMEOUT)
            .await
    );
    assert!(
        harness
            .wait_for_state(&healthy, JobState::Succeeded, TIMEOUT)
            .await
    );
    let job = harness.orchestrator.get(&broken).unwrap().unwrap();
    assert_eq!(job.error.unwrap().kind, ErrorKind::Internal);

    // The worker survives the panic.
    let after = harness
        .create(CreateJobRequest::convert(harness.input("later.pdf"), "txt"))
        .await;
    assert!(
        harness
            .wait_for_state(&after, JobState::Succeeded, TIMEOUT)
            .await
    );

    harness.orchestrator.stop().await;
}

#[tokio::test]
async fn test_unfinished_jobs_resume_after_restart() {
    let harness = TestHarness::new().await;
    harness
        .invoker
        .set_delay("html-pdf", Duration::from_millis(500));
    harness.orchestrator.start().await.unwrap();

    let input = harness.input("restart.md");
    let job_id = harness.create(CreateJobRequest::convert(&input, "txt")).await;
    let invoker = harness.invoker.clone();
    assert!(
        harness
            .wait_until(|| invoker.invocation_count("html-pdf") == 1, TIMEOUT)
            .await
    );

    harness.orchestrator.stop().await;
    let state = harness.state(&job_id).unwrap();
    assert!(!state.is_terminal(), "shutdown must not finish the job");

    harness.invoker.set_delay("html-pdf", Duration::from_millis(10));
    harness.orchestrator.start().await.unwrap();
    assert!(
        harness
            .wait_for_state(&job_id, JobState::Succeeded, TIMEOUT)
            .await
    );
    // The first step was checkpointed before the shutdown.
    assert_eq!(harness.invoker.invocation_count("md-html"), 1);
    assert_eq!(harness.invoker.invocation_count("html-pdf"), 2);

    let logs = harness.orchestrator.get_logs(&job_id, None).unwrap();
    assert!(logs.iter().any(|l| l.message.contains("after restart")));

    harness.orchestrator.stop().await;
}

#[tokio::test]
async fn test_recipe_job_runs_its_graph() {
    let harness = TestHarness::new().await;
    let recipe = Recipe::new("to-html", "Markdown to HTML")
        .with_node(RecipeNode::new("in", NodeType::Input))
        .with_node(
            RecipeNode::new("convert", NodeType::Converter).with_config("capability", "md-html"),
        )
        .with_node(RecipeNode::new("out", NodeType::Output))
        .with_edge(RecipeEdge::new("in", "convert"))
        .with_edge(RecipeEdge::new("convert", "out"));
    harness
        .recipes
        .save(recipe, &harness.prober.snapshot())
        .unwrap();
    harness.orchestrator.start().await.unwrap();

    let input = harness.input("recipe.md");
    let job_id = harness
        .create(CreateJobRequest::with_recipe(&input, "to-html"))
        .await;
    assert!(
        harness
            .wait_for_state(&job_id, JobState::Succeeded, TIMEOUT)
            .await
    );

    let job = harness.orchestrator.get(&job_id).unwrap().unwrap();
    assert_eq!(job.target_format, "html");
    assert_eq!(job.recipe_id.as_deref(), Some("to-html"));
    let artifacts = harness.orchestrator.get_artifacts(&job_id).unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0].format, "html");

    let err = harness
        .orchestrator
        .create(CreateJobRequest::with_recipe(&input, "missing"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    harness.orchestrator.stop().await;
}

#[tokio::test]
async fn test_recipe_input_node_converts_source_first() {
    let harness = TestHarness::new().await;
    let recipe = Recipe::new("html-in", "HTML to PDF")
        .with_node(RecipeNode::new("in", NodeType::Input).with_config("format", "html"))
        .with_node(
            RecipeNode::new("render", NodeType::Converter).with_config("capability", "html-pdf"),
        )
        .with_node(RecipeNode::new("out", NodeType::Output))
        .with_edge(RecipeEdge::new("in", "render"))
        .with_edge(RecipeEdge::new("render", "out"));
    harness
        .recipes
        .save(recipe, &harness.prober.snapshot())
        .unwrap();
    harness.orchestrator.start().await.unwrap();

    let input = harness.input("notes.md");
    let job_id = harness
        .create(CreateJobRequest::with_recipe(&input, "html-in"))
        .await;
    assert!(
        harness
            .wait_for_state(&job_id, JobState::Succeeded, TIMEOUT)
            .await
    );

    let steps: Vec<String> = harness
        .invoker
        .recorded_invocations()
        .into_iter()
        .filter(|i| i.job_id == job_id)
        .map(|i| i.capability_id)
        .collect();
    assert_eq!(steps, vec!["md-html", "html-pdf"]);
    let artifacts = harness.orchestrator.get_artifacts(&job_id).unwrap();
    assert_eq!(artifacts[0].format, "pdf");

    harness.orchestrator.stop().await;
}
