//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that creates an in-process server
//! with a mock tool invoker and a fake tool resolver, so jobs run without any
//! conversion tool installed on the host.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use f2f_core::{
    orchestrator::RetryConfig,
    testing::{FakeToolResolver, MockInvoker},
    Config, JobOrchestrator, JobStore, OrchestratorConfig, OrchestratorDeps, Planner,
    PlannerConfig, Prober, ProberConfig, RecipeBook, RecipeValidator, SqliteJobStore,
};

/// Re-export fixtures for test convenience
pub use f2f_core::testing::fixtures;

/// Test fixture for API testing with mock dependencies.
///
/// The registry holds `md -> html -> pdf -> txt`, all available.
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Mock invoker - control tool outcomes
    pub invoker: Arc<MockInvoker>,
    /// Orchestrator behind the router
    pub orchestrator: JobOrchestrator,
    /// Temporary directory for the database, workspace and inputs
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a new test fixture with a running orchestrator.
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        let workspace = temp_dir.path().join("work");

        let registry = fixtures::registry(vec![
            fixtures::capability("md-html", "md", "html", 0.95),
            fixtures::capability("html-pdf", "html", "pdf", 0.9),
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

        let store: Arc<dyn JobStore> =
            Arc::new(SqliteJobStore::new(&db_path).expect("Failed to create job store"));
        let invoker = Arc::new(MockInvoker::new().with_default_delay(Duration::from_millis(20)));

        let mut orchestrator_config = OrchestratorConfig::default()
            .with_workspace_dir(&workspace)
            .with_max_running_jobs(2)
            .with_retry(RetryConfig {
                max_attempts: 1,
                initial_delay_ms: 10,
                max_delay_ms: 20,
                backoff_multiplier: 2.0,
            });
        orchestrator_config.poll_interval_ms = 20;

        let orchestrator = JobOrchestrator::new(
            orchestrator_config.clone(),
            OrchestratorDeps {
                registry: registry.clone(),
                prober: prober.clone(),
                planner: planner.clone(),
                recipes: recipes.clone(),
                store,
                invoker: invoker.clone(),
            },
        );
        orchestrator
            .start()
            .await
            .expect("Failed to start orchestrator");

        let mut config = Config::default();
        config.database.path = db_path;
        config.orchestrator = orchestrator_config;

        let state = Arc::new(f2f_server::state::AppState::new(
            config,
            registry,
            prober,
            planner,
            recipes,
            orchestrator.clone(),
        ));

        let router = f2f_server::api::create_router(state);

        Self {
            router,
            invoker,
            orchestrator,
            temp_dir,
        }
    }

    /// Write an input file into the fixture directory.
    pub fn input(&self, name: &str) -> PathBuf {
        fixtures::input_file(self.temp_dir.path(), name)
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Poll a job until it reaches `state` or `timeout` elapses.
    pub async fn wait_for_job_state(&self, job_id: &str, state: &str, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            let response = self.get(&format!("/api/v1/jobs/{}", job_id)).await;
            if response.body["state"] == state {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}

/// Helper to assert a JSON path equals expected value.
#[macro_export]
macro_rules! assert_json_path {
    ($json:expr, $path:expr, $expected:expr) => {
        let actual = &$json[$path];
        assert_eq!(
            actual, &$expected,
            "Path '{}' expected {:?}, got {:?}",
            $path, $expected, actual
        );
    };
}
