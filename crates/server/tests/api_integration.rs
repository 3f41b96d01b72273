//! API integration tests.
//!
//! These tests run the full router in-process against a real orchestrator,
//! with tool invocations mocked out.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use f2f_core::AppError;
use serde_json::json;

use common::TestFixture;

const TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/health").await;

    assert_status!(response, StatusCode::OK);
    assert_json_path!(response.body, "status", "ok");
    assert_json_path!(response.body, "capabilities_registered", 3);
    assert_json_path!(response.body, "capabilities_available", 3);
    assert_json_path!(response.body, "orchestrator_running", true);
}

#[tokio::test]
async fn test_health_check_returns_tool_report() {
    let fixture = TestFixture::new().await;
    let response = fixture.post("/api/v1/health-check", json!({})).await;

    assert_status!(response, StatusCode::OK);
    assert!(response.body["tools"].is_object());
    assert!(response.body["timestamp"].is_string());
}

#[tokio::test]
async fn test_metrics_endpoint_is_text() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/metrics").await;
    assert_status!(response, StatusCode::OK);
}

// =============================================================================
// Capabilities and planning
// =============================================================================

#[tokio::test]
async fn test_list_capabilities() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/capabilities").await;

    assert_status!(response, StatusCode::OK);
    let capabilities = response.body.as_array().expect("array of capabilities");
    assert_eq!(capabilities.len(), 3);
    assert!(capabilities.iter().all(|c| c["available"] == true));
}

#[tokio::test]
async fn test_get_capability_and_unknown() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/capabilities/md-html").await;
    assert_status!(response, StatusCode::OK);
    assert_json_path!(response.body, "id", "md-html");
    assert_json_path!(response.body, "available", true);

    let response = fixture.get("/api/v1/capabilities/nope").await;
    assert_status!(response, StatusCode::NOT_FOUND);
    assert!(response.body["message"]
        .as_str()
        .unwrap()
        .contains("nope"));
}

#[tokio::test]
async fn test_plan_from_source_format() {
    let fixture = TestFixture::new().await;
    let response = fixture
        .post(
            "/api/v1/plan",
            json!({ "source_format": "md", "targets": ["pdf"] }),
        )
        .await;

    assert_status!(response, StatusCode::OK);
    let targets = response.body["targets"].as_array().unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0]["format"], "pdf");
    assert_eq!(targets[0]["available"], true);
    let path = &targets[0]["paths"][0];
    assert_eq!(path["id"], "md-html[html]>html-pdf");
}

#[tokio::test]
async fn test_plan_from_input_path() {
    let fixture = TestFixture::new().await;
    let input = fixture.input("notes.md");
    let response = fixture
        .post("/api/v1/plan", json!({ "input": input }))
        .await;

    assert_status!(response, StatusCode::OK);
    let formats: Vec<&str> = response.body["targets"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["format"].as_str())
        .collect();
    assert!(formats.contains(&"html"));
    assert!(formats.contains(&"txt"));
}

#[tokio::test]
async fn test_detect_reads_file_content() {
    let fixture = TestFixture::new().await;
    let path = fixture.temp_dir.path().join("scan.bin");
    std::fs::write(
        &path,
        b"%PDF-1.4\n1 0 obj << /Type /XObject /Subtype /Image >> endobj\n",
    )
    .unwrap();

    let response = fixture.post("/api/v1/detect", json!({ "path": path })).await;
    assert_status!(response, StatusCode::OK);
    assert_json_path!(response.body, "format", "pdf");
    assert_json_path!(response.body, "mime_type", "application/pdf");
    assert_json_path!(response.body, "detected_by", "content");
    assert_json_path!(response.body, "is_scanned_pdf", true);

    let notes = fixture.input("notes.md");
    let response = fixture.post("/api/v1/detect", json!({ "path": notes })).await;
    assert_status!(response, StatusCode::OK);
    assert_json_path!(response.body, "format", "md");
    assert_json_path!(response.body, "detected_by", "extension");

    let response = fixture
        .post("/api/v1/detect", json!({ "path": "/nonexistent/file.md" }))
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversized_input_is_rejected() {
    let fixture = TestFixture::new().await;
    let input = fixture.temp_dir.path().join("huge.md");
    std::fs::write(&input, vec![b'x'; 1024 * 1024 + 10]).unwrap();

    let response = fixture
        .post(
            "/api/v1/jobs",
            json!({
                "inputs": [input],
                "target_format": "html",
                "options": { "max_file_size_mb": 1 }
            }),
        )
        .await;
    assert_status!(response, StatusCode::UNPROCESSABLE_ENTITY);
    assert_json_path!(response.body, "kind", "RESOURCE_LIMIT");
}

#[tokio::test]
async fn test_plan_without_source_is_rejected() {
    let fixture = TestFixture::new().await;
    let response = fixture.post("/api/v1/plan", json!({ "targets": ["pdf"] })).await;

    assert_status!(response, StatusCode::BAD_REQUEST);
    assert_json_path!(response.body, "kind", "VALIDATION_ERROR");
}

// =============================================================================
// Jobs
// =============================================================================

#[tokio::test]
async fn test_create_job_runs_to_success() {
    let fixture = TestFixture::new().await;
    let input = fixture.input("report.md");

    let response = fixture
        .post(
            "/api/v1/jobs",
            json!({ "inputs": [input], "target_format": "pdf" }),
        )
        .await;
    assert_status!(response, StatusCode::CREATED);
    let job_id = response.body["job_ids"][0].as_str().unwrap().to_string();

    assert!(
        fixture
            .wait_for_job_state(&job_id, "succeeded", TIMEOUT)
            .await
    );

    let job = fixture.get(&format!("/api/v1/jobs/{}", job_id)).await;
    assert_status!(job, StatusCode::OK);
    assert_json_path!(job.body, "target_format", "pdf");
    assert_json_path!(job.body, "progress", 1.0);

    let artifacts = fixture
        .get(&format!("/api/v1/jobs/{}/artifacts", job_id))
        .await;
    assert_status!(artifacts, StatusCode::OK);
    let artifacts = artifacts.body.as_array().unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0]["format"], "pdf");
    assert_eq!(artifacts[0]["checksum"].as_str().unwrap().len(), 64);

    assert_eq!(
        fixture.invoker.invoked_capabilities(),
        vec!["md-html".to_string(), "html-pdf".to_string()]
    );
}

#[tokio::test]
async fn test_create_one_job_per_input() {
    let fixture = TestFixture::new().await;
    let first = fixture.input("a.md");
    let second = fixture.input("b.md");

    let response = fixture
        .post(
            "/api/v1/jobs",
            json!({ "inputs": [first, second], "target_format": "html" }),
        )
        .await;
    assert_status!(response, StatusCode::CREATED);
    assert_eq!(response.body["job_ids"].as_array().unwrap().len(), 2);

    let list = fixture.get("/api/v1/jobs?limit=10").await;
    assert_status!(list, StatusCode::OK);
    assert_eq!(list.body["jobs"].as_array().unwrap().len(), 2);
    assert_json_path!(list.body, "limit", 10);
}

#[tokio::test]
async fn test_create_job_validation_errors() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/v1/jobs",
            json!({ "inputs": ["/nonexistent/file.md"], "target_format": "pdf" }),
        )
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);
    assert_json_path!(response.body, "kind", "VALIDATION_ERROR");
    assert!(response.body["suggestion"].is_string());

    let input = fixture.input("doc.md");
    let response = fixture
        .post("/api/v1/jobs", json!({ "inputs": [input] }))
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);

    let response = fixture
        .post(
            "/api/v1/jobs",
            json!({ "inputs": [input], "target_format": "mp3" }),
        )
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_json_is_rejected() {
    let fixture = TestFixture::new().await;
    let response = fixture.post_raw("/api/v1/jobs", "{not json").await;
    assert!(response.status.is_client_error());
}

#[tokio::test]
async fn test_list_jobs_rejects_unknown_state() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/v1/jobs?state=sleeping").await;
    assert_status!(response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let fixture = TestFixture::new().await;

    for path in [
        "/api/v1/jobs/missing",
        "/api/v1/jobs/missing/artifacts",
        "/api/v1/jobs/missing/logs",
    ] {
        let response = fixture.get(path).await;
        assert_status!(response, StatusCode::NOT_FOUND);
    }

    let response = fixture
        .post("/api/v1/jobs/missing/control", json!({ "action": "cancel" }))
        .await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_running_job() {
    let fixture = TestFixture::new().await;
    fixture
        .invoker
        .set_delay("md-html", Duration::from_millis(500));
    let input = fixture.input("slow.md");

    let response = fixture
        .post(
            "/api/v1/jobs",
            json!({ "inputs": [input], "target_format": "html" }),
        )
        .await;
    let job_id = response.body["job_ids"][0].as_str().unwrap().to_string();
    assert!(fixture.wait_for_job_state(&job_id, "running", TIMEOUT).await);

    let response = fixture
        .post(
            &format!("/api/v1/jobs/{}/control", job_id),
            json!({ "action": "cancel" }),
        )
        .await;
    assert_status!(response, StatusCode::OK);
    assert!(fixture.wait_for_job_state(&job_id, "canceled", TIMEOUT).await);

    // Terminal jobs cannot be canceled again
    let response = fixture
        .post(
            &format!("/api/v1/jobs/{}/control", job_id),
            json!({ "action": "cancel" }),
        )
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);

    let artifacts = fixture
        .get(&format!("/api/v1/jobs/{}/artifacts", job_id))
        .await;
    assert_eq!(artifacts.body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_failed_job_can_be_retried() {
    let fixture = TestFixture::new().await;
    fixture
        .invoker
        .fail_once("md-html", AppError::tool("pandoc", "exit status 1"));
    let input = fixture.input("flaky.md");

    let response = fixture
        .post(
            "/api/v1/jobs",
            json!({ "inputs": [input], "target_format": "html" }),
        )
        .await;
    let job_id = response.body["job_ids"][0].as_str().unwrap().to_string();
    assert!(fixture.wait_for_job_state(&job_id, "failed", TIMEOUT).await);

    let job = fixture.get(&format!("/api/v1/jobs/{}", job_id)).await;
    assert_eq!(job.body["error"]["kind"], "TOOL_ERROR");

    let response = fixture
        .post(
            &format!("/api/v1/jobs/{}/control", job_id),
            json!({ "action": "retry" }),
        )
        .await;
    assert_status!(response, StatusCode::OK);
    assert!(
        fixture
            .wait_for_job_state(&job_id, "succeeded", TIMEOUT)
            .await
    );
}

#[tokio::test]
async fn test_job_logs_with_cursor() {
    let fixture = TestFixture::new().await;
    let input = fixture.input("logged.md");

    let response = fixture
        .post(
            "/api/v1/jobs",
            json!({ "inputs": [input], "target_format": "html" }),
        )
        .await;
    let job_id = response.body["job_ids"][0].as_str().unwrap().to_string();
    assert!(
        fixture
            .wait_for_job_state(&job_id, "succeeded", TIMEOUT)
            .await
    );

    // The closing entry is written right after the state change
    let start = std::time::Instant::now();
    let logs = loop {
        let logs = fixture.get(&format!("/api/v1/jobs/{}/logs", job_id)).await;
        assert_status!(logs, StatusCode::OK);
        let done = logs.body["entries"]
            .as_array()
            .unwrap()
            .iter()
            .any(|e| e["message"] == "Job succeeded");
        if done || start.elapsed() > TIMEOUT {
            break logs;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    let entries = logs.body["entries"].as_array().unwrap();
    assert_eq!(entries[0]["message"], "Job created");
    assert_eq!(entries.last().unwrap()["message"], "Job succeeded");
    let cursor = logs.body["next_cursor"].as_u64().unwrap();
    assert_eq!(cursor, entries.last().unwrap()["sequence"].as_u64().unwrap());

    let later = fixture
        .get(&format!("/api/v1/jobs/{}/logs?cursor={}", job_id, cursor))
        .await;
    assert_status!(later, StatusCode::OK);
    assert_eq!(later.body["entries"].as_array().unwrap().len(), 0);
    assert_eq!(later.body["next_cursor"].as_u64().unwrap(), cursor);
}

// =============================================================================
// Recipes
// =============================================================================

fn markdown_to_pdf_recipe() -> serde_json::Value {
    json!({
        "id": "md-to-pdf",
        "name": "Markdown to PDF",
        "nodes": [
            { "id": "in", "node_type": "input", "config": { "format": "md" } },
            { "id": "convert", "node_type": "converter", "config": { "capability": "md-html" } },
            { "id": "out", "node_type": "output", "config": { "output_format": "pdf" } }
        ],
        "edges": [
            { "from": "in", "to": "convert" },
            { "from": "convert", "to": "out" }
        ]
    })
}

#[tokio::test]
async fn test_validate_recipe_resolves_bridges() {
    let fixture = TestFixture::new().await;
    let response = fixture
        .post(
            "/api/v1/recipes/validate",
            json!({ "recipe": markdown_to_pdf_recipe() }),
        )
        .await;

    assert_status!(response, StatusCode::OK);
    assert_json_path!(response.body, "recipe_id", "md-to-pdf");
    assert_eq!(response.body["order"], json!(["in", "convert", "out"]));
}

#[tokio::test]
async fn test_validate_recipe_rejects_cycles() {
    let fixture = TestFixture::new().await;
    let recipe = json!({
        "id": "loop",
        "name": "Loop",
        "nodes": [
            { "id": "a", "node_type": "converter", "config": { "capability": "md-html" } },
            { "id": "b", "node_type": "converter", "config": { "capability": "html-pdf" } }
        ],
        "edges": [
            { "from": "a", "to": "b" },
            { "from": "b", "to": "a" }
        ]
    });
    let response = fixture
        .post("/api/v1/recipes/validate", json!({ "recipe": recipe }))
        .await;

    assert_status!(response, StatusCode::BAD_REQUEST);
    assert_json_path!(response.body, "kind", "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_recipe_crud_and_job() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post("/api/v1/recipes", markdown_to_pdf_recipe())
        .await;
    assert_status!(response, StatusCode::CREATED);

    let list = fixture.get("/api/v1/recipes").await;
    assert_eq!(list.body.as_array().unwrap().len(), 1);

    let recipe = fixture.get("/api/v1/recipes/md-to-pdf").await;
    assert_status!(recipe, StatusCode::OK);
    assert_json_path!(recipe.body, "name", "Markdown to PDF");

    let input = fixture.input("recipe.md");
    let response = fixture
        .post(
            "/api/v1/jobs",
            json!({ "inputs": [input], "recipe_id": "md-to-pdf" }),
        )
        .await;
    assert_status!(response, StatusCode::CREATED);
    let job_id = response.body["job_ids"][0].as_str().unwrap().to_string();
    assert!(
        fixture
            .wait_for_job_state(&job_id, "succeeded", TIMEOUT)
            .await
    );

    let response = fixture.delete("/api/v1/recipes/md-to-pdf").await;
    assert_status!(response, StatusCode::NO_CONTENT);
    let response = fixture.get("/api/v1/recipes/md-to-pdf").await;
    assert_status!(response, StatusCode::NOT_FOUND);
}
