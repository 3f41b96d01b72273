//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Prober (probe runs, available capabilities)
//! - Planner (plan requests)
//! - Orchestrator (job lifecycle, step durations, retries)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts};

// =============================================================================
// Prober / Planner
// =============================================================================

/// Capabilities usable on this host as of the last probe.
pub static CAPABILITIES_AVAILABLE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "f2f_capabilities_available",
        "Capabilities available as of the last probe",
    )
    .expect("valid metric definition")
});

/// Probe runs.
pub static PROBES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("f2f_probes_total", "Total capability probes").expect("valid metric definition")
});

/// Plan requests.
pub static PLANS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("f2f_plans_total", "Total conversion plan requests")
        .expect("valid metric definition")
});

// =============================================================================
// Orchestrator
// =============================================================================

/// Jobs accepted by create.
pub static JOBS_CREATED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("f2f_jobs_created_total", "Total jobs created").expect("valid metric definition")
});

/// Jobs reaching a terminal state, by state.
pub static JOBS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("f2f_jobs_finished_total", "Total jobs finished"),
        &["state"], // "succeeded", "failed", "canceled"
    )
    .expect("valid metric definition")
});

/// Jobs currently occupying a worker.
pub static JOBS_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("f2f_jobs_running", "Jobs currently held by a worker")
        .expect("valid metric definition")
});

/// Duration of one capability invocation.
pub static STEP_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "f2f_step_duration_seconds",
            "Duration of a single conversion step",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0]),
        &["capability"],
    )
    .expect("valid metric definition")
});

/// Step retries after transient failures.
pub static STEP_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("f2f_step_retries_total", "Total step retries")
        .expect("valid metric definition")
});

/// Returns all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(CAPABILITIES_AVAILABLE.clone()),
        Box::new(PROBES_TOTAL.clone()),
        Box::new(PLANS_TOTAL.clone()),
        Box::new(JOBS_CREATED.clone()),
        Box::new(JOBS_FINISHED.clone()),
        Box::new(JOBS_RUNNING.clone()),
        Box::new(STEP_DURATION.clone()),
        Box::new(STEP_RETRIES.clone()),
    ]
}
