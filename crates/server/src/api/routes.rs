use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::{capabilities, handlers, jobs, middleware::metrics_middleware, recipes, ws};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let enable_cors = state.config().server.enable_cors;

    // API routes
    let api_routes = Router::new()
        // Health, probing and metrics
        .route("/health", get(handlers::health))
        .route("/health-check", post(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        // Capabilities and planning
        .route("/capabilities", get(capabilities::list_capabilities))
        .route("/capabilities/{id}", get(capabilities::get_capability))
        .route("/plan", post(capabilities::plan))
        .route("/detect", post(capabilities::detect))
        // Jobs
        .route("/jobs", post(jobs::create_jobs).get(jobs::list_jobs))
        .route("/jobs/{id}", get(jobs::get_job))
        .route("/jobs/{id}/control", post(jobs::control_job))
        .route("/jobs/{id}/artifacts", get(jobs::get_artifacts))
        .route("/jobs/{id}/logs", get(jobs::get_logs))
        // Recipes
        .route("/recipes", get(recipes::list_recipes).post(recipes::save_recipe))
        .route("/recipes/validate", post(recipes::validate_recipe))
        .route(
            "/recipes/{id}",
            get(recipes::get_recipe).delete(recipes::delete_recipe),
        )
        // Event stream
        .route("/ws", get(ws::ws_handler))
        .layer(middleware::from_fn(metrics_middleware))
        .with_state(state);

    let mut router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }
    router
}
