//! Recipe API handlers.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use f2f_core::{ExecutionPlan, Recipe};
use serde::Deserialize;
use std::sync::Arc;

use super::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Request body for validating a recipe without saving it
#[derive(Debug, Deserialize)]
pub struct ValidateRecipeBody {
    pub recipe: Recipe,
    /// Format of the file the recipe would run on, if known
    pub source_format: Option<String>,
}

/// List saved recipes
pub async fn list_recipes(State(state): State<Arc<AppState>>) -> Json<Vec<Recipe>> {
    Json(state.recipes().list())
}

/// Validate and save a recipe
pub async fn save_recipe(
    State(state): State<Arc<AppState>>,
    Json(recipe): Json<Recipe>,
) -> ApiResult<(StatusCode, Json<Recipe>)> {
    let snapshot = state.prober().snapshot();
    let saved = state.recipes().save(recipe, &snapshot)?;
    Ok((StatusCode::CREATED, Json(saved)))
}

/// Get a saved recipe
pub async fn get_recipe(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Recipe>> {
    state
        .recipes()
        .get(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("recipe", &id))
}

/// Delete a saved recipe
pub async fn delete_recipe(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .recipes()
        .remove(&id)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or_else(|| ApiError::not_found("recipe", &id))
}

/// Validate a recipe and return its execution plan
pub async fn validate_recipe(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ValidateRecipeBody>,
) -> ApiResult<Json<ExecutionPlan>> {
    let snapshot = state.prober().snapshot();
    let plan = match body.source_format.as_deref() {
        Some(source) => state.recipes().validator().validate_for_source(
            &body.recipe,
            &snapshot,
            Some(source),
        )?,
        None => state.recipes().check(&body.recipe, &snapshot)?,
    };
    Ok(Json(plan))
}
