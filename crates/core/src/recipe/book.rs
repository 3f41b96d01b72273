//! In-memory recipe storage.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use super::types::{ExecutionPlan, Recipe};
use super::validator::RecipeValidator;
use crate::error::Result;
use crate::probe::AvailabilitySnapshot;

/// Recipes by id. Only valid recipes are stored.
pub struct RecipeBook {
    validator: Arc<RecipeValidator>,
    recipes: RwLock<BTreeMap<String, Recipe>>,
}

impl RecipeBook {
    pub fn new(validator: Arc<RecipeValidator>) -> Self {
        Self {
            validator,
            recipes: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn validator(&self) -> &RecipeValidator {
        &self.validator
    }

    /// Validates and stores a recipe, replacing any previous version.
    ///
    /// `created_at` of an existing recipe is kept; `updated_at` is stamped.
    pub fn save(&self, mut recipe: Recipe, snapshot: &AvailabilitySnapshot) -> Result<Recipe> {
        self.validator.validate(&recipe, snapshot)?;

        let mut recipes = self.recipes.write();
        if let Some(existing) = recipes.get(&recipe.id) {
            recipe.created_at = existing.created_at;
        }
        recipe.updated_at = Utc::now();
        info!(recipe = %recipe.id, nodes = recipe.nodes.len(), "Saved recipe");
        recipes.insert(recipe.id.clone(), recipe.clone());
        Ok(recipe)
    }

    pub fn get(&self, id: &str) -> Option<Recipe> {
        self.recipes.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Recipe> {
        self.recipes.read().values().cloned().collect()
    }

    pub fn remove(&self, id: &str) -> Option<Recipe> {
        self.recipes.write().remove(id)
    }

    /// Validates a recipe without storing it.
    pub fn check(&self, recipe: &Recipe, snapshot: &AvailabilitySnapshot) -> Result<ExecutionPlan> {
        self.validator.validate(recipe, snapshot)
    }
}
