use std::sync::Arc;
use f2f_core::{Config, JobOrchestrator, Planner, Prober, RecipeBook, Registry};

/// Shared application state
pub struct AppState {
    config: Config,
    registry: Arc<Registry>,
    prober: Arc<Prober>,
    planner: Arc<Planner>,
    recipes: Arc<RecipeBook>,
    orchestrator: JobOrchestrator,
}

impl AppState {
    pub fn new(
        config: Config,
        registry: Arc<Registry>,
        prober: Arc<Prober>,
        planner: Arc<Planner>,
        recipes: Arc<RecipeBook>,
        orchestrator: JobOrchestrator,
    ) -> Self {
        Self {
            config,
            registry,
            prober,
            planner,
            recipes,
            orchestrator,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn prober(&self) -> &Prober {
        &self.prober
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    pub fn recipes(&self) -> &RecipeBook {
        &self.recipes
    }

    pub fn orchestrator(&self) -> &JobOrchestrator {
        &self.orchestrator
    }
}
