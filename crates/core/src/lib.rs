pub mod capability;
pub mod config;
pub mod detect;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod planner;
pub mod probe;
pub mod recipe;
pub mod testing;

pub use capability::{Capability, FormatSpec, Registry};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, DatabaseConfig,
    RegistryConfig, ServerConfig,
};
pub use detect::{detect, FileDetection};
pub use error::{AppError, ErrorKind, ErrorResponse, Result};
pub use orchestrator::{
    CreateJobRequest, Job, JobAction, JobEvent, JobOrchestrator, JobState, JobStore,
    OrchestratorConfig, OrchestratorDeps, ProcessInvoker, SqliteJobStore, ToolInvoker,
};
pub use planner::{ConversionPath, Planner, PlannerConfig};
pub use probe::{AvailabilitySnapshot, Prober, ProberConfig, SystemToolResolver, ToolResolver};
pub use recipe::{ExecutionPlan, Recipe, RecipeBook, RecipeValidator};
