use super::{types::Config, ConfigError};

/// Deepest path the planner may be configured to search.
const MAX_PLANNER_DEPTH: usize = 8;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Planner depth lies in 1..=8 and at least one path is kept per target
/// - Planner minimum quality lies in [0, 1]
/// - Orchestrator runs at least one job at a time
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    let planner = &config.planner;
    if planner.max_depth == 0 || planner.max_depth > MAX_PLANNER_DEPTH {
        return Err(ConfigError::ValidationError(format!(
            "planner.max_depth must be between 1 and {}",
            MAX_PLANNER_DEPTH
        )));
    }
    if planner.max_paths_per_target == 0 {
        return Err(ConfigError::ValidationError(
            "planner.max_paths_per_target cannot be 0".to_string(),
        ));
    }
    if !(0.0..=1.0).contains(&planner.min_quality) {
        return Err(ConfigError::ValidationError(
            "planner.min_quality must lie in [0, 1]".to_string(),
        ));
    }

    if config.orchestrator.max_running_jobs == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.max_running_jobs cannot be 0".to_string(),
        ));
    }
    if config.orchestrator.max_input_bytes == 0 {
        return Err(ConfigError::ValidationError(
            "orchestrator.max_input_bytes cannot be 0".to_string(),
        ));
    }

    Ok(())
}
