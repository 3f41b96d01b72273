//! Planner configuration.

use serde::{Deserialize, Serialize};

/// How per-step qualities combine into a path quality.
///
/// Both rules never exceed the lowest step quality.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QualityCombination {
    /// Path quality is the worst step quality.
    #[default]
    Min,
    /// Path quality is the product of step qualities.
    Product,
}

impl QualityCombination {
    /// Folds one more step quality into an accumulated path quality.
    pub fn combine(self, acc: f32, step: f32) -> f32 {
        match self {
            Self::Min => acc.min(step),
            Self::Product => acc * step,
        }
    }
}

/// Configuration for the path planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Maximum number of steps in a path.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// How many ranked paths are kept per target.
    #[serde(default = "default_max_paths")]
    pub max_paths_per_target: usize,

    #[serde(default)]
    pub quality_combination: QualityCombination,

    /// Paths whose quality falls below this are dropped.
    #[serde(default)]
    pub min_quality: f32,

    /// Estimated duration of a step with speed 1.0.
    #[serde(default = "default_base_step_ms")]
    pub base_step_ms: u64,
}

fn default_max_depth() -> usize {
    4
}

fn default_max_paths() -> usize {
    5
}

fn default_base_step_ms() -> u64 {
    2000
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_paths_per_target: default_max_paths(),
            quality_combination: QualityCombination::default(),
            min_quality: 0.0,
            base_step_ms: default_base_step_ms(),
        }
    }
}

impl PlannerConfig {
    pub fn with_quality_combination(mut self, combination: QualityCombination) -> Self {
        self.quality_combination = combination;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_paths(mut self, max_paths: usize) -> Self {
        self.max_paths_per_target = max_paths;
        self
    }

    pub fn with_min_quality(mut self, min_quality: f32) -> Self {
        self.min_quality = min_quality;
        self
    }
}
