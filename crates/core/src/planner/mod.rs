//! Path planner: finds and ranks multi-step conversion routes.

mod config;
mod search;
mod types;

pub use config::{PlannerConfig, QualityCombination};
pub use search::Planner;
pub use types::{ConversionPath, ConversionStep, ConversionTarget};
