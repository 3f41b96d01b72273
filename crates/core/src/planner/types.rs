//! Planner output shapes.

use serde::{Deserialize, Serialize};

/// One capability applied from one format to another.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionStep {
    pub capability_id: String,
    pub capability_name: String,
    pub from_format: String,
    pub to_format: String,
    pub quality: f32,
    pub estimated_ms: u64,
    pub available: bool,
}

/// An ordered chain of steps from a source format to a target format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionPath {
    /// Capability ids joined by `>`, intermediate formats in brackets.
    pub id: String,
    pub steps: Vec<ConversionStep>,
    pub total_quality: f32,
    pub estimated_time_ms: u64,
    /// Sum of edge weights.
    pub cost: f32,
    pub risks: Vec<String>,
    pub available: bool,
    #[serde(default)]
    pub missing_requirements: Vec<String>,
    #[serde(default)]
    pub recommended: bool,
}

impl ConversionPath {
    pub fn source_format(&self) -> Option<&str> {
        self.steps.first().map(|s| s.from_format.as_str())
    }

    pub fn target_format(&self) -> Option<&str> {
        self.steps.last().map(|s| s.to_format.as_str())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// A requested output format and every ranked path to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionTarget {
    pub format: String,
    pub mime_type: String,
    /// Ranked best first.
    pub paths: Vec<ConversionPath>,
    /// Whether one of the paths is recommended.
    pub recommended: bool,
    pub available: bool,
    pub missing_requirements: Vec<String>,
}

impl ConversionTarget {
    pub fn recommended_path(&self) -> Option<&ConversionPath> {
        self.paths.iter().find(|p| p.recommended)
    }

    pub fn best_path(&self) -> Option<&ConversionPath> {
        self.paths.first()
    }
}
