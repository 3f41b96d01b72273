//! Health and availability records produced by probing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Result of resolving one external tool on the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolHealth {
    pub name: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolHealth {
    pub fn found(name: impl Into<String>, path: PathBuf, version: Option<String>) -> Self {
        Self {
            name: name.into(),
            available: true,
            version,
            path: Some(path),
            error: None,
        }
    }

    pub fn missing(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            available: false,
            version: None,
            path: None,
            error: Some(error.into()),
        }
    }
}

/// Tool-by-tool health of the host at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub tools: BTreeMap<String, ToolHealth>,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    pub fn available_tools(&self) -> usize {
        self.tools.values().filter(|t| t.available).count()
    }
}

/// Derived availability of one capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilityAvailability {
    pub capability_id: String,
    pub available: bool,
    /// Missing tool, lang-pack and font names.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
    /// Human-readable reasons the capability is unusable.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
}

/// Immutable result of one probe, published atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilitySnapshot {
    pub capabilities: BTreeMap<String, CapabilityAvailability>,
    pub report: HealthReport,
}

impl AvailabilitySnapshot {
    /// The snapshot in effect before anything has been probed.
    pub fn empty() -> Self {
        Self {
            capabilities: BTreeMap::new(),
            report: HealthReport {
                tools: BTreeMap::new(),
                timestamp: Utc::now(),
            },
        }
    }

    /// Capabilities absent from the snapshot count as unavailable.
    pub fn is_available(&self, capability_id: &str) -> bool {
        self.capabilities
            .get(capability_id)
            .map(|a| a.available)
            .unwrap_or(false)
    }

    pub fn get(&self, capability_id: &str) -> Option<&CapabilityAvailability> {
        self.capabilities.get(capability_id)
    }

    pub fn available_count(&self) -> usize {
        self.capabilities.values().filter(|a| a.available).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_snapshot_reports_unavailable() {
        let snapshot = AvailabilitySnapshot::empty();
        assert!(!snapshot.is_available("pandoc-docx-pdf"));
        assert_eq!(snapshot.available_count(), 0);
    }

    #[test]
    fn test_tool_health_serialization_skips_none() {
        let health = ToolHealth::missing("pandoc", "not found in PATH");
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["available"], false);
        assert_eq!(json["error"], "not found in PATH");
        assert!(json.get("version").is_none());
    }
}
