//! Process-wide capability registry.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::builtin::builtin_capabilities;
use super::types::Capability;
use crate::error::{AppError, Result};

/// Holds every registered capability, keyed by id.
///
/// Reads run concurrently; registration takes the write lock. Iteration order
/// is by id so that everything downstream (planner, listings) is deterministic.
#[derive(Debug, Default)]
pub struct Registry {
    capabilities: RwLock<BTreeMap<String, Arc<Capability>>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry pre-populated with the built-in descriptor set.
    pub fn with_builtins() -> Result<Self> {
        let registry = Self::new();
        for capability in builtin_capabilities() {
            registry.register(capability)?;
        }
        info!("Registered {} built-in capabilities", registry.len());
        Ok(registry)
    }

    /// Registers a capability.
    ///
    /// Fails when the id is already taken or the descriptor is malformed.
    pub fn register(&self, capability: Capability) -> Result<()> {
        capability.validate()?;

        let mut capabilities = self.capabilities.write();
        if capabilities.contains_key(&capability.id) {
            return Err(AppError::validation(format!(
                "capability '{}' is already registered",
                capability.id
            )));
        }

        debug!(
            capability = %capability.id,
            inputs = ?capability.input_formats(),
            outputs = ?capability.output_formats(),
            "Registered capability"
        );
        capabilities.insert(capability.id.clone(), Arc::new(capability));
        Ok(())
    }

    /// Returns the capability with the given id.
    pub fn get(&self, id: &str) -> Option<Arc<Capability>> {
        self.capabilities.read().get(id).cloned()
    }

    /// Returns every capability that accepts `format` as input.
    pub fn lookup_by_format(&self, format: &str) -> Vec<Arc<Capability>> {
        self.capabilities
            .read()
            .values()
            .filter(|c| c.accepts(format))
            .cloned()
            .collect()
    }

    /// Returns all capabilities ordered by id.
    pub fn list(&self) -> Vec<Arc<Capability>> {
        self.capabilities.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.read().is_empty()
    }

    /// Registers every JSON descriptor found in `dir`.
    ///
    /// A file holds either one descriptor or an array of them. Malformed files
    /// and rejected descriptors are logged and skipped. Returns how many were
    /// registered.
    pub fn load_descriptors(&self, dir: &Path) -> Result<usize> {
        let entries = std::fs::read_dir(dir).map_err(|e| AppError::io(dir, e))?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        paths.sort();

        let mut registered = 0;
        for path in paths {
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    warn!("Failed to read descriptor {:?}: {}", path, e);
                    continue;
                }
            };

            let descriptors = match parse_descriptors(&content) {
                Ok(descriptors) => descriptors,
                Err(e) => {
                    warn!("Skipping malformed descriptor {:?}: {}", path, e);
                    continue;
                }
            };

            for capability in descriptors {
                let id = capability.id.clone();
                match self.register(capability) {
                    Ok(()) => registered += 1,
                    Err(e) => warn!("Rejected capability '{}' from {:?}: {}", id, path, e),
                }
            }
        }

        info!("Loaded {} capability descriptors from {:?}", registered, dir);
        Ok(registered)
    }
}

fn parse_descriptors(content: &str) -> serde_json::Result<Vec<Capability>> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    if value.is_array() {
        serde_json::from_value(value)
    } else {
        serde_json::from_value(value).map(|c| vec![c])
    }
}
