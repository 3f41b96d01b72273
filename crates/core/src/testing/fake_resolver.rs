//! Fake tool resolver for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::probe::{ToolHealth, ToolResolver};

/// In-memory [`ToolResolver`] with a configurable set of installed tools.
///
/// Every `resolve_tool` call is recorded so tests can assert how often the
/// prober hit the host.
#[derive(Debug, Default)]
pub struct FakeToolResolver {
    tools: Mutex<HashMap<String, std::result::Result<String, String>>>,
    lang_packs: Mutex<HashSet<String>>,
    fonts: Mutex<HashSet<String>>,
    resolved: Mutex<Vec<String>>,
}

impl FakeToolResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `name` as installed, reporting `version`.
    pub fn with_tool(self, name: &str, version: &str) -> Self {
        self.tools
            .lock()
            .insert(name.to_string(), Ok(version.to_string()));
        self
    }

    /// Makes lookups of `name` fail with `error`.
    pub fn with_broken_tool(self, name: &str, error: &str) -> Self {
        self.tools
            .lock()
            .insert(name.to_string(), Err(error.to_string()));
        self
    }

    pub fn with_lang_pack(self, name: &str) -> Self {
        self.lang_packs.lock().insert(name.to_string());
        self
    }

    pub fn with_font(self, name: &str) -> Self {
        self.fonts.lock().insert(name.to_string());
        self
    }

    /// Uninstalls a tool after construction.
    pub fn remove_tool(&self, name: &str) {
        self.tools.lock().remove(name);
    }

    /// Tool names passed to `resolve_tool`, in call order.
    pub fn resolved_tools(&self) -> Vec<String> {
        self.resolved.lock().clone()
    }
}

#[async_trait]
impl ToolResolver for FakeToolResolver {
    async fn resolve_tool(&self, name: &str) -> ToolHealth {
        self.resolved.lock().push(name.to_string());
        match self.tools.lock().get(name) {
            Some(Ok(version)) => ToolHealth::found(
                name,
                PathBuf::from(format!("/usr/bin/{}", name)),
                Some(version.clone()),
            ),
            Some(Err(error)) => ToolHealth::missing(name, error.clone()),
            None => ToolHealth::missing(name, format!("'{}' not found in PATH", name)),
        }
    }

    async fn has_lang_pack(&self, name: &str) -> bool {
        self.lang_packs.lock().contains(name)
    }

    async fn has_font(&self, name: &str) -> bool {
        self.fonts.lock().contains(name)
    }
}
