//! Testing utilities and mock implementations.
//!
//! This module provides fakes for the host-facing traits so the prober and
//! orchestrator can be exercised without real converter tools installed.
//!
//! # Example
//!
//! ```rust,ignore
//! use f2f_core::testing::{fixtures, FakeToolResolver, MockInvoker};
//!
//! let resolver = FakeToolResolver::new().with_tool("pandoc", "pandoc 3.1");
//! let invoker = MockInvoker::new();
//! invoker.fail_once("pandoc-docx-pdf", AppError::tool("pandoc", "exit 1"));
//! ```

mod fake_resolver;
mod mock_invoker;

pub use fake_resolver::FakeToolResolver;
pub use mock_invoker::{MockInvoker, RecordedInvocation};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::sync::Arc;

    use crate::capability::{Capability, FormatSpec, Registry};
    use crate::probe::{AvailabilitySnapshot, CapabilityAvailability};

    /// A capability converting `from` into `to` with no requirements.
    pub fn capability(id: &str, from: &str, to: &str, quality: f32) -> Capability {
        Capability::new(
            id,
            format!("{} to {}", from, to),
            FormatSpec::new(format!("application/x-{}", from), &[from]),
            FormatSpec::new(format!("application/x-{}", to), &[to]),
        )
        .with_vendor("test", "1.0", "MIT")
        .with_scores(quality, 1.0)
    }

    /// A registry holding `capabilities`.
    pub fn registry(capabilities: Vec<Capability>) -> Arc<Registry> {
        let registry = Registry::new();
        for capability in capabilities {
            registry
                .register(capability)
                .expect("fixture capability should register");
        }
        Arc::new(registry)
    }

    /// A snapshot where exactly the capabilities in `available` are usable.
    pub fn snapshot(registry: &Registry, available: &[&str]) -> AvailabilitySnapshot {
        let mut snapshot = AvailabilitySnapshot::empty();
        for cap in registry.list() {
            let is_available = available.contains(&cap.id.as_str());
            let missing = if is_available {
                Vec::new()
            } else {
                cap.requirement_names().cloned().collect()
            };
            snapshot.capabilities.insert(
                cap.id.clone(),
                CapabilityAvailability {
                    capability_id: cap.id.clone(),
                    available: is_available,
                    missing,
                    reasons: Vec::new(),
                },
            );
        }
        snapshot
    }

    /// A snapshot where every registered capability is usable.
    pub fn all_available(registry: &Registry) -> AvailabilitySnapshot {
        let ids: Vec<String> = registry.list().iter().map(|c| c.id.clone()).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        snapshot(registry, &refs)
    }

    /// Writes a small input file named `name` into `dir`.
    pub fn input_file(dir: &std::path::Path, name: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("fixture content of {}", name))
            .expect("fixture input should be writable");
        path
    }
}
