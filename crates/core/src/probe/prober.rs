//! Best-effort probing of registered capabilities.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use super::config::ProberConfig;
use super::resolver::{SystemToolResolver, ToolResolver};
use super::types::{AvailabilitySnapshot, CapabilityAvailability, HealthReport, ToolHealth};
use crate::capability::{Capability, Registry};
use crate::metrics;

/// Determines which registered capabilities are usable on this host.
///
/// Each probe builds a fresh [`AvailabilitySnapshot`] and publishes it by
/// swapping an `Arc`; readers holding an older snapshot keep a consistent view.
pub struct Prober {
    registry: Arc<Registry>,
    resolver: Arc<dyn ToolResolver>,
    config: ProberConfig,
    snapshot: RwLock<Arc<AvailabilitySnapshot>>,
    /// Serializes probes so only one writer builds a snapshot at a time.
    probe_lock: tokio::sync::Mutex<()>,
}

impl Prober {
    pub fn new(
        registry: Arc<Registry>,
        resolver: Arc<dyn ToolResolver>,
        config: ProberConfig,
    ) -> Self {
        Self {
            registry,
            resolver,
            config,
            snapshot: RwLock::new(Arc::new(AvailabilitySnapshot::empty())),
            probe_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Creates a prober that inspects the real host.
    pub fn with_system_resolver(registry: Arc<Registry>, config: ProberConfig) -> Self {
        let resolver = Arc::new(SystemToolResolver::new(&config));
        Self::new(registry, resolver, config)
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> Arc<AvailabilitySnapshot> {
        self.snapshot.read().clone()
    }

    /// Re-checks every registered capability and publishes the result.
    ///
    /// Never fails: lookup problems mark the affected capability unavailable
    /// and are recorded in the report.
    pub async fn probe(&self) -> Arc<AvailabilitySnapshot> {
        let _guard = self.probe_lock.lock().await;
        let capabilities = self.registry.list();

        let mut tools: BTreeMap<String, ToolHealth> = BTreeMap::new();
        let mut lang_packs: HashMap<String, bool> = HashMap::new();
        let mut fonts: HashMap<String, bool> = HashMap::new();

        for capability in &capabilities {
            for tool in &capability.requires.tools {
                if !tools.contains_key(tool) {
                    let health = self.resolver.resolve_tool(tool).await;
                    debug!(
                        tool = %tool,
                        available = health.available,
                        version = ?health.version,
                        "Resolved tool"
                    );
                    tools.insert(tool.clone(), health);
                }
            }
            for pack in &capability.requires.lang_packs {
                if !lang_packs.contains_key(pack) {
                    let found = self.resolver.has_lang_pack(pack).await;
                    lang_packs.insert(pack.clone(), found);
                }
            }
            for font in &capability.requires.fonts {
                if !fonts.contains_key(font) {
                    let found = self.resolver.has_font(font).await;
                    fonts.insert(font.clone(), found);
                }
            }
        }

        let availability: BTreeMap<String, CapabilityAvailability> = capabilities
            .iter()
            .map(|c| {
                let entry = self.assess(c, &tools, &lang_packs, &fonts);
                (c.id.clone(), entry)
            })
            .collect();

        let snapshot = Arc::new(AvailabilitySnapshot {
            capabilities: availability,
            report: HealthReport {
                tools,
                timestamp: Utc::now(),
            },
        });

        metrics::CAPABILITIES_AVAILABLE.set(snapshot.available_count() as i64);
        metrics::PROBES_TOTAL.inc();
        info!(
            capabilities = capabilities.len(),
            available = snapshot.available_count(),
            tools = snapshot.report.tools.len(),
            tools_available = snapshot.report.available_tools(),
            "Capability probe complete"
        );

        *self.snapshot.write() = snapshot.clone();
        snapshot
    }

    fn assess(
        &self,
        capability: &Capability,
        tools: &BTreeMap<String, ToolHealth>,
        lang_packs: &HashMap<String, bool>,
        fonts: &HashMap<String, bool>,
    ) -> CapabilityAvailability {
        let mut missing = Vec::new();
        let mut reasons = Vec::new();

        for tool in &capability.requires.tools {
            match tools.get(tool) {
                Some(health) if health.available => {}
                Some(health) => {
                    missing.push(tool.clone());
                    reasons.push(
                        health
                            .error
                            .clone()
                            .unwrap_or_else(|| format!("tool '{}' unavailable", tool)),
                    );
                }
                None => missing.push(tool.clone()),
            }
        }

        if let Some(binary) = &capability.binary_path {
            if !binary.is_file() {
                let name = binary
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| binary.display().to_string());
                if !missing.contains(&name) {
                    missing.push(name);
                }
                reasons.push(format!("binary {} does not exist", binary.display()));
            }
        }

        for pack in &capability.requires.lang_packs {
            if !lang_packs.get(pack).copied().unwrap_or(false) {
                missing.push(pack.clone());
                reasons.push(format!("language pack '{}' not installed", pack));
            }
        }

        for font in &capability.requires.fonts {
            if !fonts.get(font).copied().unwrap_or(false) {
                missing.push(font.clone());
                reasons.push(format!("font '{}' not installed", font));
            }
        }

        if self
            .config
            .denied_licenses
            .iter()
            .any(|l| l.eq_ignore_ascii_case(&capability.license))
        {
            reasons.push(format!("license '{}' is not allowed", capability.license));
        }

        if let (Some(required), Some(budget)) = (capability.max_mem_mb, self.config.host_memory_mb)
        {
            if required > budget {
                reasons.push(format!(
                    "requires {} MB of memory, host budget is {} MB",
                    required, budget
                ));
            }
        }

        let available = missing.is_empty() && reasons.is_empty();
        if !available {
            debug!(capability = %capability.id, ?reasons, "Capability unavailable");
        }

        CapabilityAvailability {
            capability_id: capability.id.clone(),
            available,
            missing,
            reasons,
        }
    }
}
