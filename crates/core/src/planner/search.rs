//! Bounded simple-path search over the format graph.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::config::PlannerConfig;
use super::types::{ConversionPath, ConversionStep, ConversionTarget};
use crate::capability::{normalize_format, Capability, FormatSpec, Registry};
use crate::detect::format_of_path;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::probe::AvailabilitySnapshot;

/// Speed floor used in time estimates so a zero-speed tool stays finite.
const MIN_SPEED: f32 = 0.05;

/// Share of the resource weight folded into an edge weight.
const COST_FACTOR: f32 = 0.25;

/// A capability edge between two format nodes.
#[derive(Debug, Clone)]
struct Edge {
    capability: Arc<Capability>,
    from: String,
    to: String,
    weight: f32,
}

/// Finds and ranks conversion paths between formats.
///
/// The planner holds no mutable state; given the same registry contents and
/// availability snapshot it always returns the same ranked output.
pub struct Planner {
    registry: Arc<Registry>,
    config: PlannerConfig,
}

impl Planner {
    pub fn new(registry: Arc<Registry>, config: PlannerConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plans paths from `source` to each of `targets`, or to every reachable
    /// format when `targets` is empty.
    pub fn plan(
        &self,
        snapshot: &AvailabilitySnapshot,
        source: &str,
        targets: &[String],
    ) -> Result<Vec<ConversionTarget>> {
        let capabilities = self.registry.list();
        let source = canonical_token(&capabilities, source);
        if source.is_empty() {
            return Err(AppError::validation("source format must not be empty"));
        }

        let requested: Vec<String> = {
            let mut seen = BTreeSet::new();
            targets
                .iter()
                .map(|t| canonical_token(&capabilities, t))
                .filter(|t| !t.is_empty() && seen.insert(t.clone()))
                .collect()
        };

        let mut search = Search {
            capabilities: &capabilities,
            adjacency: HashMap::new(),
            wanted: if requested.is_empty() {
                None
            } else {
                Some(requested.iter().cloned().collect())
            },
            max_depth: self.config.max_depth,
            found: BTreeMap::new(),
        };
        let mut visited = vec![source.clone()];
        let mut trail = Vec::new();
        search.walk(&source, &mut visited, &mut trail);
        let mut found = search.found;

        let formats: Vec<String> = if requested.is_empty() {
            found.keys().cloned().collect()
        } else {
            requested
        };

        let result: Vec<ConversionTarget> = formats
            .into_iter()
            .map(|format| {
                let trails = found.remove(&format).unwrap_or_default();
                self.build_target(&capabilities, snapshot, format, trails)
            })
            .collect();

        metrics::PLANS_TOTAL.inc();
        debug!(
            source = %source,
            targets = result.len(),
            paths = result.iter().map(|t| t.paths.len()).sum::<usize>(),
            "Planned conversion targets"
        );
        Ok(result)
    }

    /// Plans from a file's detected format.
    pub fn plan_for_file(
        &self,
        snapshot: &AvailabilitySnapshot,
        path: &Path,
        targets: &[String],
    ) -> Result<Vec<ConversionTarget>> {
        let source = format_of_path(path)?;
        self.plan(snapshot, &source, targets)
    }

    /// Picks the path a job should run for `source → target`.
    ///
    /// A pinned path id must be among the ranked candidates. Without a pin
    /// the recommended path is used; when only unavailable paths exist the
    /// error names what is missing.
    pub fn select_path(
        &self,
        snapshot: &AvailabilitySnapshot,
        source: &str,
        target: &str,
        pinned: Option<&str>,
    ) -> Result<ConversionPath> {
        let plan = self.plan(snapshot, source, &[target.to_string()])?;
        let Some(target_plan) = plan.into_iter().next() else {
            return Err(AppError::validation(format!(
                "no conversion path from '{}' to '{}'",
                source, target
            )));
        };

        if let Some(id) = pinned {
            let path = target_plan
                .paths
                .into_iter()
                .find(|p| p.id == id)
                .ok_or_else(|| {
                    AppError::validation(format!(
                        "path '{}' does not convert '{}' to '{}'",
                        id, source, target
                    ))
                })?;
            if !path.available {
                return Err(unavailable_error(&path.missing_requirements, target));
            }
            return Ok(path);
        }

        if target_plan.paths.is_empty() {
            return Err(AppError::validation_with(
                format!("no conversion path from '{}' to '{}'", source, target),
                "Register a capability that produces the target format",
            ));
        }

        match target_plan.paths.into_iter().find(|p| p.recommended) {
            Some(path) => Ok(path),
            None => Err(unavailable_error(&target_plan.missing_requirements, target)),
        }
    }

    /// Best-ranked path between two formats regardless of availability.
    ///
    /// Returns an empty path when the formats are the same.
    pub fn bridge(
        &self,
        snapshot: &AvailabilitySnapshot,
        from: &str,
        to: &str,
    ) -> Result<Option<ConversionPath>> {
        let capabilities = self.registry.list();
        if canonical_token(&capabilities, from) == canonical_token(&capabilities, to) {
            return Ok(Some(ConversionPath {
                id: String::new(),
                steps: Vec::new(),
                total_quality: 1.0,
                estimated_time_ms: 0,
                cost: 0.0,
                risks: Vec::new(),
                available: true,
                missing_requirements: Vec::new(),
                recommended: false,
            }));
        }
        let plan = self.plan(snapshot, from, &[to.to_string()])?;
        Ok(plan.into_iter().next().and_then(|t| t.paths.into_iter().next()))
    }

    /// Canonical token for a user-supplied format.
    pub fn canonical_format(&self, format: &str) -> String {
        canonical_token(&self.registry.list(), format)
    }

    fn build_target(
        &self,
        capabilities: &[Arc<Capability>],
        snapshot: &AvailabilitySnapshot,
        format: String,
        trails: Vec<Vec<Edge>>,
    ) -> ConversionTarget {
        let mut paths: Vec<ConversionPath> = trails
            .iter()
            .map(|trail| self.build_path(snapshot, trail))
            .filter(|p| p.total_quality >= self.config.min_quality)
            .collect();

        paths.sort_by(rank);
        paths.truncate(self.config.max_paths_per_target);

        let available = paths.first().map(|p| p.available).unwrap_or(false);
        if let Some(best) = paths.first_mut() {
            best.recommended = best.available;
        }
        let missing_requirements = if available {
            Vec::new()
        } else {
            paths
                .first()
                .map(|p| p.missing_requirements.clone())
                .unwrap_or_default()
        };

        let mime_type = describe_format(capabilities, &format)
            .map(|spec| spec.mime.clone())
            .unwrap_or_default();

        ConversionTarget {
            format,
            mime_type,
            paths,
            recommended: available,
            available,
            missing_requirements,
        }
    }

    fn build_path(&self, snapshot: &AvailabilitySnapshot, trail: &[Edge]) -> ConversionPath {
        let mut quality = 1.0_f32;
        let mut estimated_time_ms = 0;
        let mut cost = 0.0;
        let mut risks: Vec<String> = Vec::new();
        let mut missing: Vec<String> = Vec::new();
        let mut available = true;
        let mut steps = Vec::with_capacity(trail.len());

        for edge in trail {
            let capability = &edge.capability;
            let step_available = snapshot.is_available(&capability.id);
            let step_ms = self.estimate_step_ms(capability);

            quality = self
                .config
                .quality_combination
                .combine(quality, capability.quality);
            estimated_time_ms += step_ms;
            cost += edge.weight;
            available &= step_available;

            for risk in &capability.risks {
                if !risks.contains(risk) {
                    risks.push(risk.clone());
                }
            }
            if !step_available {
                let names: Vec<String> = match snapshot.get(&capability.id) {
                    Some(entry) => entry.missing.clone(),
                    None => capability.requirement_names().cloned().collect(),
                };
                for name in names {
                    if !missing.contains(&name) {
                        missing.push(name);
                    }
                }
            }

            steps.push(ConversionStep {
                capability_id: capability.id.clone(),
                capability_name: capability.name.clone(),
                from_format: edge.from.clone(),
                to_format: edge.to.clone(),
                quality: capability.quality,
                estimated_ms: step_ms,
                available: step_available,
            });
        }

        ConversionPath {
            id: path_id(trail),
            steps,
            total_quality: quality,
            estimated_time_ms,
            cost,
            risks,
            available,
            missing_requirements: missing,
            recommended: false,
        }
    }

    /// Expected wall time of one step run by `capability`.
    pub fn estimate_step_ms(&self, capability: &Capability) -> u64 {
        (self.config.base_step_ms as f32 / capability.speed.max(MIN_SPEED)).round() as u64
    }
}

/// Depth-first enumeration state for one plan call.
struct Search<'a> {
    capabilities: &'a [Arc<Capability>],
    adjacency: HashMap<String, Vec<Edge>>,
    wanted: Option<BTreeSet<String>>,
    max_depth: usize,
    found: BTreeMap<String, Vec<Vec<Edge>>>,
}

impl Search<'_> {
    fn walk(&mut self, format: &str, visited: &mut Vec<String>, trail: &mut Vec<Edge>) {
        if trail.len() >= self.max_depth {
            return;
        }

        for edge in self.edges_from(format) {
            if visited.contains(&edge.to) {
                continue;
            }

            let next = edge.to.clone();
            trail.push(edge);
            visited.push(next.clone());

            let wanted = self
                .wanted
                .as_ref()
                .map(|w| w.contains(&next))
                .unwrap_or(true);
            if wanted {
                self.found.entry(next.clone()).or_default().push(trail.clone());
            }
            self.walk(&next, visited, trail);

            visited.pop();
            trail.pop();
        }
    }

    fn edges_from(&mut self, format: &str) -> Vec<Edge> {
        if let Some(edges) = self.adjacency.get(format) {
            return edges.clone();
        }

        let mut edges: Vec<Edge> = self
            .capabilities
            .iter()
            .filter(|c| c.accepts(format))
            .flat_map(|c| {
                let weight = edge_weight(c);
                c.output_formats().into_iter().map(move |to| Edge {
                    capability: c.clone(),
                    from: format.to_string(),
                    to,
                    weight,
                })
            })
            .collect();
        edges.sort_by(|a, b| {
            a.weight
                .total_cmp(&b.weight)
                .then_with(|| a.capability.id.cmp(&b.capability.id))
                .then_with(|| a.to.cmp(&b.to))
        });

        self.adjacency.insert(format.to_string(), edges.clone());
        edges
    }
}

/// Ranking: available first, then quality descending, time ascending, id.
fn rank(a: &ConversionPath, b: &ConversionPath) -> Ordering {
    b.available
        .cmp(&a.available)
        .then_with(|| b.total_quality.total_cmp(&a.total_quality))
        .then_with(|| a.estimated_time_ms.cmp(&b.estimated_time_ms))
        .then_with(|| a.id.cmp(&b.id))
}

fn edge_weight(capability: &Capability) -> f32 {
    (1.0 - capability.quality) + capability.cost.weight() * COST_FACTOR
}

/// Capability ids joined by `>`, each intermediate hop tagged with the
/// format it hands on, e.g. `md-html[html]>html-pdf`.
fn path_id(trail: &[Edge]) -> String {
    let last = trail.len().saturating_sub(1);
    trail
        .iter()
        .enumerate()
        .map(|(i, e)| {
            if i < last {
                format!("{}[{}]", e.capability.id, e.to)
            } else {
                e.capability.id.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(">")
}

fn unavailable_error(missing: &[String], target: &str) -> AppError {
    let suggestion = if missing.is_empty() {
        "Run a health check and review the capability's license and memory limits".to_string()
    } else {
        format!("Install the missing requirements: {}", missing.join(", "))
    };
    AppError::validation_with(
        format!("no available conversion path to '{}'", target),
        suggestion,
    )
}

/// First format spec in the registry that names `format`, outputs first.
fn describe_format<'a>(capabilities: &'a [Arc<Capability>], format: &str) -> Option<&'a FormatSpec> {
    capabilities
        .iter()
        .flat_map(|c| c.outputs.iter())
        .chain(capabilities.iter().flat_map(|c| c.inputs.iter()))
        .find(|spec| spec.matches(format))
}

/// Maps aliases (`jpeg`, `image/png`) onto the registry's canonical token.
fn canonical_token(capabilities: &[Arc<Capability>], format: &str) -> String {
    describe_format(capabilities, format)
        .map(FormatSpec::canonical)
        .unwrap_or_else(|| normalize_format(format))
}
