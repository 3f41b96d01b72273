//! Recipe DAG validation: acyclicity, references and format compatibility.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

use super::types::{ExecutionPlan, NodeType, PlannedEdge, PlannedNode, Recipe, RecipeNode};
use crate::capability::Registry;
use crate::error::{AppError, Result};
use crate::planner::{ConversionStep, Planner};
use crate::probe::AvailabilitySnapshot;

/// Validates recipes against the registry, bridging format gaps through the
/// planner.
pub struct RecipeValidator {
    registry: Arc<Registry>,
    planner: Arc<Planner>,
}

impl RecipeValidator {
    pub fn new(registry: Arc<Registry>, planner: Arc<Planner>) -> Self {
        Self { registry, planner }
    }

    /// Validates a recipe whose input format is not yet known.
    pub fn validate(&self, recipe: &Recipe, snapshot: &AvailabilitySnapshot) -> Result<ExecutionPlan> {
        self.validate_for_source(recipe, snapshot, None)
    }

    /// Validates a recipe for a concrete source format, which seeds every
    /// input node that does not declare its own.
    pub fn validate_for_source(
        &self,
        recipe: &Recipe,
        snapshot: &AvailabilitySnapshot,
        source: Option<&str>,
    ) -> Result<ExecutionPlan> {
        if recipe.nodes.is_empty() {
            return Err(AppError::validation(format!(
                "recipe '{}' has no nodes",
                recipe.id
            )));
        }

        let mut index: HashMap<&str, usize> = HashMap::with_capacity(recipe.nodes.len());
        for (i, node) in recipe.nodes.iter().enumerate() {
            if index.insert(node.id.as_str(), i).is_some() {
                return Err(AppError::validation(format!(
                    "recipe '{}' declares node '{}' more than once",
                    recipe.id, node.id
                )));
            }
        }

        for edge in &recipe.edges {
            for end in [&edge.from, &edge.to] {
                if !index.contains_key(end.as_str()) {
                    return Err(AppError::validation(format!(
                        "edge {} -> {} references missing node '{}'",
                        edge.from, edge.to, end
                    )));
                }
            }
        }

        let order = topological_order(recipe, &index)?;
        let levels = levels(recipe, &index, &order);

        let mut outputs: HashMap<&str, Option<String>> = HashMap::new();
        let mut bridges: HashMap<usize, Vec<ConversionStep>> = HashMap::new();
        let mut nodes = Vec::with_capacity(order.len());

        for &i in &order {
            let node = &recipe.nodes[i];
            let planned = self.resolve_node(recipe, node, snapshot, source, &outputs, &mut bridges)?;
            outputs.insert(node.id.as_str(), planned.output_format.clone());
            nodes.push(planned);
        }

        let edges = recipe
            .edges
            .iter()
            .enumerate()
            .map(|(i, e)| PlannedEdge {
                from: e.from.clone(),
                to: e.to.clone(),
                condition: e.condition.clone(),
                bridge: bridges.remove(&i).unwrap_or_default(),
            })
            .collect();

        let order: Vec<String> = order.iter().map(|&i| recipe.nodes[i].id.clone()).collect();
        debug!(recipe = %recipe.id, ?order, levels = levels.len(), "Validated recipe");

        Ok(ExecutionPlan {
            recipe_id: recipe.id.clone(),
            order,
            levels: levels
                .into_iter()
                .map(|level| level.into_iter().map(|i| recipe.nodes[i].id.clone()).collect())
                .collect(),
            nodes,
            edges,
        })
    }

    fn resolve_node(
        &self,
        recipe: &Recipe,
        node: &RecipeNode,
        snapshot: &AvailabilitySnapshot,
        source: Option<&str>,
        outputs: &HashMap<&str, Option<String>>,
        bridges: &mut HashMap<usize, Vec<ConversionStep>>,
    ) -> Result<PlannedNode> {
        let canonical = |f: &str| self.planner.canonical_format(f);

        if node.node_type == NodeType::Input {
            return self.resolve_input(node, snapshot, source);
        }

        let capability = match node.capability_id() {
            Some(id) => Some(self.registry.get(id).ok_or_else(|| {
                AppError::validation_with(
                    format!("node '{}' references unknown capability '{}'", node.id, id),
                    "Use a capability id listed by the capabilities endpoint",
                )
            })?),
            None => None,
        };

        let declared_in = node.config_str("input_format").map(canonical);
        let mut declared_out = node.config_str("output_format").map(canonical);
        let mut fallback_in = None;
        if let Some(cap) = &capability {
            if let Some(format) = &declared_in {
                if !cap.accepts(format) {
                    return Err(AppError::validation(format!(
                        "node '{}': capability '{}' does not accept '{}'",
                        node.id, cap.id, format
                    )));
                }
            }
            if let Some(format) = &declared_out {
                if !cap.produces(format) {
                    return Err(AppError::validation(format!(
                        "node '{}': capability '{}' does not produce '{}'",
                        node.id, cap.id, format
                    )));
                }
            }
            fallback_in = cap.input_formats().into_iter().next();
            declared_out = declared_out.or_else(|| cap.output_formats().into_iter().next());
        } else if node.node_type != NodeType::Validator
            && node.node_type != NodeType::Output
            && declared_out.is_none()
        {
            return Err(AppError::validation_with(
                format!(
                    "{} node '{}' declares neither a capability nor an output format",
                    node.node_type.as_str(),
                    node.id
                ),
                "Set `capability` or `output_format` in the node config",
            ));
        }

        let mut upstream_format = None;
        for (edge_index, edge) in recipe.edges.iter().enumerate() {
            if edge.to != node.id {
                continue;
            }
            let Some(from_format) = outputs.get(edge.from.as_str()).cloned().flatten() else {
                continue;
            };
            // A capability fed a format it accepts takes it as is.
            let to_format = match (&declared_in, &capability) {
                (Some(format), _) => format.clone(),
                (None, Some(cap)) if !cap.accepts(&from_format) => {
                    fallback_in.clone().unwrap_or_else(|| from_format.clone())
                }
                _ => from_format.clone(),
            };
            if upstream_format.is_none() {
                upstream_format = Some(to_format.clone());
            }
            if from_format == to_format {
                continue;
            }

            let bridge = self
                .planner
                .bridge(snapshot, &from_format, &to_format)?
                .ok_or_else(|| {
                    AppError::validation(format!(
                        "edge {} -> {}: '{}' output cannot be converted to '{}' input",
                        edge.from, edge.to, from_format, to_format
                    ))
                })?;
            debug!(
                from = %edge.from,
                to = %edge.to,
                bridge = %bridge.id,
                "Bridged incompatible recipe edge"
            );
            bridges.insert(edge_index, bridge.steps);
        }

        let input_format = declared_in.or(upstream_format).or(fallback_in);
        let mut route = Vec::new();
        if capability.is_none() {
            if let (Some(input), Some(output)) = (&input_format, &declared_out) {
                if input != output {
                    let path = self.planner.bridge(snapshot, input, output)?.ok_or_else(|| {
                        AppError::validation(format!(
                            "node '{}' cannot convert '{}' to '{}'",
                            node.id, input, output
                        ))
                    })?;
                    route = path.steps;
                }
            }
        }

        let output_format = declared_out.or_else(|| input_format.clone());
        Ok(PlannedNode {
            id: node.id.clone(),
            node_type: node.node_type,
            capability_id: capability.map(|c| c.id.clone()),
            input_format,
            output_format,
            route,
        })
    }

    /// An input node emits the source format. When it declares a different
    /// format, the source is first converted along a planner route.
    fn resolve_input(
        &self,
        node: &RecipeNode,
        snapshot: &AvailabilitySnapshot,
        source: Option<&str>,
    ) -> Result<PlannedNode> {
        let declared = node
            .config_str("format")
            .or_else(|| node.config_str("output_format"))
            .map(|f| self.planner.canonical_format(f));
        let source = source.map(|f| self.planner.canonical_format(f));

        let mut route = Vec::new();
        if let (Some(declared), Some(actual)) = (&declared, &source) {
            if declared != actual {
                let path = self
                    .planner
                    .bridge(snapshot, actual, declared)?
                    .ok_or_else(|| {
                        AppError::validation_with(
                            format!(
                                "input node '{}' expects '{}' but the source is '{}'",
                                node.id, declared, actual
                            ),
                            format!("Submit a '{}' file", declared),
                        )
                    })?;
                debug!(node = %node.id, route = %path.id, "Routed source into input node format");
                route = path.steps;
            }
        }

        Ok(PlannedNode {
            id: node.id.clone(),
            node_type: node.node_type,
            capability_id: None,
            input_format: source.clone().or_else(|| declared.clone()),
            output_format: declared.or(source),
            route,
        })
    }
}

/// Kahn's algorithm; ready nodes are taken in declaration order.
fn topological_order(recipe: &Recipe, index: &HashMap<&str, usize>) -> Result<Vec<usize>> {
    let n = recipe.nodes.len();
    let mut indegree = vec![0usize; n];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    for edge in &recipe.edges {
        let from = index[edge.from.as_str()];
        let to = index[edge.to.as_str()];
        successors[from].push(to);
        indegree[to] += 1;
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &next in &successors[i] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    if order.len() < n {
        let cyclic: Vec<&str> = (0..n)
            .filter(|&i| indegree[i] > 0)
            .map(|i| recipe.nodes[i].id.as_str())
            .collect();
        return Err(AppError::validation_with(
            format!(
                "recipe '{}' contains a cycle through nodes: {}",
                recipe.id,
                cyclic.join(", ")
            ),
            "Remove an edge so the graph becomes acyclic",
        ));
    }
    Ok(order)
}

/// Level of a node is one past the deepest of its predecessors.
fn levels(recipe: &Recipe, index: &HashMap<&str, usize>, order: &[usize]) -> Vec<Vec<usize>> {
    let mut level = vec![0usize; recipe.nodes.len()];
    for &i in order {
        let id = recipe.nodes[i].id.as_str();
        level[i] = recipe
            .edges
            .iter()
            .filter(|e| e.to == id)
            .map(|e| level[index[e.from.as_str()]] + 1)
            .max()
            .unwrap_or(0);
    }

    let depth = order.iter().map(|&i| level[i]).max().map_or(0, |d| d + 1);
    let mut groups = vec![Vec::new(); depth];
    for &i in order {
        groups[level[i]].push(i);
    }
    groups
}
