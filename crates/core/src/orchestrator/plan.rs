//! Executable step graphs derived from planner paths and recipes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::capability::Registry;
use crate::error::{AppError, Result};
use crate::planner::{ConversionPath, ConversionStep, Planner};
use crate::recipe::{is_active, ExecutionPlan, NodeType, PlannedNode};

/// What a step does with its input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    /// Invoke a capability.
    Convert { capability_id: String },
    /// Check the input is a non-empty file and pass it on unchanged.
    Validate,
    /// Hand the input on unchanged (an input wired straight to an output).
    Passthrough,
}

/// Where a step reads from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "from", content = "index", rename_all = "snake_case")]
pub enum StepInput {
    /// The job's input file.
    Source,
    /// The output of an earlier step.
    Step(usize),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStep {
    pub index: usize,
    /// Human-readable stage name, e.g. `convert:docx-pdf`.
    pub label: String,
    pub action: StepAction,
    pub inputs: Vec<StepInput>,
    pub from_format: String,
    pub to_format: String,
    /// Whether the step's output is a final artifact.
    pub sink: bool,
    /// Steps on the same level have no dependency on each other.
    pub level: usize,
    pub estimated_ms: u64,
}

impl JobStep {
    pub fn capability_id(&self) -> Option<&str> {
        match &self.action {
            StepAction::Convert { capability_id } => Some(capability_id),
            _ => None,
        }
    }
}

/// The steps a job runs, in an order where every step follows its inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobPlan {
    pub steps: Vec<JobStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe_id: Option<String>,
}

impl JobPlan {
    /// A linear plan running each step of `path` on the previous output.
    pub fn from_path(path: &ConversionPath, source_format: &str) -> Self {
        let mut builder = PlanBuilder::default();
        let mut current = (StepInput::Source, source_format.to_string());
        for step in &path.steps {
            current = builder.convert(step, vec![current.0]);
        }
        match current.0 {
            StepInput::Step(i) => builder.steps[i].sink = true,
            StepInput::Source => {
                builder.push(
                    StepAction::Passthrough,
                    "passthrough".to_string(),
                    vec![StepInput::Source],
                    source_format.to_string(),
                    source_format.to_string(),
                    0,
                );
                if let Some(last) = builder.steps.last_mut() {
                    last.sink = true;
                }
            }
        }

        Self {
            steps: builder.steps,
            path_id: Some(path.id.clone()).filter(|id| !id.is_empty()),
            recipe_id: None,
        }
    }

    /// Expands a validated recipe into steps for one input file.
    ///
    /// Edges whose condition is inactive for `options` are dropped, along
    /// with every node left without an active input.
    pub fn from_recipe(
        exec: &ExecutionPlan,
        options: &Map<String, Value>,
        source_format: &str,
        registry: &Registry,
        planner: &Planner,
    ) -> Result<Self> {
        let mut builder = PlanBuilder::default();
        let mut produced: HashMap<&str, Vec<(StepInput, String)>> = HashMap::new();
        let has_output_nodes = exec.nodes.iter().any(|n| n.node_type == NodeType::Output);

        for node in &exec.nodes {
            if node.node_type == NodeType::Input {
                let source = planner.canonical_format(source_format);
                if let Some(expected) = node.input_format.as_deref() {
                    if expected != source {
                        return Err(AppError::validation(format!(
                            "recipe '{}' was validated for '{}' input, got '{}'",
                            exec.recipe_id, expected, source
                        )));
                    }
                }
                let mut current = (StepInput::Source, source);
                for step in &node.route {
                    current = builder.convert(step, vec![current.0]);
                }
                produced.insert(&node.id, vec![current]);
                continue;
            }

            let mut inputs = Vec::new();
            for edge in exec.incoming(&node.id) {
                if !is_active(edge.condition.as_deref(), options) {
                    continue;
                }
                let Some(upstream) = produced.get(edge.from.as_str()) else {
                    continue;
                };
                for (input, format) in upstream.clone() {
                    let mut current = (input, format);
                    for step in &edge.bridge {
                        current = builder.convert(step, vec![current.0]);
                    }
                    inputs.push(current);
                }
            }
            if inputs.is_empty() {
                continue;
            }

            let outputs = builder.node(node, inputs, registry, planner)?;
            produced.insert(&node.id, outputs);
        }

        if has_output_nodes {
            for node in exec.nodes.iter().filter(|n| n.node_type == NodeType::Output) {
                for (input, _) in produced.get(node.id.as_str()).into_iter().flatten() {
                    if let StepInput::Step(i) = input {
                        builder.steps[*i].sink = true;
                    }
                }
            }
        } else {
            let consumed: Vec<usize> = builder
                .steps
                .iter()
                .flat_map(|s| s.inputs.iter())
                .filter_map(|i| match i {
                    StepInput::Step(i) => Some(*i),
                    StepInput::Source => None,
                })
                .collect();
            for step in builder.steps.iter_mut() {
                if !consumed.contains(&step.index) {
                    step.sink = true;
                }
            }
        }

        if !builder.steps.iter().any(|s| s.sink) {
            return Err(AppError::validation_with(
                format!(
                    "recipe '{}' produces no output for the given options",
                    exec.recipe_id
                ),
                "Check the recipe's edge conditions against the job options",
            ));
        }

        Ok(Self {
            steps: builder.steps,
            path_id: None,
            recipe_id: Some(exec.recipe_id.clone()),
        })
    }

    /// Step indices grouped by dependency level.
    pub fn levels(&self) -> Vec<Vec<usize>> {
        let mut levels: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for step in &self.steps {
            levels.entry(step.level).or_default().push(step.index);
        }
        levels.into_values().collect()
    }

    pub fn sinks(&self) -> impl Iterator<Item = &JobStep> {
        self.steps.iter().filter(|s| s.sink)
    }

    pub fn total_estimated_ms(&self) -> u64 {
        self.steps.iter().map(|s| s.estimated_ms).sum()
    }

    /// Estimated time for the steps not in `done`.
    pub fn remaining_ms(&self, done: &[usize]) -> u64 {
        self.steps
            .iter()
            .filter(|s| !done.contains(&s.index))
            .map(|s| s.estimated_ms)
            .sum()
    }

    /// Capability ids the plan invokes, without duplicates.
    pub fn capability_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for id in self.steps.iter().filter_map(|s| s.capability_id()) {
            if !ids.iter().any(|i| i == id) {
                ids.push(id.to_string());
            }
        }
        ids
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Default)]
struct PlanBuilder {
    steps: Vec<JobStep>,
}

impl PlanBuilder {
    fn push(
        &mut self,
        action: StepAction,
        label: String,
        inputs: Vec<StepInput>,
        from_format: String,
        to_format: String,
        estimated_ms: u64,
    ) -> (StepInput, String) {
        let index = self.steps.len();
        let level = inputs
            .iter()
            .filter_map(|i| match i {
                StepInput::Step(j) => Some(self.steps[*j].level + 1),
                StepInput::Source => None,
            })
            .max()
            .unwrap_or(0);
        self.steps.push(JobStep {
            index,
            label,
            action,
            inputs,
            from_format,
            to_format: to_format.clone(),
            sink: false,
            level,
            estimated_ms,
        });
        (StepInput::Step(index), to_format)
    }

    fn convert(&mut self, step: &ConversionStep, inputs: Vec<StepInput>) -> (StepInput, String) {
        self.push(
            StepAction::Convert {
                capability_id: step.capability_id.clone(),
            },
            format!("convert:{}", step.capability_id),
            inputs,
            step.from_format.clone(),
            step.to_format.clone(),
            step.estimated_ms,
        )
    }

    fn node(
        &mut self,
        node: &PlannedNode,
        inputs: Vec<(StepInput, String)>,
        registry: &Registry,
        planner: &Planner,
    ) -> Result<Vec<(StepInput, String)>> {
        let first_format = inputs[0].1.clone();
        let input_refs: Vec<StepInput> = inputs.iter().map(|(i, _)| *i).collect();

        if let Some(id) = &node.capability_id {
            let capability = registry.get(id).ok_or_else(|| {
                AppError::validation(format!("node '{}' uses unknown capability '{}'", node.id, id))
            })?;
            let from = if capability.accepts(&first_format) {
                first_format
            } else {
                node.input_format.clone().unwrap_or(first_format)
            };
            let to = node
                .output_format
                .clone()
                .or_else(|| capability.output_formats().into_iter().next())
                .unwrap_or_else(|| from.clone());
            let out = self.push(
                StepAction::Convert {
                    capability_id: id.clone(),
                },
                format!("{}:{}", node.node_type.as_str(), node.id),
                input_refs,
                from,
                to,
                planner.estimate_step_ms(&capability),
            );
            return Ok(vec![out]);
        }

        if !node.route.is_empty() {
            let mut current = (inputs[0].0, first_format);
            for step in &node.route {
                current = self.convert(step, vec![current.0]);
            }
            return Ok(vec![current]);
        }

        match node.node_type {
            NodeType::Validator => Ok(inputs
                .into_iter()
                .map(|(input, format)| {
                    self.push(
                        StepAction::Validate,
                        format!("validate:{}", node.id),
                        vec![input],
                        format.clone(),
                        format,
                        0,
                    )
                })
                .collect()),
            NodeType::Output => Ok(inputs
                .into_iter()
                .map(|(input, format)| match input {
                    StepInput::Step(_) => (input, format),
                    StepInput::Source => self.push(
                        StepAction::Passthrough,
                        format!("output:{}", node.id),
                        vec![input],
                        format.clone(),
                        format,
                        0,
                    ),
                })
                .collect()),
            // Validation guarantees the input already has the declared output format.
            _ => Ok(inputs),
        }
    }
}
