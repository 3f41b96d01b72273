//! Recipe graph shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::planner::ConversionStep;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Input,
    Converter,
    Preprocessor,
    Postprocessor,
    Ocr,
    Llm,
    Validator,
    Output,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Converter => "converter",
            Self::Preprocessor => "preprocessor",
            Self::Postprocessor => "postprocessor",
            Self::Ocr => "ocr",
            Self::Llm => "llm",
            Self::Validator => "validator",
            Self::Output => "output",
        }
    }
}

/// Editor layout position. Ignored by execution.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct NodePosition {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecipeNode {
    pub id: String,
    pub node_type: NodeType,
    /// Free-form settings. `capability`, `input_format` and `output_format`
    /// (or `format` on input nodes) drive execution.
    #[serde(default = "empty_config")]
    pub config: Value,
    #[serde(default)]
    pub position: NodePosition,
}

fn empty_config() -> Value {
    Value::Object(Map::new())
}

impl RecipeNode {
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            node_type,
            config: empty_config(),
            position: NodePosition::default(),
        }
    }

    pub fn with_config(mut self, key: &str, value: impl Into<Value>) -> Self {
        if !self.config.is_object() {
            self.config = empty_config();
        }
        if let Value::Object(map) = &mut self.config {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn capability_id(&self) -> Option<&str> {
        self.config_str("capability")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecipeEdge {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl RecipeEdge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
        }
    }

    pub fn when(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

/// A user-authored DAG of processing nodes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recipe {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub nodes: Vec<RecipeNode>,
    #[serde(default)]
    pub edges: Vec<RecipeEdge>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Recipe {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_node(mut self, node: RecipeNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_edge(mut self, edge: RecipeEdge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn node(&self, id: &str) -> Option<&RecipeNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// A node after validation, with its effective formats resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannedNode {
    pub id: String,
    pub node_type: NodeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
    /// Planner-resolved steps for a node that declares an output format but
    /// no capability.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub route: Vec<ConversionStep>,
}

/// An edge after validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannedEdge {
    pub from: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Extra steps converting the upstream output into the downstream input.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bridge: Vec<ConversionStep>,
}

/// Linearized, format-checked form of a recipe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionPlan {
    pub recipe_id: String,
    /// Topological order.
    pub order: Vec<String>,
    /// Groups of nodes whose dependencies all lie in earlier groups.
    pub levels: Vec<Vec<String>>,
    /// Nodes in topological order.
    pub nodes: Vec<PlannedNode>,
    /// Edges in declaration order.
    pub edges: Vec<PlannedEdge>,
}

impl ExecutionPlan {
    pub fn node(&self, id: &str) -> Option<&PlannedNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a PlannedEdge> + 'a {
        self.edges.iter().filter(move |e| e.to == id)
    }

    pub fn has_outgoing(&self, id: &str) -> bool {
        self.edges.iter().any(|e| e.from == id)
    }

    /// Output formats of output nodes, or of nodes without downstream edges
    /// when the recipe has no output node.
    pub fn sink_formats(&self) -> Vec<String> {
        let has_output_nodes = self.nodes.iter().any(|n| n.node_type == NodeType::Output);
        self.nodes
            .iter()
            .filter(|n| {
                if has_output_nodes {
                    n.node_type == NodeType::Output
                } else {
                    !self.has_outgoing(&n.id)
                }
            })
            .filter_map(|n| n.output_format.clone())
            .collect()
    }
}
