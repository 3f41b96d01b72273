//! Recipe graphs: user-authored processing DAGs and their validation.

mod book;
mod condition;
mod types;
mod validator;

pub use book::RecipeBook;
pub use condition::is_active;
pub use types::{
    ExecutionPlan, NodePosition, NodeType, PlannedEdge, PlannedNode, Recipe, RecipeEdge,
    RecipeNode,
};
pub use validator::RecipeValidator;
