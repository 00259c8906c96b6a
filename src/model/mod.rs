mod edge;
mod node;
mod workflow;

pub use edge::{ConditionClause, EdgeEndpoint, EdgeModel, Logic};
pub use node::{NodeCategory, NodeModel};
pub use workflow::WorkflowModel;
