mod node;
mod run;
mod workflow;

pub use node::{NodeRecord, NodeRecordUpdate, NodeStatus};
pub use run::{RunRecord, RunStatus};
pub use workflow::{StoredWorkflow, WorkflowStatus};
