use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{
    Result, TrigflowError,
    model::{EdgeModel, NodeModel},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowModel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeModel>,
    #[serde(default)]
    pub edges: Vec<EdgeModel>,
}

impl WorkflowModel {
    pub fn from_json(s: &str) -> Result<Self> {
        let workflow = serde_json::from_str::<WorkflowModel>(s);
        match workflow {
            Ok(v) => Ok(v),
            Err(e) => Err(TrigflowError::Workflow(format!("{}", e))),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Check the graph invariants: unique node ids and edges that only
    /// reference nodes of this workflow.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(TrigflowError::Workflow("missing id in workflow".to_string()));
        }

        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(TrigflowError::Workflow(format!("duplicate node id {} in workflow {}", node.id, self.id)));
            }
        }

        for edge in &self.edges {
            if !ids.contains(edge.start.id.as_str()) {
                return Err(TrigflowError::Edge(format!("source node {} of edge {} not found", edge.start.id, edge.id)));
            }
            if !ids.contains(edge.end.id.as_str()) {
                return Err(TrigflowError::Edge(format!("target node {} of edge {} not found", edge.end.id, edge.id)));
            }
        }

        Ok(())
    }
}
