//! Read-only graph view of a workflow definition used during a run.

use std::collections::HashMap;

use petgraph::{
    Direction,
    graph::{DiGraph, NodeIndex},
    visit::EdgeRef,
};

use crate::{
    Result, TrigflowError, WorkflowModel,
    model::{EdgeModel, NodeModel},
    workflow::template::normalize_name,
};

/// Directed graph over a workflow's nodes and edges.
///
/// Built once per Runner; lookups never mutate it, so it is shared freely
/// between the walk and the dispatcher.
#[derive(Debug, Clone)]
pub struct Graph {
    workflow_id: String,
    name: String,
    graph: DiGraph<NodeModel, EdgeModel>,
    index: HashMap<String, NodeIndex>,
    names: HashMap<String, String>,
}

impl Graph {
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// node id lookup
    pub fn node(
        &self,
        id: &str,
    ) -> Option<&NodeModel> {
        self.index.get(id).map(|idx| &self.graph[*idx])
    }

    /// nodes in definition order
    pub fn nodes(&self) -> impl Iterator<Item = &NodeModel> {
        self.graph.node_indices().map(|idx| &self.graph[idx])
    }

    pub fn trigger_nodes(&self) -> impl Iterator<Item = &NodeModel> {
        self.nodes().filter(|n| n.is_trigger())
    }

    pub fn first_node(&self) -> Option<&NodeModel> {
        self.nodes().next()
    }

    /// Nodes without incoming edges, in definition order.
    pub fn root_nodes(&self) -> Vec<&NodeModel> {
        self.graph
            .node_indices()
            .filter(|idx| self.graph.neighbors_directed(*idx, Direction::Incoming).next().is_none())
            .map(|idx| &self.graph[idx])
            .collect()
    }

    /// Outgoing edges of a node, in definition order.
    pub fn outgoing_edges(
        &self,
        nid: &str,
    ) -> Vec<&EdgeModel> {
        let Some(idx) = self.index.get(nid) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self.graph.edges_directed(*idx, Direction::Outgoing).collect();
        edges.sort_by_key(|e| e.id().index());
        edges.into_iter().map(|e| e.weight()).collect()
    }

    /// normalized node name -> node id
    pub fn names(&self) -> &HashMap<String, String> {
        &self.names
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }
}

impl TryFrom<&WorkflowModel> for Graph {
    type Error = TrigflowError;

    fn try_from(model: &WorkflowModel) -> Result<Self> {
        model.validate()?;

        let mut graph = DiGraph::with_capacity(model.nodes.len(), model.edges.len());
        let mut index = HashMap::new();
        let mut names = HashMap::new();

        for node in &model.nodes {
            let idx = graph.add_node(node.clone());
            index.insert(node.id.clone(), idx);
            if !node.text.is_empty() {
                // later nodes shadow earlier ones with the same normalized label
                names.insert(normalize_name(&node.text), node.id.clone());
            }
        }

        for edge in &model.edges {
            let from = index.get(&edge.start.id).ok_or(TrigflowError::Edge(format!("source node {} not found", edge.start.id)))?;
            let to = index.get(&edge.end.id).ok_or(TrigflowError::Edge(format!("target node {} not found", edge.end.id)))?;
            graph.add_edge(*from, *to, edge.clone());
        }

        Ok(Self {
            workflow_id: model.id.clone(),
            name: model.name.clone(),
            graph,
            index,
            names,
        })
    }
}
