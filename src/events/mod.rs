//! Event types emitted while workflows are activated and run.
//!
//! Events flow through the in-process [`Channel`](crate::runtime::Channel);
//! the scheduler's monitor forwards workflow status events to the
//! status broadcaster.

mod node;
mod workflow;

pub use node::*;
pub use workflow::*;

/// Generic event wrapper.
#[derive(Debug, Clone)]
pub struct Event<T> {
    inner: T,
}

#[derive(Debug, Clone)]
pub enum GraphEvent {
    /// Workflow lifecycle transitions.
    Workflow(WorkflowEvent),
    /// Per-node dispatch events.
    Node(NodeEvent),
}

/// Event message with its workflow and node context.
#[derive(Debug, Clone)]
pub struct Message {
    /// Workflow that generated this event.
    pub wid: String,
    /// Owner of the workflow.
    pub owner: String,
    /// Node that generated this event (empty for workflow events).
    pub nid: String,
    pub event: GraphEvent,
}

/// Run log line emitted during a pass.
#[derive(Debug, Clone)]
pub struct Log {
    pub wid: String,
    pub run_id: String,
    pub nid: String,
    pub content: String,
    /// milliseconds since epoch
    pub timestamp: i64,
}

impl<T> std::ops::Deref for Event<T>
where
    T: std::fmt::Debug + Clone,
{
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> Event<T>
where
    T: std::fmt::Debug + Clone,
{
    pub fn new(inner: &T) -> Self {
        Self {
            inner: inner.clone(),
        }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl GraphEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GraphEvent::Workflow(WorkflowEvent::Stopped(_) | WorkflowEvent::InsufficientResource(_)))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, GraphEvent::Workflow(WorkflowEvent::Error(_)))
    }
}
