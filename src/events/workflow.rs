use serde_json::{Value, json};

use crate::store::data::WorkflowStatus;

#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    Queued,
    Listening,
    Running,
    Error(WorkflowErrorEvent),
    Stopped(WorkflowStoppedEvent),
    InsufficientResource(WorkflowStoppedEvent),
}

impl WorkflowEvent {
    pub fn status(&self) -> WorkflowStatus {
        match self {
            WorkflowEvent::Queued => WorkflowStatus::Queued,
            WorkflowEvent::Listening => WorkflowStatus::Listening,
            WorkflowEvent::Running => WorkflowStatus::Running,
            WorkflowEvent::Error(_) => WorkflowStatus::Error,
            WorkflowEvent::Stopped(_) => WorkflowStatus::Stopped,
            WorkflowEvent::InsufficientResource(_) => WorkflowStatus::InsufficientCredits,
        }
    }

    /// Broadcast payload for this transition.
    pub fn payload(
        &self,
        wid: &str,
    ) -> Value {
        let mut payload = json!({
            "workflowId": wid,
            "status": self.status().as_ref(),
        });
        match self {
            WorkflowEvent::Error(e) => {
                payload["globalError"] = e.global_error.clone().map(Value::String).unwrap_or(Value::Null);
                payload["nodeErrors"] = Value::Object(e.node_errors.clone());
            }
            WorkflowEvent::Stopped(e) | WorkflowEvent::InsufficientResource(e) => {
                payload["reason"] = Value::String(e.reason.clone());
            }
            _ => {}
        }
        payload
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowErrorEvent {
    pub global_error: Option<String>,
    /// node id -> message
    pub node_errors: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct WorkflowStoppedEvent {
    pub reason: String,
}
