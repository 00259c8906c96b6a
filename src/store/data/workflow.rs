use serde::{Deserialize, Serialize};

use crate::model::WorkflowModel;

/// Persisted lifecycle status of a workflow.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr, strum::EnumString, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum WorkflowStatus {
    Inactive,
    Queued,
    Listening,
    Running,
    Error,
    Stopped,
    InsufficientCredits,
}

impl WorkflowStatus {
    /// Statuses recovered by a restart.
    pub const RECOVERABLE: [WorkflowStatus; 3] = [WorkflowStatus::Listening, WorkflowStatus::Running, WorkflowStatus::Queued];
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StoredWorkflow {
    pub definition: WorkflowModel,
    pub owner_id: String,
    pub status: WorkflowStatus,
}
