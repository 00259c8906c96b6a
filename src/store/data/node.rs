use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::EnumString, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeStatus {
    Started,
    Completed,
    Failed,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct NodeRecord {
    pub id: String,
    pub run_id: String,
    pub node_id: String,

    pub status: NodeStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub err: Option<String>,
    pub duration_ms: u64,
    pub resource_units: f64,
    pub timestamp: i64,
}

/// Completion data for a node record.
#[derive(Debug, Clone)]
pub struct NodeRecordUpdate {
    pub status: NodeStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
    /// metered units charged for this execution, one per elapsed second
    pub resource_units: f64,
}
