use serde::{Deserialize, Serialize};

/// Terminal (or in-progress) status of one execution pass.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::EnumString, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RunStatus {
    Started,
    Completed,
    Error,
    Stopped,
    InsufficientCredits,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RunRecord {
    pub id: String,
    pub workflow_id: String,
    pub owner_id: String,
    pub name: String,

    pub status: RunStatus,
    pub log: String,
    pub resource_units: f64,
    pub start_time: i64,
    pub end_time: i64,
}
