use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgeEndpoint {
    pub id: String,
}

/// How a compound clause combines with the clauses before it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Logic {
    #[default]
    And,
    Or,
}

/// A single `if <condition> value` predicate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConditionClause {
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub if_expr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default)]
    pub logic: Logic,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeModel {
    pub id: String,
    pub start: EdgeEndpoint,
    pub end: EdgeEndpoint,
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub if_expr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// per-edge traversal cap; a number or a template resolving to one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<Value>,
    /// compound form; when non-empty it replaces the single condition above
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionClause>,
}

impl EdgeModel {
    pub fn new(
        id: &str,
        start: &str,
        end: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            start: EdgeEndpoint {
                id: start.to_string(),
            },
            end: EdgeEndpoint {
                id: end.to_string(),
            },
            ..Default::default()
        }
    }

    /// The single-condition form of this edge.
    pub fn clause(&self) -> ConditionClause {
        ConditionClause {
            if_expr: self.if_expr.clone(),
            condition: self.condition.clone(),
            value: self.value.clone(),
            logic: Logic::And,
        }
    }
}
