use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Node category, which decides how the dispatcher resolves the node's tool.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeCategory {
    Trigger,
    #[default]
    Action,
    Utility,
    Control,
    Custom,
    Widget,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeModel {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub category: NodeCategory,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// human label, also the name templates use to address this node's output
    #[serde(default)]
    pub text: String,
    #[serde(rename = "requiresOAuth", default)]
    pub requires_oauth: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_provider: Option<String>,
}

impl NodeModel {
    pub fn is_trigger(&self) -> bool {
        self.category == NodeCategory::Trigger
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_node_deserialize() {
        let node: NodeModel = serde_json::from_value(json!({
            "id": "n1",
            "type": "send-email",
            "category": "action",
            "text": "Send Mail",
            "parameters": { "to": "{{trigger.email}}" },
            "requiresOAuth": true,
            "oauthProvider": "google"
        }))
        .unwrap();
        assert_eq!(node.node_type, "send-email");
        assert_eq!(node.category, NodeCategory::Action);
        assert!(node.requires_oauth);
        assert_eq!(node.oauth_provider.as_deref(), Some("google"));
    }

    #[test]
    fn test_unknown_category() {
        let node: NodeModel = serde_json::from_value(json!({"id": "n1", "type": "x", "category": "mcp"})).unwrap();
        assert_eq!(node.category, NodeCategory::Other);
    }
}
