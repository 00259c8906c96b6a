use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

use crate::{
    Result,
    common::MemCache,
    model::NodeModel,
    runtime::{RunContext, TriggerContext},
    triggers::{ResourceHandle, TriggerAdapter},
};

const EVENT_TYPE: &str = "webhook";

/// Registration of one listening webhook workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRoute {
    pub workflow_id: String,
    pub owner_id: String,
    pub node_id: String,
    /// accepted HTTP method, any when unset
    pub method: Option<String>,
}

/// Webhook routes of all listening workflows, keyed by workflow id.
///
/// The HTTP front end (outside this crate) looks a route up and forwards the
/// request through [`Scheduler::dispatch_trigger`](crate::Scheduler::dispatch_trigger).
pub struct WebhookRoutes {
    routes: MemCache<String, WebhookRoute>,
}

impl Default for WebhookRoutes {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookRoutes {
    pub fn new() -> Self {
        Self {
            routes: MemCache::unbounded(),
        }
    }

    pub fn get(
        &self,
        workflow_id: &str,
    ) -> Option<WebhookRoute> {
        self.routes.get(&workflow_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// `webhook-listener`: starts a pass for every inbound webhook request.
pub struct WebhookListener {
    routes: Arc<WebhookRoutes>,
}

impl WebhookListener {
    pub fn new(routes: Arc<WebhookRoutes>) -> Self {
        Self {
            routes,
        }
    }
}

#[async_trait]
impl TriggerAdapter for WebhookListener {
    fn name(&self) -> &str {
        "webhook-listener"
    }

    async fn setup(
        &self,
        ctx: &TriggerContext,
        node: &NodeModel,
    ) -> Result<Option<ResourceHandle>> {
        let route = WebhookRoute {
            workflow_id: ctx.workflow_id().to_string(),
            owner_id: ctx.owner_id().to_string(),
            node_id: node.id.clone(),
            method: node.parameters.get("method").and_then(Value::as_str).map(str::to_uppercase),
        };
        info!(workflow_id = route.workflow_id, node_id = route.node_id, method = ?route.method, "webhook registered");
        self.routes.routes.set(route.workflow_id.clone(), route.clone());

        // only drop the route if a newer registration has not replaced it
        let routes = self.routes.clone();
        Ok(Some(ResourceHandle::new(format!("webhook:{}", node.id), move || {
            routes.routes.remove_if(route.workflow_id.clone(), |current| *current == route);
        })))
    }

    fn validate(
        &self,
        event: &Value,
        _node: &NodeModel,
    ) -> bool {
        event.get("type").and_then(Value::as_str) == Some(EVENT_TYPE)
    }

    async fn process(
        &self,
        event: &Value,
        _ctx: &RunContext,
    ) -> Result<Value> {
        let field = |key: &str| event.get(key).cloned().unwrap_or_else(|| json!({}));
        Ok(json!({
            "method": event.get("method").cloned().unwrap_or(Value::Null),
            "headers": field("headers"),
            "body": field("body"),
            "query": field("query"),
            "params": field("params"),
        }))
    }
}
