//! Node dispatcher.
//!
//! Resolves a graph node to its executable behavior, invokes it with resolved
//! parameters and records its lifecycle. A node failure never unwinds past
//! [`Dispatcher::execute`]; it comes back as data in [`DispatchResult`].

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Instant,
};

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::{
    Result, TrigflowError,
    events::{ErrorReason, GraphEvent, NodeEvent},
    model::{NodeCategory, NodeModel},
    runtime::{RunContext, Services},
    store::data::{NodeRecordUpdate, NodeStatus},
    tools::STOP_WORKFLOW,
    utils,
    workflow::{
        Graph,
        template::{self, TemplateScope},
    },
};

pub(crate) const DEFAULT_STOP_REASON: &str = "Workflow stopped by Stop Workflow node";

/// Mutable state of one execution pass, owned by the runner's walk.
#[derive(Debug, Default)]
pub(crate) struct PassState {
    pub trigger: Value,
    pub outputs: HashMap<String, Value>,
    pub errors: HashMap<String, String>,
    pub edge_iterations: HashMap<String, u32>,
    pub active_edges: BTreeSet<String>,
    pub log: Vec<String>,
    pub resource_units: f64,
}

impl PassState {
    pub fn new(trigger: Value) -> Self {
        Self {
            trigger,
            ..Default::default()
        }
    }

    pub fn scope<'a>(
        &'a self,
        names: &'a HashMap<String, String>,
        nested: bool,
    ) -> TemplateScope<'a> {
        TemplateScope {
            trigger: &self.trigger,
            outputs: &self.outputs,
            names,
            nested,
        }
    }

    pub fn log(
        &mut self,
        line: impl AsRef<str>,
    ) {
        let at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        self.log.push(format!("[{at}] {}", line.as_ref()));
    }

    pub fn log_text(&self) -> String {
        self.log.join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeErrorKind {
    Failed,
    ResourceExhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeError {
    pub message: String,
    pub kind: NodeErrorKind,
}

/// Normalized outcome of one node execution.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub output: Option<Value>,
    pub error: Option<NodeError>,
    pub resource_units: f64,
}

impl DispatchResult {
    pub fn is_resource_exhausted(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.kind == NodeErrorKind::ResourceExhausted)
    }
}

pub(crate) struct Dispatcher {
    graph: Arc<Graph>,
    services: Arc<Services>,
}

impl Dispatcher {
    pub fn new(
        graph: Arc<Graph>,
        services: Arc<Services>,
    ) -> Self {
        Self {
            graph,
            services,
        }
    }

    /// Execute `node` with `input`, recording the result in `state`.
    pub async fn execute(
        &self,
        ctx: &RunContext,
        node: &NodeModel,
        input: &Value,
        state: &mut PassState,
    ) -> DispatchResult {
        let ctx = ctx.for_node(&node.id);
        let store = &self.services.store;

        if let Err(e) = store.create_node_record(ctx.run_id(), &node.id, input).await {
            warn!(run_id = ctx.run_id(), node_id = node.id, error = %e, "failed to create node record");
        }
        self.emit(&ctx, NodeEvent::Running(utils::time::time_millis()));
        debug!(workflow_id = ctx.workflow_id(), node_id = node.id, node_type = node.node_type, "dispatch node");

        let started = Instant::now();
        let result = self.invoke(&ctx, node, input, state).await.and_then(check_error_field);
        let elapsed = started.elapsed();
        let duration_ms = elapsed.as_millis() as u64;

        let output = match result {
            Ok(output) => output,
            Err(e) => return self.fail(&ctx, node, state, e, duration_ms).await,
        };

        let units = if self.services.config.non_metered_node_types.iter().any(|t| *t == node.node_type) { 0.0 } else { elapsed.as_secs_f64() };
        let update = NodeRecordUpdate {
            status: NodeStatus::Completed,
            output: Some(output.clone()),
            error: None,
            duration_ms,
            resource_units: units,
        };
        if let Err(e) = store.update_node_record(ctx.run_id(), &node.id, update).await {
            if e.is_resource_exhausted() {
                return self.fail(&ctx, node, state, e, duration_ms).await;
            }
            warn!(run_id = ctx.run_id(), node_id = node.id, error = %e, "failed to complete node record");
        }

        info!(workflow_id = ctx.workflow_id(), node_id = node.id, duration_ms, units, "node completed");
        state.outputs.insert(node.id.clone(), output.clone());
        state.resource_units += units;
        state.log(format!("Node {} ({}) completed in {duration_ms}ms", node.id, node.node_type));
        self.emit(&ctx, NodeEvent::Succeeded(duration_ms));

        DispatchResult {
            output: Some(output),
            error: None,
            resource_units: units,
        }
    }

    async fn invoke(
        &self,
        ctx: &RunContext,
        node: &NodeModel,
        input: &Value,
        state: &PassState,
    ) -> Result<Value> {
        let services = &self.services;

        if node.is_trigger() {
            let adapter = services.triggers.resolve(&node.node_type).ok_or(TrigflowError::Trigger(format!("Invalid trigger type: {}", node.node_type)))?;
            return adapter.process(input, ctx).await;
        }

        let scope = state.scope(self.graph.names(), services.config.nested_placeholders);
        let mut params = template::resolve_parameters(&scope, &node.parameters);

        if node.node_type == STOP_WORKFLOW {
            let reason = params.get_str("reason").filter(|r| !r.trim().is_empty()).unwrap_or_else(|| DEFAULT_STOP_REASON.to_string());
            info!(workflow_id = ctx.workflow_id(), node_id = node.id, reason, "stop requested by node");
            ctx.request_stop(&reason);
            return Ok(json!({ "stopped": true, "reason": reason }));
        }

        if node.requires_oauth {
            if let Some(provider) = node.oauth_provider.as_deref() {
                let token = services.credentials.get_valid_access_token(ctx.owner_id(), provider).await?;
                params.set("accessToken", token);
            }
        }

        if node.category == NodeCategory::Custom {
            return services.scripts.run(&node.node_type, params, input.clone(), ctx).await;
        }

        let tool = services.tools.resolve(&node.node_type, node.category).ok_or(TrigflowError::Tool(format!("Tool not found: {}", node.node_type)))?;
        if let Some(schema) = tool.schema() {
            let validator = jsonschema::validator_for(&schema)?;
            let instance: Value = params.clone().into();
            validator.validate(&instance)?;
        }
        tool.execute(params, input.clone(), ctx).await
    }

    async fn fail(
        &self,
        ctx: &RunContext,
        node: &NodeModel,
        state: &mut PassState,
        error: TrigflowError,
        duration_ms: u64,
    ) -> DispatchResult {
        let kind = if error.is_resource_exhausted() { NodeErrorKind::ResourceExhausted } else { NodeErrorKind::Failed };
        let message = error.to_string();
        warn!(workflow_id = ctx.workflow_id(), node_id = node.id, error = message, "node failed");

        state.outputs.insert(node.id.clone(), json!({ "error": message }));
        state.errors.insert(node.id.clone(), message.clone());
        state.log(format!("Node {} ({}) failed: {message}", node.id, node.node_type));

        let update = NodeRecordUpdate {
            status: NodeStatus::Failed,
            output: None,
            error: Some(message.clone()),
            duration_ms,
            resource_units: 0.0,
        };
        if let Err(e) = self.services.store.update_node_record(ctx.run_id(), &node.id, update).await {
            warn!(run_id = ctx.run_id(), node_id = node.id, error = %e, "failed to record node failure");
        }

        let reason = match kind {
            NodeErrorKind::ResourceExhausted => ErrorReason::ResourceExhausted(message.clone()),
            NodeErrorKind::Failed => ErrorReason::Failed(message.clone()),
        };
        self.emit(ctx, NodeEvent::Error(reason));

        DispatchResult {
            output: None,
            error: Some(NodeError {
                message,
                kind,
            }),
            resource_units: 0.0,
        }
    }

    fn emit(
        &self,
        ctx: &RunContext,
        event: NodeEvent,
    ) {
        self.services.channel.emit(ctx.workflow_id(), ctx.owner_id(), ctx.node_id(), GraphEvent::Node(event));
    }
}

/// An output object carrying a non-null `error` field is a failure.
fn check_error_field(output: Value) -> Result<Value> {
    match output.get("error") {
        None | Some(Value::Null) => Ok(output),
        Some(Value::String(msg)) => Err(TrigflowError::Node(msg.clone())),
        Some(other) => Err(TrigflowError::Node(other.to_string())),
    }
}
