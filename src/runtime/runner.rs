//! Workflow runner.
//!
//! A [`Runner`] owns one workflow's live state. It is an actor: a single task
//! consumes [`RunnerCommand`]s from the runner's queue and performs one
//! execution pass at a time, so trigger events for a busy runner wait their
//! turn. Other call sites only touch the stop flag, the handle list and the
//! published [`RunnerSnapshot`].

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::{
    Result, TrigflowError,
    common::{MemCache, Queue, Shutdown},
    events::{GraphEvent, WorkflowErrorEvent, WorkflowEvent, WorkflowStoppedEvent},
    model::{EdgeModel, WorkflowModel},
    runtime::{
        RunContext, Services, StopSignal, TriggerContext, TriggerSender,
        dispatcher::{DEFAULT_STOP_REASON, Dispatcher, PassState},
    },
    store::data::{RunStatus, WorkflowStatus},
    triggers::ResourceHandle,
    utils,
    workflow::{Graph, condition, template},
};

/// Message consumed by a runner's actor task.
pub enum RunnerCommand {
    /// Run one pass for `data`; the outcome goes to `reply` when present.
    Trigger {
        data: Value,
        reply: Option<oneshot::Sender<RunOutcome>>,
    },
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::AsRefStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OutcomeStatus {
    Completed,
    Error,
    Stopped,
    InsufficientResource,
}

/// Result of one execution pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub run_id: Option<String>,
    pub status: OutcomeStatus,
    pub outputs: HashMap<String, Value>,
    /// node id -> message; empty whenever `global_error` is set
    pub errors: HashMap<String, String>,
    pub global_error: Option<String>,
    pub stop_reason: Option<String>,
    pub resource_units: f64,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }
}

/// Latest observable state of a runner.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerSnapshot {
    pub status: WorkflowStatus,
    pub outputs: HashMap<String, Value>,
    pub errors: HashMap<String, String>,
    pub current_node_id: Option<String>,
    pub active_edges: Vec<String>,
    pub last_run_id: Option<String>,
}

impl Default for RunnerSnapshot {
    fn default() -> Self {
        Self {
            status: WorkflowStatus::Queued,
            outputs: HashMap::new(),
            errors: HashMap::new(),
            current_node_id: None,
            active_edges: Vec::new(),
            last_run_id: None,
        }
    }
}

/// Trigger nodes that failed to set up, node id -> message.
#[derive(Debug, Clone, Default)]
pub struct SetupReport {
    pub errors: HashMap<String, String>,
}

impl SetupReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Clone, Default)]
pub struct RunnerOptions {
    pub owner_id: String,
    /// sub-workflow nesting level
    pub depth: usize,
    /// start from root nodes and never persist or broadcast workflow status
    pub sub_workflow: bool,
    /// data of the parent run, underlying every trigger payload
    pub parent_input: Option<Value>,
    /// live-runner registry this runner removes itself from on teardown
    pub registry: Option<Arc<MemCache<String, Runner>>>,
}

/// Why a walk ended before its queue emptied.
enum Halt {
    Stopped,
    Exhausted(String),
}

struct RunnerInner {
    instance_id: String,
    workflow_id: String,
    options: RunnerOptions,
    graph: Arc<Graph>,
    services: Arc<Services>,
    dispatcher: Dispatcher,
    commands: Arc<Queue<RunnerCommand>>,
    snapshot: watch::Sender<RunnerSnapshot>,
    stop: Arc<StopSignal>,
    handles: Mutex<Vec<ResourceHandle>>,
    torn_down: AtomicBool,
    shutdown: Arc<Shutdown>,
}

/// Cheap-clone handle to a live workflow runner.
#[derive(Clone)]
pub struct Runner {
    inner: Arc<RunnerInner>,
}

impl Runner {
    /// Build a runner for `model` and start its actor task.
    pub fn new(
        model: &WorkflowModel,
        options: RunnerOptions,
        services: Arc<Services>,
    ) -> Result<Runner> {
        let graph = Arc::new(Graph::try_from(model)?);
        let (snapshot, _) = watch::channel(RunnerSnapshot::default());

        let runner = Runner {
            inner: Arc::new(RunnerInner {
                instance_id: utils::longid(),
                workflow_id: model.id.clone(),
                options,
                dispatcher: Dispatcher::new(graph.clone(), services.clone()),
                graph,
                commands: Queue::new(services.config.command_queue_size),
                snapshot,
                stop: Arc::new(StopSignal::new()),
                handles: Mutex::new(Vec::new()),
                torn_down: AtomicBool::new(false),
                shutdown: Arc::new(Shutdown::new()),
                services,
            }),
        };
        runner.start();
        debug!(workflow_id = runner.workflow_id(), instance_id = runner.instance_id(), "runner created");
        Ok(runner)
    }

    fn start(&self) {
        let runner = self.clone();
        let shutdown = self.inner.shutdown.clone();
        let commands = self.inner.commands.clone();

        self.inner.services.runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    cmd = commands.next_async() => match cmd {
                        Some(RunnerCommand::Trigger { data, reply }) => {
                            let outcome = runner.run_pass(data).await;
                            if let Some(reply) = reply {
                                let _ = reply.send(outcome);
                            }
                            if runner.is_torn_down() {
                                break;
                            }
                        }
                        Some(RunnerCommand::Stop) | None => break,
                    }
                }
            }
            debug!(workflow_id = runner.workflow_id(), "runner loop exited");
        });
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.instance_id
    }

    pub fn workflow_id(&self) -> &str {
        &self.inner.workflow_id
    }

    pub fn owner_id(&self) -> &str {
        &self.inner.options.owner_id
    }

    pub fn snapshot(&self) -> RunnerSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::SeqCst)
    }

    /// Invoke `setup` of every trigger node's adapter.
    ///
    /// A failing node does not keep the others from being set up. Nodes whose
    /// type has no adapter are skipped with a warning.
    pub async fn setup_triggers(&self) -> SetupReport {
        let services = &self.inner.services;
        let ctx = TriggerContext::new(self.workflow_id(), self.owner_id(), TriggerSender::new(self.inner.commands.clone()), services.runtime.clone());

        let mut report = SetupReport::default();
        for node in self.inner.graph.trigger_nodes() {
            let Some(adapter) = services.triggers.resolve(&node.node_type) else {
                warn!(workflow_id = self.workflow_id(), node_id = node.id, node_type = node.node_type, "no adapter for trigger type");
                continue;
            };
            match adapter.setup(&ctx, node).await {
                Ok(Some(handle)) => self.hold(handle),
                Ok(None) => {}
                Err(e) => {
                    warn!(workflow_id = self.workflow_id(), node_id = node.id, error = %e, "trigger setup failed");
                    report.errors.insert(node.id.clone(), e.to_string());
                }
            }
        }

        let errors = report.errors.clone();
        self.inner.snapshot.send_modify(|s| s.errors = errors);
        report
    }

    fn hold(
        &self,
        handle: ResourceHandle,
    ) {
        let mut handles = self.inner.handles.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_torn_down() {
            drop(handles);
            handle.release();
            return;
        }
        handles.push(handle);
    }

    /// Queue a pass for `data` without waiting for it.
    pub async fn trigger(
        &self,
        data: Value,
    ) -> Result<()> {
        self.ensure_live()?;
        self.inner
            .commands
            .send_async(RunnerCommand::Trigger {
                data,
                reply: None,
            })
            .await
    }

    /// Queue a pass for `data` and wait for its outcome.
    pub async fn trigger_and_wait(
        &self,
        data: Value,
    ) -> Result<RunOutcome> {
        self.ensure_live()?;
        let (tx, rx) = oneshot::channel();
        self.inner
            .commands
            .send_async(RunnerCommand::Trigger {
                data,
                reply: Some(tx),
            })
            .await?;
        rx.await.map_err(|_| TrigflowError::Runtime(format!("runner of workflow {} went away before the run finished", self.workflow_id())))
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_torn_down() {
            return Err(TrigflowError::Runtime(format!("runner of workflow {} is torn down", self.workflow_id())));
        }
        Ok(())
    }

    /// Request a cooperative stop on behalf of the caller, who then owns the
    /// persisted `stopped` status.
    pub fn stop(
        &self,
        reason: &str,
    ) {
        info!(workflow_id = self.workflow_id(), reason, "stop requested");
        self.inner.stop.request_external(reason);
        let _ = self.inner.commands.try_send(RunnerCommand::Stop);
    }

    /// Release every listener and timer and leave the registry. Idempotent.
    pub async fn teardown(&self) {
        if self.inner.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.stop.request_external("Workflow torn down");

        let handles: Vec<_> = self.inner.handles.lock().unwrap_or_else(PoisonError::into_inner).drain(..).collect();
        for handle in handles {
            handle.release();
        }

        let triggers = &self.inner.services.triggers;
        for node in self.inner.graph.trigger_nodes() {
            if let Some(adapter) = triggers.resolve(&node.node_type) {
                if let Err(e) = adapter.teardown(node).await {
                    warn!(workflow_id = self.workflow_id(), node_id = node.id, error = %e, "trigger teardown failed");
                }
            }
        }

        self.inner.shutdown.shutdown();
        // pending waiters see their reply channel close
        while self.inner.commands.try_next().is_some() {}

        if let Some(registry) = &self.inner.options.registry {
            let instance_id = self.instance_id().to_string();
            registry.remove_if(self.workflow_id().to_string(), |r| r.instance_id() == instance_id);
        }
        info!(workflow_id = self.workflow_id(), instance_id = self.instance_id(), "runner torn down");
    }

    /// Persist and announce a workflow status. Sub-workflow runners only
    /// update their snapshot.
    pub(crate) async fn transition(
        &self,
        event: WorkflowEvent,
    ) {
        let status = event.status();
        self.inner.snapshot.send_modify(|s| s.status = status);
        if self.inner.options.sub_workflow {
            return;
        }

        let services = &self.inner.services;
        if let Err(e) = services.store.update_workflow_status(self.workflow_id(), status).await {
            warn!(workflow_id = self.workflow_id(), status = status.as_ref(), error = %e, "failed to persist workflow status");
        }
        services.channel.emit(self.workflow_id(), self.owner_id(), "", GraphEvent::Workflow(event));
    }

    async fn run_pass(
        &self,
        data: Value,
    ) -> RunOutcome {
        let inner = &self.inner;
        let services = &inner.services;
        let workflow_id = self.workflow_id();

        let trigger = match &inner.options.parent_input {
            Some(parent) => merge_objects(parent, &data),
            None => data.clone(),
        };
        let mut state = PassState::new(trigger);

        if inner.stop.is_requested() {
            return self.stopped_outcome(None, &state);
        }

        let run_id = match services.store.create_run_record(workflow_id, self.owner_id(), inner.graph.name()).await {
            Ok(id) => id,
            Err(e) => return self.fatal(None, &mut state, format!("Failed to create run record: {e}")).await,
        };
        info!(workflow_id, run_id, "run started");
        state.log(format!("Run {run_id} started"));

        inner.snapshot.send_modify(|s| {
            s.outputs.clear();
            s.errors.clear();
            s.active_edges.clear();
            s.current_node_id = None;
            s.last_run_id = Some(run_id.clone());
        });
        if !inner.options.sub_workflow {
            self.transition(WorkflowEvent::Running).await;
        }

        let ctx = RunContext::new(workflow_id, self.owner_id(), &run_id, inner.options.depth, inner.stop.clone(), services.clone());
        let start_nodes = match self.start_nodes(&data) {
            Ok(nodes) => nodes,
            Err(message) => return self.fatal(Some(&run_id), &mut state, message).await,
        };
        let input = state.trigger.clone();

        let halt = self.walk(&ctx, &mut state, start_nodes, input).await;

        match halt {
            Some(Halt::Exhausted(message)) => self.finish_exhausted(&run_id, &mut state, message).await,
            Some(Halt::Stopped) => self.finish_stopped(&run_id, &mut state).await,
            None if !state.errors.is_empty() => self.finish_error(&run_id, &mut state).await,
            None => self.finish_completed(&run_id, &mut state).await,
        }
    }

    /// Start nodes for `data`: root nodes for a sub-workflow, otherwise the
    /// trigger nodes whose adapter accepts the event.
    fn start_nodes(
        &self,
        data: &Value,
    ) -> std::result::Result<Vec<String>, String> {
        let graph = &self.inner.graph;

        if self.inner.options.sub_workflow {
            let roots: Vec<String> = graph.root_nodes().into_iter().map(|n| n.id.clone()).collect();
            if roots.is_empty() {
                return Err("No valid start nodes found for sub-workflow".to_string());
            }
            return Ok(roots);
        }

        let triggers = &self.inner.services.triggers;
        let matched: Vec<String> = graph
            .trigger_nodes()
            .filter(|node| triggers.resolve(&node.node_type).is_none_or(|adapter| adapter.validate(data, node)))
            .map(|node| node.id.clone())
            .collect();
        if !matched.is_empty() {
            return Ok(matched);
        }

        match graph.first_node() {
            Some(node) => {
                warn!(workflow_id = self.workflow_id(), node_id = node.id, "no trigger matched, starting from first node");
                Ok(vec![node.id.clone()])
            }
            None => Err("No valid start nodes found".to_string()),
        }
    }

    async fn walk(
        &self,
        ctx: &RunContext,
        state: &mut PassState,
        start_nodes: Vec<String>,
        input: Value,
    ) -> Option<Halt> {
        let inner = &self.inner;
        let graph = &inner.graph;
        let config = &inner.services.config;

        let mut queue: VecDeque<(String, Value)> = start_nodes.into_iter().map(|id| (id, input.clone())).collect();

        while let Some((node_id, input)) = queue.pop_front() {
            if inner.stop.is_requested() {
                return Some(Halt::Stopped);
            }
            let Some(node) = graph.node(&node_id) else {
                warn!(workflow_id = self.workflow_id(), node_id, "queued node not in graph");
                continue;
            };
            inner.snapshot.send_modify(|s| s.current_node_id = Some(node_id.clone()));

            let result = inner.dispatcher.execute(ctx, node, &input, state).await;
            self.publish(state);
            tokio::task::yield_now().await;

            if let Some(error) = &result.error {
                if result.is_resource_exhausted() {
                    return Some(Halt::Exhausted(error.message.clone()));
                }
                continue;
            }
            if inner.stop.is_requested() {
                return Some(Halt::Stopped);
            }

            let output = result.output.unwrap_or(Value::Null);
            for edge in graph.outgoing_edges(&node_id) {
                let count = state.edge_iterations.get(&edge.id).copied().unwrap_or(0);
                if let Some(cap) = self.edge_cap(edge, state) {
                    if count >= cap {
                        debug!(workflow_id = self.workflow_id(), edge_id = edge.id, cap, "edge iteration cap reached");
                        continue;
                    }
                }
                if count >= config.global_max_iterations {
                    warn!(workflow_id = self.workflow_id(), edge_id = edge.id, limit = config.global_max_iterations, "global iteration limit reached, halting walk");
                    state.log(format!("Edge {} reached the iteration limit of {}", edge.id, config.global_max_iterations));
                    return None;
                }

                let traverse = condition::evaluate(edge, &state.scope(graph.names(), config.nested_placeholders));
                if traverse {
                    queue.push_back((edge.end.id.clone(), output.clone()));
                    state.active_edges.insert(edge.id.clone());
                    *state.edge_iterations.entry(edge.id.clone()).or_default() += 1;
                }
            }
            self.publish(state);
        }
        None
    }

    /// Per-edge traversal cap; unset or unparsable means unbounded.
    fn edge_cap(
        &self,
        edge: &EdgeModel,
        state: &PassState,
    ) -> Option<u32> {
        let raw = edge.max_iterations.as_ref()?;
        let scope = state.scope(self.inner.graph.names(), self.inner.services.config.nested_placeholders);
        let text = match raw {
            Value::Number(n) => n.to_string(),
            Value::String(s) => template::resolve_template(&scope, s),
            _ => return None,
        };
        let cap = text.trim().parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0).map(|v| v as u32);
        if cap.is_none() {
            debug!(edge_id = edge.id, max_iterations = text, "invalid maxIterations, edge is unbounded");
        }
        cap
    }

    fn publish(
        &self,
        state: &PassState,
    ) {
        self.inner.snapshot.send_modify(|s| {
            s.outputs = state.outputs.clone();
            s.errors = state.errors.clone();
            s.active_edges = state.active_edges.iter().cloned().collect();
        });
    }

    async fn close_run(
        &self,
        run_id: &str,
        status: RunStatus,
        state: &PassState,
    ) {
        if let Err(e) = self.inner.services.store.update_run_record(run_id, status, &state.log_text(), state.resource_units).await {
            warn!(workflow_id = self.workflow_id(), run_id, error = %e, "failed to close run record");
        }
    }

    fn outcome(
        &self,
        run_id: Option<&str>,
        status: OutcomeStatus,
        state: &PassState,
    ) -> RunOutcome {
        RunOutcome {
            run_id: run_id.map(str::to_string),
            status,
            outputs: state.outputs.clone(),
            errors: state.errors.clone(),
            global_error: None,
            stop_reason: None,
            resource_units: state.resource_units,
        }
    }

    fn stopped_outcome(
        &self,
        run_id: Option<&str>,
        state: &PassState,
    ) -> RunOutcome {
        RunOutcome {
            stop_reason: Some(self.inner.stop.reason().unwrap_or_else(|| DEFAULT_STOP_REASON.to_string())),
            ..self.outcome(run_id, OutcomeStatus::Stopped, state)
        }
    }

    async fn finish_completed(
        &self,
        run_id: &str,
        state: &mut PassState,
    ) -> RunOutcome {
        info!(workflow_id = self.workflow_id(), run_id, units = state.resource_units, "run completed");
        state.log("Run completed");
        self.close_run(run_id, RunStatus::Completed, state).await;
        self.transition(WorkflowEvent::Listening).await;
        self.outcome(Some(run_id), OutcomeStatus::Completed, state)
    }

    async fn finish_error(
        &self,
        run_id: &str,
        state: &mut PassState,
    ) -> RunOutcome {
        warn!(workflow_id = self.workflow_id(), run_id, errors = state.errors.len(), "run finished with node errors");
        state.log(format!("Run finished with {} node error(s)", state.errors.len()));
        self.close_run(run_id, RunStatus::Error, state).await;

        let node_errors: Map<String, Value> = state.errors.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect();
        self.transition(WorkflowEvent::Error(WorkflowErrorEvent {
            global_error: None,
            node_errors,
        }))
        .await;
        self.outcome(Some(run_id), OutcomeStatus::Error, state)
    }

    async fn finish_stopped(
        &self,
        run_id: &str,
        state: &mut PassState,
    ) -> RunOutcome {
        let outcome = self.stopped_outcome(Some(run_id), state);
        let reason = outcome.stop_reason.clone().unwrap_or_default();
        info!(workflow_id = self.workflow_id(), run_id, reason, "run stopped");
        state.log(format!("Run stopped: {reason}"));
        self.close_run(run_id, RunStatus::Stopped, state).await;

        // an external stop is persisted by whoever requested it
        if !self.inner.stop.is_external() {
            self.transition(WorkflowEvent::Stopped(WorkflowStoppedEvent {
                reason,
            }))
            .await;
        }
        self.teardown().await;
        outcome
    }

    async fn finish_exhausted(
        &self,
        run_id: &str,
        state: &mut PassState,
        message: String,
    ) -> RunOutcome {
        warn!(workflow_id = self.workflow_id(), run_id, message, "run ended on insufficient resources");
        state.log(format!("Run ended: {message}"));
        self.close_run(run_id, RunStatus::InsufficientCredits, state).await;
        self.transition(WorkflowEvent::InsufficientResource(WorkflowStoppedEvent {
            reason: message.clone(),
        }))
        .await;
        self.teardown().await;
        RunOutcome {
            stop_reason: Some(message),
            ..self.outcome(Some(run_id), OutcomeStatus::InsufficientResource, state)
        }
    }

    async fn fatal(
        &self,
        run_id: Option<&str>,
        state: &mut PassState,
        message: String,
    ) -> RunOutcome {
        warn!(workflow_id = self.workflow_id(), ?run_id, message, "run failed");
        state.errors.clear();
        state.log(format!("Run failed: {message}"));
        if let Some(run_id) = run_id {
            self.close_run(run_id, RunStatus::Error, state).await;
        }
        self.publish(state);
        self.transition(WorkflowEvent::Error(WorkflowErrorEvent {
            global_error: Some(message.clone()),
            node_errors: Map::new(),
        }))
        .await;
        RunOutcome {
            global_error: Some(message),
            ..self.outcome(run_id, OutcomeStatus::Error, state)
        }
    }
}

/// Object fields of `overlay` on top of `base`; a non-object overlay wins
/// outright unless it is null.
fn merge_objects(
    base: &Value,
    overlay: &Value,
) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            let mut merged = base.clone();
            merged.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
            Value::Object(merged)
        }
        (base, Value::Null) => base.clone(),
        (_, overlay) => overlay.clone(),
    }
}
