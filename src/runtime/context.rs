use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use serde_json::Value;
use tokio::runtime::Handle;

use crate::{
    Result,
    broadcast::StatusBroadcaster,
    common::Queue,
    config::EngineConfig,
    credentials::CredentialProvider,
    events::Log,
    runtime::{Channel, runner::RunnerCommand},
    store::HistoryStore,
    tools::{ScriptBackend, ToolRegistry},
    triggers::TriggerRegistry,
    utils,
};

/// Collaborators shared by every runner of a scheduler, nested runners
/// included.
pub struct Services {
    pub(crate) config: EngineConfig,
    pub(crate) store: Arc<dyn HistoryStore>,
    pub(crate) tools: Arc<ToolRegistry>,
    pub(crate) triggers: Arc<TriggerRegistry>,
    pub(crate) credentials: Arc<dyn CredentialProvider>,
    pub(crate) broadcaster: Arc<dyn StatusBroadcaster>,
    pub(crate) scripts: Arc<dyn ScriptBackend>,
    pub(crate) channel: Arc<Channel>,
    pub(crate) runtime: Handle,
}

/// Cooperative halt flag of one runner.
#[derive(Debug, Default)]
pub struct StopSignal {
    requested: AtomicBool,
    external: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop from inside the run. The first reason wins.
    pub fn request(
        &self,
        reason: &str,
    ) -> bool {
        let first = !self.requested.swap(true, Ordering::SeqCst);
        if first {
            *self.reason.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.to_string());
        }
        first
    }

    /// Request a stop on behalf of the scheduler; the caller owns status
    /// persistence for this stop.
    pub fn request_external(
        &self,
        reason: &str,
    ) -> bool {
        self.external.store(true, Ordering::SeqCst);
        self.request(reason)
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn is_external(&self) -> bool {
        self.external.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<String> {
        self.reason.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// What a tool sees of the run it executes in.
#[derive(Clone)]
pub struct RunContext {
    workflow_id: String,
    owner_id: String,
    run_id: String,
    node_id: String,
    depth: usize,
    stop: Arc<StopSignal>,
    services: Arc<Services>,
}

impl RunContext {
    pub(crate) fn new(
        workflow_id: &str,
        owner_id: &str,
        run_id: &str,
        depth: usize,
        stop: Arc<StopSignal>,
        services: Arc<Services>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            owner_id: owner_id.to_string(),
            run_id: run_id.to_string(),
            node_id: String::new(),
            depth,
            stop,
            services,
        }
    }

    pub(crate) fn for_node(
        &self,
        node_id: &str,
    ) -> Self {
        let mut ctx = self.clone();
        ctx.node_id = node_id.to_string();
        ctx
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// sub-workflow nesting level, 0 for a top-level run
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn request_stop(
        &self,
        reason: &str,
    ) {
        self.stop.request(reason);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_requested()
    }

    pub fn store(&self) -> Arc<dyn HistoryStore> {
        self.services.store.clone()
    }

    pub(crate) fn services(&self) -> Arc<Services> {
        self.services.clone()
    }

    /// Append a line to the run's event log stream.
    pub fn emit_log(
        &self,
        content: impl Into<String>,
    ) {
        self.services.channel.emit_log(Log {
            wid: self.workflow_id.clone(),
            run_id: self.run_id.clone(),
            nid: self.node_id.clone(),
            content: content.into(),
            timestamp: utils::time::time_millis(),
        });
    }
}

/// Handle a trigger adapter uses to feed events into its runner.
#[derive(Clone)]
pub struct TriggerSender {
    commands: Arc<Queue<RunnerCommand>>,
}

impl TriggerSender {
    pub(crate) fn new(commands: Arc<Queue<RunnerCommand>>) -> Self {
        Self {
            commands,
        }
    }

    /// Queue an event on the runner; it is processed after any pass in progress.
    pub async fn fire(
        &self,
        data: Value,
    ) -> Result<()> {
        self.commands
            .send_async(RunnerCommand::Trigger {
                data,
                reply: None,
            })
            .await
    }
}

/// What a trigger adapter sees during setup.
#[derive(Clone)]
pub struct TriggerContext {
    workflow_id: String,
    owner_id: String,
    sender: TriggerSender,
    runtime: Handle,
}

impl TriggerContext {
    pub(crate) fn new(
        workflow_id: &str,
        owner_id: &str,
        sender: TriggerSender,
        runtime: Handle,
    ) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            owner_id: owner_id.to_string(),
            sender,
            runtime,
        }
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn sender(&self) -> TriggerSender {
        self.sender.clone()
    }

    /// Runtime background listeners should be spawned on.
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }
}
