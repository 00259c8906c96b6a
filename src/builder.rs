use std::sync::Arc;

use tokio::runtime::Handle;

use crate::{
    Config, Result, TrigflowError,
    broadcast::{NoopBroadcaster, StatusBroadcaster},
    credentials::{CredentialProvider, StaticCredentials},
    runtime::{Channel, Services},
    scheduler::Scheduler,
    store::{HistoryStore, MemStore},
    tools::{QuickJsBackend, ScriptBackend, Tool, ToolCategory, ToolRegistry},
    triggers::{TriggerAdapter, TriggerRegistry, WebhookRoutes},
};

/// Wires the collaborators of a [`Scheduler`].
///
/// Every collaborator has an in-process default: a [`MemStore`], no
/// credentials, a broadcaster that only traces, and a QuickJS script backend.
/// The built-in tools and trigger adapters are always registered; tools and
/// adapters added here take precedence by name.
pub struct EngineBuilder {
    config: Config,
    store: Option<Arc<dyn HistoryStore>>,
    tools: Vec<(Option<ToolCategory>, Arc<dyn Tool>)>,
    triggers: Vec<Arc<dyn TriggerAdapter>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    broadcaster: Option<Arc<dyn StatusBroadcaster>>,
    scripts: Option<Arc<dyn ScriptBackend>>,
    webhook_routes: Arc<WebhookRoutes>,
    runtime: Option<Handle>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            store: None,
            tools: Vec::new(),
            triggers: Vec::new(),
            credentials: None,
            broadcaster: None,
            scripts: None,
            webhook_routes: Arc::new(WebhookRoutes::new()),
            runtime: None,
        }
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(
        mut self,
        config: Config,
    ) -> Self {
        self.config = config;
        self
    }

    pub fn store(
        mut self,
        store: Arc<dyn HistoryStore>,
    ) -> Self {
        self.store = Some(store);
        self
    }

    /// Add a tool to the built-in library under `category`.
    pub fn tool(
        mut self,
        category: ToolCategory,
        tool: Arc<dyn Tool>,
    ) -> Self {
        self.tools.push((Some(category), tool));
        self
    }

    /// Add a plugin tool, consulted after the whole library.
    pub fn plugin(
        mut self,
        tool: Arc<dyn Tool>,
    ) -> Self {
        self.tools.push((None, tool));
        self
    }

    pub fn trigger(
        mut self,
        adapter: Arc<dyn TriggerAdapter>,
    ) -> Self {
        self.triggers.push(adapter);
        self
    }

    pub fn credentials(
        mut self,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn broadcaster(
        mut self,
        broadcaster: Arc<dyn StatusBroadcaster>,
    ) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn scripts(
        mut self,
        scripts: Arc<dyn ScriptBackend>,
    ) -> Self {
        self.scripts = Some(scripts);
        self
    }

    /// Route table shared with the host's HTTP layer.
    pub fn webhook_routes(
        mut self,
        routes: Arc<WebhookRoutes>,
    ) -> Self {
        self.webhook_routes = routes;
        self
    }

    /// Runtime that runs every runner, worker and listener. Defaults to the
    /// runtime `build` is called from.
    pub fn runtime(
        mut self,
        runtime: Handle,
    ) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Assemble the shared collaborators without a scheduler, e.g. to drive a
    /// [`Runner`](crate::Runner) directly.
    pub fn services(&self) -> Result<Arc<Services>> {
        let runtime = match &self.runtime {
            Some(runtime) => runtime.clone(),
            None => Handle::try_current().map_err(|e| TrigflowError::Engine(format!("no tokio runtime available: {e}")))?,
        };

        let mut tools = ToolRegistry::with_builtins();
        for (category, tool) in &self.tools {
            match category {
                Some(category) => tools.register(*category, tool.clone()),
                None => tools.register_plugin(tool.clone()),
            }
        }

        let mut triggers = TriggerRegistry::with_builtins(self.webhook_routes.clone());
        for adapter in &self.triggers {
            triggers.register(adapter.clone());
        }

        Ok(Arc::new(Services {
            config: self.config.engine.clone(),
            store: self.store.clone().unwrap_or_else(|| Arc::new(MemStore::new())),
            tools: Arc::new(tools),
            triggers: Arc::new(triggers),
            credentials: self.credentials.clone().unwrap_or_else(|| Arc::new(StaticCredentials::new())),
            broadcaster: self.broadcaster.clone().unwrap_or_else(|| Arc::new(NoopBroadcaster)),
            scripts: self.scripts.clone().unwrap_or_else(|| Arc::new(QuickJsBackend::new())),
            channel: Arc::new(Channel::new(runtime.clone())),
            runtime,
        }))
    }

    pub fn build(&self) -> Result<Scheduler> {
        let services = self.services()?;
        Ok(Scheduler::new(self.config.scheduler.clone(), services))
    }
}
