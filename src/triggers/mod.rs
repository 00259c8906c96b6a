//! Trigger adapters: the nodes that start a run.
//!
//! An adapter is shared by every runner; whatever it sets up for one runner
//! (timers, route registrations) is handed back as a [`ResourceHandle`] the
//! runner releases on teardown.

mod timer;
mod webhook;

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::{
    Result,
    model::NodeModel,
    runtime::{RunContext, TriggerContext},
};

pub use timer::{Schedule, TimerTrigger};
pub use webhook::{WebhookListener, WebhookRoute, WebhookRoutes};

#[async_trait]
pub trait TriggerAdapter: Send + Sync {
    /// The `node.type` this adapter serves.
    fn name(&self) -> &str;

    /// Start listening for `node` on behalf of the runner behind `ctx`.
    async fn setup(
        &self,
        ctx: &TriggerContext,
        node: &NodeModel,
    ) -> Result<Option<ResourceHandle>>;

    /// Whether `event` should start a pass at `node`.
    fn validate(
        &self,
        event: &Value,
        node: &NodeModel,
    ) -> bool;

    /// Normalize `event` into the trigger node's output.
    async fn process(
        &self,
        event: &Value,
        ctx: &RunContext,
    ) -> Result<Value>;

    /// Called once per trigger node when its runner is torn down, after the
    /// node's handles were released.
    async fn teardown(
        &self,
        _node: &NodeModel,
    ) -> Result<()> {
        Ok(())
    }
}

/// One releasable resource held by a runner.
pub struct ResourceHandle {
    label: String,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ResourceHandle {
    pub fn new(
        label: impl Into<String>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            release: Some(Box::new(release)),
        }
    }

    /// Handle that aborts a background task.
    pub fn from_task<T: Send + 'static>(
        label: impl Into<String>,
        task: JoinHandle<T>,
    ) -> Self {
        Self::new(label, move || task.abort())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            debug!(handle = %self.label, "release resource");
            release();
        }
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ResourceHandle").field("label", &self.label).field("released", &self.release.is_none()).finish()
    }
}

#[derive(Default)]
pub struct TriggerRegistry {
    adapters: HashMap<String, Arc<dyn TriggerAdapter>>,
}

impl TriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `trigger-timer` and a `webhook-listener` bound to `routes`.
    pub fn with_builtins(routes: Arc<WebhookRoutes>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TimerTrigger));
        registry.register(Arc::new(WebhookListener::new(routes)));
        registry
    }

    pub fn register(
        &mut self,
        adapter: Arc<dyn TriggerAdapter>,
    ) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn resolve(
        &self,
        node_type: &str,
    ) -> Option<Arc<dyn TriggerAdapter>> {
        self.adapters.get(node_type).cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    use super::*;

    #[test]
    fn test_handle_released_once() {
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let handle = ResourceHandle::new("flag", move || flag.store(true, Ordering::SeqCst));
        assert_eq!(handle.label(), "flag");
        handle.release();
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_task_handle_aborts() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            let _ = tx.send(());
        });
        ResourceHandle::from_task("sleeper", task).release();

        // the aborted task drops its sender without sending
        let received = tokio::time::timeout(std::time::Duration::from_secs(1), rx).await.unwrap();
        assert!(received.is_err());
    }

    #[test]
    fn test_builtins() {
        let registry = TriggerRegistry::with_builtins(Arc::new(WebhookRoutes::new()));
        assert!(registry.resolve("trigger-timer").is_some());
        assert!(registry.resolve("webhook-listener").is_some());
        assert!(registry.resolve("trigger-email").is_none());
    }
}
