#![allow(dead_code)]

use std::{
    future::Future,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{Value, json};
use trigflow::{
    NodeModel, Result, TrigflowError, WorkflowModel,
    broadcast::StatusBroadcaster,
    common::Vars,
    runtime::{RunContext, TriggerContext},
    tools::Tool,
    triggers::{ResourceHandle, TriggerAdapter},
};

pub const OWNER: &str = "owner-1";

/// Build a workflow from a compact JSON description.
pub fn workflow(v: Value) -> WorkflowModel {
    serde_json::from_value(v).unwrap()
}

/// `manual-trigger -> ...` chain helper: nodes are `(id, type, category)`,
/// edges are unconditional `(from, to)` pairs. Node labels equal their ids.
pub fn chain(
    id: &str,
    nodes: &[(&str, &str, &str)],
    edges: &[(&str, &str)],
) -> WorkflowModel {
    let nodes: Vec<Value> = nodes
        .iter()
        .map(|(nid, node_type, category)| json!({ "id": nid, "type": node_type, "category": category, "text": nid }))
        .collect();
    let edges: Vec<Value> = edges
        .iter()
        .enumerate()
        .map(|(i, (from, to))| json!({ "id": format!("e{i}"), "start": { "id": from }, "end": { "id": to } }))
        .collect();
    workflow(json!({ "id": id, "name": id, "nodes": nodes, "edges": edges }))
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn wait_for<F, Fut>(
    timeout: Duration,
    mut check: F,
) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// `echo`: the input object overlaid with the resolved parameters.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    async fn execute(
        &self,
        params: Vars,
        input: Value,
        _ctx: &RunContext,
    ) -> Result<Value> {
        let mut out = input.as_object().cloned().unwrap_or_default();
        for (k, v) in params.iter() {
            out.insert(k.clone(), v.clone());
        }
        Ok(Value::Object(out))
    }
}

/// `fail`: always errors.
pub struct FailTool;

#[async_trait]
impl Tool for FailTool {
    fn name(&self) -> &str {
        "fail"
    }

    async fn execute(
        &self,
        _params: Vars,
        _input: Value,
        _ctx: &RunContext,
    ) -> Result<Value> {
        Err(TrigflowError::Tool("boom".to_string()))
    }
}

/// `slow`: takes long enough to be metered.
pub struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    async fn execute(
        &self,
        _params: Vars,
        _input: Value,
        _ctx: &RunContext,
    ) -> Result<Value> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(json!({ "slow": true }))
    }
}

/// `manual-trigger`: accepts every event and passes it through.
pub struct ManualTrigger;

#[async_trait]
impl TriggerAdapter for ManualTrigger {
    fn name(&self) -> &str {
        "manual-trigger"
    }

    async fn setup(
        &self,
        _ctx: &TriggerContext,
        _node: &NodeModel,
    ) -> Result<Option<ResourceHandle>> {
        Ok(None)
    }

    fn validate(
        &self,
        _event: &Value,
        _node: &NodeModel,
    ) -> bool {
        true
    }

    async fn process(
        &self,
        event: &Value,
        _ctx: &RunContext,
    ) -> Result<Value> {
        Ok(event.clone())
    }
}

/// `slow-trigger`: setup takes a while and records how many setups overlap.
#[derive(Default)]
pub struct SlowSetupTrigger {
    pub current: AtomicUsize,
    pub peak: AtomicUsize,
    pub released: Arc<AtomicUsize>,
}

#[async_trait]
impl TriggerAdapter for SlowSetupTrigger {
    fn name(&self) -> &str {
        "slow-trigger"
    }

    async fn setup(
        &self,
        _ctx: &TriggerContext,
        node: &NodeModel,
    ) -> Result<Option<ResourceHandle>> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);

        let released = self.released.clone();
        Ok(Some(ResourceHandle::new(format!("slow:{}", node.id), move || {
            released.fetch_add(1, Ordering::SeqCst);
        })))
    }

    fn validate(
        &self,
        _event: &Value,
        _node: &NodeModel,
    ) -> bool {
        true
    }

    async fn process(
        &self,
        event: &Value,
        _ctx: &RunContext,
    ) -> Result<Value> {
        Ok(event.clone())
    }
}

/// `broken-trigger`: setup always fails.
pub struct BrokenTrigger;

#[async_trait]
impl TriggerAdapter for BrokenTrigger {
    fn name(&self) -> &str {
        "broken-trigger"
    }

    async fn setup(
        &self,
        _ctx: &TriggerContext,
        _node: &NodeModel,
    ) -> Result<Option<ResourceHandle>> {
        Err(TrigflowError::Trigger("cannot listen".to_string()))
    }

    fn validate(
        &self,
        _event: &Value,
        _node: &NodeModel,
    ) -> bool {
        true
    }

    async fn process(
        &self,
        event: &Value,
        _ctx: &RunContext,
    ) -> Result<Value> {
        Ok(event.clone())
    }
}

/// Keeps every published status event.
#[derive(Default)]
pub struct RecordingBroadcaster {
    pub events: Mutex<Vec<(String, String, Value)>>,
}

impl RecordingBroadcaster {
    pub fn statuses(
        &self,
        workflow_id: &str,
    ) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, _, payload)| payload["workflowId"] == workflow_id)
            .map(|(_, event_type, _)| event_type.clone())
            .collect()
    }
}

impl StatusBroadcaster for RecordingBroadcaster {
    fn publish(
        &self,
        owner_id: &str,
        event_type: &str,
        payload: Value,
    ) {
        self.events.lock().unwrap().push((owner_id.to_string(), event_type.to_string(), payload));
    }
}
