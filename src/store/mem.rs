use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use crate::{
    Result, ShareLock, TrigflowError,
    model::WorkflowModel,
    store::{
        HistoryStore,
        data::{NodeRecord, NodeRecordUpdate, NodeStatus, RunRecord, RunStatus, StoredWorkflow, WorkflowStatus},
    },
    utils,
};

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|e| TrigflowError::Store(e.to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|e| TrigflowError::Store(e.to_string()))
}

/// In-memory history store.
///
/// Workflows are kept ordered by id so batched status reads page stably.
/// An optional per-owner unit budget makes node completion fail with
/// `ResourceExhausted` once it is spent.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    workflows: ShareLock<BTreeMap<String, StoredWorkflow>>,
    runs: ShareLock<Vec<RunRecord>>,
    nodes: ShareLock<Vec<NodeRecord>>,
    status_history: ShareLock<HashMap<String, Vec<WorkflowStatus>>>,
    budgets: ShareLock<HashMap<String, f64>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Insert or replace a workflow definition.
    pub fn save_workflow(
        &self,
        definition: &WorkflowModel,
        owner_id: &str,
        status: WorkflowStatus,
    ) -> Result<()> {
        definition.validate()?;
        write(&self.workflows)?.insert(
            definition.id.clone(),
            StoredWorkflow {
                definition: definition.clone(),
                owner_id: owner_id.to_string(),
                status,
            },
        );
        Ok(())
    }

    pub fn workflow_status(
        &self,
        workflow_id: &str,
    ) -> Option<WorkflowStatus> {
        read(&self.workflows).ok()?.get(workflow_id).map(|w| w.status)
    }

    /// Every status persisted for a workflow, oldest first.
    pub fn status_history(
        &self,
        workflow_id: &str,
    ) -> Vec<WorkflowStatus> {
        read(&self.status_history).map(|h| h.get(workflow_id).cloned().unwrap_or_default()).unwrap_or_default()
    }

    pub fn runs(
        &self,
        workflow_id: &str,
    ) -> Vec<RunRecord> {
        read(&self.runs).map(|runs| runs.iter().filter(|r| r.workflow_id == workflow_id).cloned().collect()).unwrap_or_default()
    }

    pub fn node_records(
        &self,
        run_id: &str,
    ) -> Vec<NodeRecord> {
        read(&self.nodes).map(|nodes| nodes.iter().filter(|n| n.run_id == run_id).cloned().collect()).unwrap_or_default()
    }

    /// Limit the units an owner may consume.
    pub fn set_budget(
        &self,
        owner_id: &str,
        units: f64,
    ) -> Result<()> {
        write(&self.budgets)?.insert(owner_id.to_string(), units);
        Ok(())
    }

    fn charge(
        &self,
        run_id: &str,
        units: f64,
    ) -> Result<()> {
        if units <= 0.0 {
            return Ok(());
        }
        let owner = read(&self.runs)?.iter().find(|r| r.id == run_id).map(|r| r.owner_id.clone());
        let Some(owner) = owner else {
            return Ok(());
        };

        let mut budgets = write(&self.budgets)?;
        if let Some(remaining) = budgets.get_mut(&owner) {
            if *remaining < units {
                return Err(TrigflowError::ResourceExhausted(format!("owner {owner} has {remaining:.3} units left, {units:.3} required")));
            }
            *remaining -= units;
        }
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for MemStore {
    async fn create_run_record(
        &self,
        workflow_id: &str,
        owner_id: &str,
        name: &str,
    ) -> Result<String> {
        let id = utils::longid();
        trace!(run_id = %id, workflow_id, "create run record");
        write(&self.runs)?.push(RunRecord {
            id: id.clone(),
            workflow_id: workflow_id.to_string(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            status: RunStatus::Started,
            log: String::new(),
            resource_units: 0.0,
            start_time: utils::time::time_millis(),
            end_time: 0,
        });
        Ok(id)
    }

    async fn update_run_record(
        &self,
        run_id: &str,
        status: RunStatus,
        log: &str,
        resource_units: f64,
    ) -> Result<()> {
        let mut runs = write(&self.runs)?;
        let run = runs.iter_mut().find(|r| r.id == run_id).ok_or(TrigflowError::Store(format!("run {run_id} not found")))?;
        run.status = status;
        run.log = log.to_string();
        run.resource_units = resource_units;
        run.end_time = utils::time::time_millis();
        Ok(())
    }

    async fn create_node_record(
        &self,
        run_id: &str,
        node_id: &str,
        input: &Value,
    ) -> Result<String> {
        let id = utils::longid();
        write(&self.nodes)?.push(NodeRecord {
            id: id.clone(),
            run_id: run_id.to_string(),
            node_id: node_id.to_string(),
            status: NodeStatus::Started,
            input: input.clone(),
            output: None,
            err: None,
            duration_ms: 0,
            resource_units: 0.0,
            timestamp: utils::time::time_millis(),
        });
        Ok(id)
    }

    async fn update_node_record(
        &self,
        run_id: &str,
        node_id: &str,
        update: NodeRecordUpdate,
    ) -> Result<()> {
        self.charge(run_id, update.resource_units)?;

        let mut nodes = write(&self.nodes)?;
        let record = nodes
            .iter_mut()
            .rev()
            .find(|n| n.run_id == run_id && n.node_id == node_id)
            .ok_or(TrigflowError::Store(format!("node record {node_id} of run {run_id} not found")))?;
        record.status = update.status;
        record.output = update.output;
        record.err = update.error;
        record.duration_ms = update.duration_ms;
        record.resource_units = update.resource_units;
        record.timestamp = utils::time::time_millis();
        Ok(())
    }

    async fn get_workflows_by_status(
        &self,
        statuses: &[WorkflowStatus],
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredWorkflow>> {
        let workflows = read(&self.workflows)?;
        Ok(workflows.values().filter(|w| statuses.contains(&w.status)).skip(offset).take(limit).cloned().collect())
    }

    async fn update_workflow_status(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
    ) -> Result<()> {
        {
            let mut workflows = write(&self.workflows)?;
            let workflow = workflows.get_mut(workflow_id).ok_or(TrigflowError::Store(format!("workflow {workflow_id} not found")))?;
            workflow.status = status;
        }
        write(&self.status_history)?.entry(workflow_id.to_string()).or_default().push(status);
        Ok(())
    }

    async fn get_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Option<StoredWorkflow>> {
        Ok(read(&self.workflows)?.get(workflow_id).cloned())
    }
}
