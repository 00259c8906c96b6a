//! History and workflow-definition persistence.
//!
//! The engine only needs the narrow [`HistoryStore`] surface below; the
//! storage format behind it belongs to the host application. [`MemStore`] is
//! the in-process implementation used by tests and embedded setups.

pub mod data;
mod mem;

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;

use data::{NodeRecordUpdate, RunStatus, StoredWorkflow, WorkflowStatus};

pub use mem::MemStore;

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Open a run record and return its id.
    async fn create_run_record(
        &self,
        workflow_id: &str,
        owner_id: &str,
        name: &str,
    ) -> Result<String>;

    /// Close a run record with its terminal status, log and metered units
    /// (elapsed seconds of metered nodes).
    async fn update_run_record(
        &self,
        run_id: &str,
        status: RunStatus,
        log: &str,
        resource_units: f64,
    ) -> Result<()>;

    /// Record that a node started executing and return the record id.
    async fn create_node_record(
        &self,
        run_id: &str,
        node_id: &str,
        input: &Value,
    ) -> Result<String>;

    /// Complete a node record. May fail with `ResourceExhausted` when the
    /// owner cannot be charged for the execution.
    async fn update_node_record(
        &self,
        run_id: &str,
        node_id: &str,
        update: NodeRecordUpdate,
    ) -> Result<()>;

    async fn get_workflows_by_status(
        &self,
        statuses: &[WorkflowStatus],
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredWorkflow>>;

    async fn update_workflow_status(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
    ) -> Result<()>;

    /// Fetch a workflow definition with its owner, used by sub-workflow nodes.
    async fn get_workflow(
        &self,
        workflow_id: &str,
    ) -> Result<Option<StoredWorkflow>>;
}
