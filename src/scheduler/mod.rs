//! Workflow scheduler.
//!
//! The scheduler is the single control point for activation and deactivation.
//! It holds:
//! - an unbounded FIFO of activation jobs
//! - a fixed pool of [`Worker`]s, each busy only while a runner sets up its
//!   triggers
//! - the registry of live runners, keyed by workflow id
//!
//! Once a runner is listening, its trigger events go straight to the runner
//! and never occupy a worker.

mod monitor;
mod worker;

use std::{
    collections::{HashSet, VecDeque},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    Result, TrigflowError,
    common::MemCache,
    config::SchedulerConfig,
    events::{GraphEvent, WorkflowEvent, WorkflowStoppedEvent},
    model::WorkflowModel,
    runtime::{Channel, Runner, Services},
    store::data::WorkflowStatus,
};

use monitor::Monitor;
use worker::Worker;

const DEACTIVATED: &str = "Workflow deactivated";

/// One queued activation.
#[derive(Debug, Clone)]
pub struct ActivationJob {
    pub workflow: WorkflowModel,
    pub owner_id: String,
    /// payload processed once the runner is listening
    pub trigger_data: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationResult {
    Queued,
    /// the workflow was already queued, activating or live; nothing changed
    AlreadyActive,
}

/// Snapshot returned by [`Scheduler::fetch_state`].
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    /// `None` when the workflow is unknown to this owner
    pub status: Option<WorkflowStatus>,
    pub outputs: std::collections::HashMap<String, Value>,
    pub errors: std::collections::HashMap<String, String>,
    pub current_node_id: Option<String>,
    pub active_edges: Vec<String>,
    pub queue_length: usize,
    pub active_workflows_count: usize,
    pub workers_count: usize,
    pub busy_workers_count: usize,
}

#[derive(Default)]
struct Jobs {
    queue: VecDeque<ActivationJob>,
    /// claimed by a worker, runner not yet registered
    pending: HashSet<String>,
    /// between the duplicate check and the queue push
    enqueuing: HashSet<String>,
    /// deactivated while pending or enqueuing
    cancelled: HashSet<String>,
}

impl Jobs {
    fn is_known(
        &self,
        workflow_id: &str,
    ) -> bool {
        self.queue.iter().any(|j| j.workflow.id == workflow_id) || self.pending.contains(workflow_id) || self.enqueuing.contains(workflow_id)
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    services: Arc<Services>,
    jobs: Mutex<Jobs>,
    workers: Vec<Arc<Worker>>,
    registry: Arc<MemCache<String, Runner>>,
    monitor: Monitor,
    drain_scheduled: AtomicBool,
    running: AtomicBool,
}

/// Bounded activation pool over a registry of live runners.
///
/// # Example
///
/// ```rust,ignore
/// let scheduler = EngineBuilder::new().store(store).build()?;
/// scheduler.launch()?;
///
/// scheduler.activate(workflow, "owner-1", None).await?;
/// let state = scheduler.fetch_state(&workflow_id, "owner-1").await?;
///
/// scheduler.deactivate(&workflow_id, "owner-1").await;
/// scheduler.shutdown().await;
/// ```
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub(crate) fn new(
        config: SchedulerConfig,
        services: Arc<Services>,
    ) -> Self {
        let workers = (0..config.worker_count).map(|i| Arc::new(Worker::new(i))).collect();
        let registry = Arc::new(MemCache::unbounded());
        let monitor = Monitor::new(services.channel.clone(), services.broadcaster.clone());

        Self {
            inner: Arc::new(SchedulerInner {
                config,
                services,
                jobs: Mutex::new(Jobs::default()),
                workers,
                registry,
                monitor,
                drain_scheduled: AtomicBool::new(false),
                running: AtomicBool::new(false),
            }),
        }
    }

    /// Start forwarding status events and accepting activations.
    pub fn launch(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        // handlers first, then listen, so no event is missed
        self.inner.monitor.monitor()?;
        self.inner.services.channel.listen();
        info!(workers = self.inner.workers.len(), "scheduler launched");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Collaborators shared by every runner of this scheduler.
    pub fn services(&self) -> Arc<Services> {
        self.inner.services.clone()
    }

    /// Event channel carrying status transitions, node events and run logs.
    pub fn channel(&self) -> Arc<Channel> {
        self.inner.services.channel.clone()
    }

    pub(crate) fn registry(&self) -> Arc<MemCache<String, Runner>> {
        self.inner.registry.clone()
    }

    /// Live runner of a workflow.
    pub fn runner(
        &self,
        workflow_id: &str,
    ) -> Option<Runner> {
        self.inner.registry.get(&workflow_id.to_string())
    }

    pub fn active_workflows_count(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn queue_length(&self) -> usize {
        self.jobs().queue.len()
    }

    pub fn busy_workers_count(&self) -> usize {
        self.inner.workers.iter().filter(|w| w.is_busy()).count()
    }

    fn jobs(&self) -> MutexGuard<'_, Jobs> {
        self.inner.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_running(&self) -> Result<()> {
        if !self.is_running() {
            return Err(TrigflowError::Engine("scheduler is not launched".to_string()));
        }
        Ok(())
    }

    /// Queue a workflow for activation.
    ///
    /// A workflow already queued, being activated or live is left untouched
    /// and reported as [`ActivationResult::AlreadyActive`]. Exceeding the
    /// concurrency ceiling still queues.
    pub async fn activate(
        &self,
        workflow: WorkflowModel,
        owner_id: &str,
        trigger_data: Option<Value>,
    ) -> Result<ActivationResult> {
        self.ensure_running()?;
        let workflow_id = workflow.id.clone();

        {
            let mut jobs = self.jobs();
            if jobs.is_known(&workflow_id) || self.inner.registry.contains(&workflow_id) {
                info!(workflow_id, "workflow is already queued or active");
                return Ok(ActivationResult::AlreadyActive);
            }
            jobs.enqueuing.insert(workflow_id.clone());
            jobs.cancelled.remove(&workflow_id);
        }

        let active = self.inner.registry.len();
        if active >= self.inner.config.max_concurrent_workflows {
            warn!(workflow_id, active, limit = self.inner.config.max_concurrent_workflows, "concurrency ceiling reached, queuing anyway");
        }

        self.publish_status(&workflow_id, owner_id, WorkflowEvent::Queued).await;

        let cancelled = {
            let mut jobs = self.jobs();
            jobs.enqueuing.remove(&workflow_id);
            let cancelled = jobs.cancelled.remove(&workflow_id);
            if !cancelled {
                jobs.queue.push_back(ActivationJob {
                    workflow,
                    owner_id: owner_id.to_string(),
                    trigger_data,
                });
                info!(workflow_id, queue_length = jobs.queue.len(), "workflow queued");
            }
            cancelled
        };

        if cancelled {
            // deactivated while the queued status was being written
            self.publish_status(&workflow_id, owner_id, stopped_event()).await;
        } else {
            self.assign_work();
        }
        Ok(ActivationResult::Queued)
    }

    /// Hand queued jobs to idle workers; if work remains, retry after the
    /// drain interval.
    pub(crate) fn assign_work(&self) {
        if !self.is_running() {
            return;
        }

        let mut assigned = 0;
        for worker in &self.inner.workers {
            if !worker.try_claim() {
                continue;
            }
            let job = {
                let mut jobs = self.jobs();
                let job = jobs.queue.pop_front();
                if let Some(job) = &job {
                    jobs.pending.insert(job.workflow.id.clone());
                }
                job
            };
            let Some(job) = job else {
                worker.release();
                break;
            };

            assigned += 1;
            let scheduler = self.clone();
            let worker = worker.clone();
            self.inner.services.runtime.spawn(async move {
                worker.handle(&scheduler, job).await;
            });
        }

        if assigned > 0 {
            debug!(assigned, "assigned activation jobs");
        }
        if !self.jobs().queue.is_empty() {
            self.schedule_drain();
        }
    }

    fn schedule_drain(&self) {
        if self.inner.drain_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let scheduler = self.clone();
        let interval = self.inner.config.drain_retry_interval();
        self.inner.services.runtime.spawn(async move {
            tokio::time::sleep(interval).await;
            scheduler.inner.drain_scheduled.store(false, Ordering::SeqCst);
            scheduler.assign_work();
        });
    }

    pub(crate) fn clear_pending(
        &self,
        workflow_id: &str,
    ) {
        self.jobs().pending.remove(workflow_id);
    }

    pub(crate) fn take_cancelled(
        &self,
        workflow_id: &str,
    ) -> bool {
        self.jobs().cancelled.remove(workflow_id)
    }

    /// Persist a workflow status and announce it to observers.
    pub(crate) async fn publish_status(
        &self,
        workflow_id: &str,
        owner_id: &str,
        event: WorkflowEvent,
    ) {
        let status = event.status();
        if let Err(e) = self.inner.services.store.update_workflow_status(workflow_id, status).await {
            warn!(workflow_id, status = status.as_ref(), error = %e, "failed to persist workflow status");
        }
        self.inner.services.channel.emit(workflow_id, owner_id, "", GraphEvent::Workflow(event));
    }

    /// Stop a workflow wherever it is. Never fails; returns whether anything
    /// was queued or live for it.
    pub async fn deactivate(
        &self,
        workflow_id: &str,
        owner_id: &str,
    ) -> bool {
        info!(workflow_id, "deactivating workflow");

        let mut found = false;
        let runner = {
            let mut jobs = self.jobs();
            // a worker registers its runner before clearing `pending`, so under
            // the jobs lock one of the two is always visible
            let runner = self.inner.registry.get(&workflow_id.to_string());
            let foreign_runner = runner.as_ref().is_some_and(|r| r.owner_id() != owner_id);
            if foreign_runner || jobs.queue.iter().any(|j| j.workflow.id == workflow_id && j.owner_id != owner_id) {
                warn!(workflow_id, "deactivation by a different owner ignored");
                return false;
            }
            let before = jobs.queue.len();
            jobs.queue.retain(|j| j.workflow.id != workflow_id);
            found |= jobs.queue.len() != before;

            if jobs.pending.contains(workflow_id) || jobs.enqueuing.contains(workflow_id) {
                jobs.cancelled.insert(workflow_id.to_string());
                found = true;
            }
            runner
        };

        if let Some(runner) = runner {
            runner.stop(DEACTIVATED);
            runner.teardown().await;
            found = true;
        }

        self.publish_status(workflow_id, owner_id, stopped_event()).await;
        info!(workflow_id, found, "workflow stopped");
        found
    }

    /// Status and run state of a workflow as seen by `owner_id`.
    pub async fn fetch_state(
        &self,
        workflow_id: &str,
        owner_id: &str,
    ) -> Result<WorkflowState> {
        let (queue_length, queued) = {
            let jobs = self.jobs();
            (jobs.queue.len(), jobs.is_known(workflow_id))
        };
        let mut state = WorkflowState {
            queue_length,
            active_workflows_count: self.active_workflows_count(),
            workers_count: self.inner.workers.len(),
            busy_workers_count: self.busy_workers_count(),
            ..Default::default()
        };

        if let Some(runner) = self.runner(workflow_id).filter(|r| r.owner_id() == owner_id) {
            let snapshot = runner.snapshot();
            state.status = Some(if runner.is_torn_down() { WorkflowStatus::Stopped } else { snapshot.status });
            state.outputs = snapshot.outputs;
            state.errors = snapshot.errors;
            state.current_node_id = snapshot.current_node_id;
            state.active_edges = snapshot.active_edges;
            return Ok(state);
        }

        if queued {
            state.status = Some(WorkflowStatus::Queued);
            return Ok(state);
        }

        state.status = self.inner.services.store.get_workflow(workflow_id).await?.filter(|w| w.owner_id == owner_id).map(|w| w.status);
        Ok(state)
    }

    /// Re-queue every workflow persisted as listening, running or queued.
    ///
    /// Workflows are read in batches, yielding between batches. Jobs carry no
    /// trigger payload and workflows already known to the scheduler are
    /// skipped. Returns the number of jobs queued.
    pub async fn restart_active_workflows(&self) -> Result<usize> {
        self.ensure_running()?;
        info!("restarting active workflows");

        let batch_size = self.inner.config.restart_batch_size;
        let mut offset = 0;
        let mut queued = 0;
        loop {
            let batch = self.inner.services.store.get_workflows_by_status(&WorkflowStatus::RECOVERABLE, batch_size, offset).await?;
            let read = batch.len();
            if read == 0 {
                break;
            }

            {
                let mut jobs = self.jobs();
                for stored in batch {
                    let workflow_id = stored.definition.id.clone();
                    if jobs.is_known(&workflow_id) || self.inner.registry.contains(&workflow_id) {
                        debug!(workflow_id, "already active, not restarted");
                        continue;
                    }
                    jobs.queue.push_back(ActivationJob {
                        workflow: stored.definition,
                        owner_id: stored.owner_id,
                        trigger_data: None,
                    });
                    queued += 1;
                }
            }

            offset += read;
            debug!(queued, "restart batch queued");
            tokio::task::yield_now().await;
            if read < batch_size {
                break;
            }
        }

        info!(queued, "workflows queued for restart");
        self.assign_work();
        Ok(queued)
    }

    /// Forward an external event to a live workflow's runner.
    pub async fn dispatch_trigger(
        &self,
        workflow_id: &str,
        event: Value,
    ) -> Result<()> {
        let runner = self.runner(workflow_id).ok_or(TrigflowError::Workflow(format!("workflow {workflow_id} is not active")))?;
        runner.trigger(event).await
    }

    /// Tear down every live runner without persisting `stopped`, so a later
    /// [`restart_active_workflows`](Self::restart_active_workflows) recovers them.
    pub async fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let runners: Vec<Runner> = self.inner.registry.iter().map(|(_, runner)| runner).collect();
        info!(runners = runners.len(), "scheduler shutting down");
        for runner in runners {
            runner.teardown().await;
        }
        self.inner.services.channel.shutdown();
    }
}

fn stopped_event() -> WorkflowEvent {
    WorkflowEvent::Stopped(WorkflowStoppedEvent {
        reason: DEACTIVATED.to_string(),
    })
}
