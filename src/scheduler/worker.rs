use std::sync::{
    Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};

use serde_json::Map;
use tracing::{info, warn};

use crate::{
    events::{WorkflowErrorEvent, WorkflowEvent, WorkflowStoppedEvent},
    runtime::{Runner, RunnerOptions},
    scheduler::{ActivationJob, DEACTIVATED, Scheduler},
};

/// Pool member that carries one activation through trigger setup.
pub(crate) struct Worker {
    index: usize,
    busy: AtomicBool,
    current: Mutex<Option<String>>,
}

impl Worker {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            busy: AtomicBool::new(false),
            current: Mutex::new(None),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Mark the worker busy if it is idle.
    pub fn try_claim(&self) -> bool {
        self.busy.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }

    pub fn release(&self) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.busy.store(false, Ordering::SeqCst);
    }

    fn finish(
        &self,
        scheduler: &Scheduler,
    ) {
        self.release();
        scheduler.assign_work();
    }

    pub async fn handle(
        &self,
        scheduler: &Scheduler,
        job: ActivationJob,
    ) {
        let workflow_id = job.workflow.id.clone();
        let owner_id = job.owner_id.clone();
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(workflow_id.clone());
        info!(worker = self.index, workflow_id, "activating workflow");

        let options = RunnerOptions {
            owner_id: owner_id.clone(),
            registry: Some(scheduler.registry()),
            ..Default::default()
        };
        let runner = match Runner::new(&job.workflow, options, scheduler.services()) {
            Ok(runner) => runner,
            Err(e) => {
                warn!(worker = self.index, workflow_id, error = %e, "failed to build runner");
                scheduler.clear_pending(&workflow_id);
                scheduler.publish_status(&workflow_id, &owner_id, setup_failed(e.to_string())).await;
                self.finish(scheduler);
                return;
            }
        };

        // discoverable before setup so early trigger events find it
        scheduler.registry().set(workflow_id.clone(), runner.clone());
        scheduler.clear_pending(&workflow_id);

        let setup = {
            let runner = runner.clone();
            scheduler.services().runtime.spawn(async move { runner.setup_triggers().await }).await
        };
        let report = match setup {
            Ok(report) => report,
            Err(e) => {
                warn!(worker = self.index, workflow_id, error = %e, "trigger setup aborted");
                runner.teardown().await;
                scheduler.publish_status(&workflow_id, &owner_id, setup_failed(format!("Trigger setup failed: {e}"))).await;
                self.finish(scheduler);
                return;
            }
        };

        if scheduler.take_cancelled(&workflow_id) || runner.is_torn_down() {
            self.abandon(scheduler, &runner).await;
            return;
        }

        if report.is_ok() {
            runner.transition(WorkflowEvent::Listening).await;
            info!(worker = self.index, workflow_id, "workflow listening");
        } else {
            let node_errors = report.errors.into_iter().map(|(k, v)| (k, serde_json::Value::String(v))).collect();
            runner
                .transition(WorkflowEvent::Error(WorkflowErrorEvent {
                    global_error: None,
                    node_errors,
                }))
                .await;
        }

        // deactivated while the status was being written
        if runner.is_torn_down() {
            self.abandon(scheduler, &runner).await;
            return;
        }

        self.finish(scheduler);

        if let Some(data) = job.trigger_data {
            let runner = runner.clone();
            scheduler.services().runtime.spawn(async move {
                if let Err(e) = runner.trigger(data).await {
                    warn!(workflow_id = runner.workflow_id(), error = %e, "initial trigger was not delivered");
                }
            });
        }
    }

    async fn abandon(
        &self,
        scheduler: &Scheduler,
        runner: &Runner,
    ) {
        info!(worker = self.index, workflow_id = runner.workflow_id(), "workflow deactivated during activation");
        runner.teardown().await;
        scheduler
            .publish_status(
                runner.workflow_id(),
                runner.owner_id(),
                WorkflowEvent::Stopped(WorkflowStoppedEvent {
                    reason: DEACTIVATED.to_string(),
                }),
            )
            .await;
        self.finish(scheduler);
    }
}

fn setup_failed(message: String) -> WorkflowEvent {
    WorkflowEvent::Error(WorkflowErrorEvent {
        global_error: Some(message),
        node_errors: Map::new(),
    })
}
