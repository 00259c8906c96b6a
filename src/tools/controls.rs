use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::{
    Result, TrigflowError,
    common::Vars,
    runtime::{OutcomeStatus, RunContext, RunOutcome, Runner, RunnerOptions},
    tools::Tool,
};

/// Granularity at which a delay observes a stop request.
const DELAY_SLICE: Duration = Duration::from_millis(250);

const EXHAUSTED_PREFIX: &str = "Insufficient credits: ";

/// `delay`: sleeps for `duration` expressed in `unit`.
pub struct DelayTool;

impl DelayTool {
    fn duration(params: &Vars) -> Result<Duration> {
        let amount = params
            .get_str("duration")
            .and_then(|d| d.trim().parse::<f64>().ok())
            .filter(|d| d.is_finite() && *d >= 0.0)
            .ok_or(TrigflowError::Tool("Invalid delay duration".to_string()))?;

        let factor = match params.get_str("unit").as_deref() {
            Some("milliseconds") => 1.0,
            Some("seconds") => 1_000.0,
            Some("minutes") => 60_000.0,
            Some("hours") => 3_600_000.0,
            _ => return Err(TrigflowError::Tool("Invalid time unit for delay".to_string())),
        };
        Ok(Duration::from_millis((amount * factor) as u64))
    }
}

#[async_trait]
impl Tool for DelayTool {
    fn name(&self) -> &str {
        "delay"
    }

    async fn execute(
        &self,
        params: Vars,
        _input: Value,
        ctx: &RunContext,
    ) -> Result<Value> {
        let delay = Self::duration(&params)?;
        let until = chrono::Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);

        let deadline = tokio::time::Instant::now() + delay;
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline || ctx.is_stop_requested() {
                break;
            }
            tokio::time::sleep((deadline - now).min(DELAY_SLICE)).await;
        }

        Ok(json!({ "delayedUntil": until.to_rfc3339_opts(chrono::SecondsFormat::Millis, true) }))
    }
}

/// `run-workflow`: executes another workflow of the same owner as a nested
/// run and folds its outputs into this node's output.
pub struct RunWorkflowTool;

impl RunWorkflowTool {
    /// Parent data overlaid with the node's own `inputData`.
    fn merged_input(
        input: &Value,
        params: &Vars,
    ) -> Value {
        let mut merged = match input {
            Value::Object(obj) => obj.clone(),
            _ => Map::new(),
        };

        let extra = match params.get_value("inputData") {
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(error = %e, "failed to parse sub-workflow inputData");
                    None
                }
            },
            Some(other) => Some(other.clone()),
            None => None,
        };
        if let Some(Value::Object(extra)) = extra {
            merged.extend(extra);
        }
        Value::Object(merged)
    }
}

#[async_trait]
impl Tool for RunWorkflowTool {
    fn name(&self) -> &str {
        "run-workflow"
    }

    fn schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "workflowId": { "type": "string", "minLength": 1 }
            },
            "required": ["workflowId"]
        }))
    }

    async fn execute(
        &self,
        params: Vars,
        input: Value,
        ctx: &RunContext,
    ) -> Result<Value> {
        let workflow_id = params.get_str("workflowId").filter(|s| !s.is_empty()).ok_or(TrigflowError::Tool("workflowId is required".to_string()))?;

        let services = ctx.services();
        let depth = ctx.depth() + 1;
        if depth > services.config.max_sub_workflow_depth {
            return Err(TrigflowError::Tool(format!("Sub-workflow nesting exceeds {} levels", services.config.max_sub_workflow_depth)));
        }

        let stored = services.store.get_workflow(&workflow_id).await?.ok_or(TrigflowError::Tool(format!("Workflow with ID {workflow_id} not found")))?;
        if stored.owner_id != ctx.owner_id() {
            return Err(TrigflowError::Tool(format!("You do not have permission to run workflow {workflow_id}")));
        }

        let merged = Self::merged_input(&input, &params);
        let options = RunnerOptions {
            owner_id: ctx.owner_id().to_string(),
            depth,
            sub_workflow: true,
            parent_input: Some(merged.clone()),
            registry: None,
        };
        let runner = Runner::new(&stored.definition, options, services)?;

        let wait = params.get::<bool>("waitForCompletion").or_else(|| params.get_str("waitForCompletion").map(|s| s != "false")).unwrap_or(true);
        if !wait {
            info!(workflow_id, parent = ctx.workflow_id(), "sub-workflow started detached");
            let detached = runner.clone();
            ctx.services().runtime.spawn(async move {
                if let Err(e) = detached.trigger_and_wait(merged).await {
                    warn!(error = %e, "detached sub-workflow failed");
                }
                detached.teardown().await;
            });
            return Ok(json!({ "success": true, "subWorkflowCompleted": false }));
        }

        let result = runner.trigger_and_wait(merged).await;
        runner.teardown().await;
        let outcome = result?;

        ctx.emit_log(format!("sub-workflow {workflow_id} finished: {}", outcome.status.as_ref()));
        if let Some(error) = nested_failure(&workflow_id, &outcome) {
            return Err(error);
        }
        Ok(json!({
            "success": outcome.success(),
            "outputs": outcome.outputs,
            "errors": outcome.errors,
            "subWorkflowCompleted": true,
        }))
    }
}

/// The error a finished sub-workflow run raises on its parent node, if any.
fn nested_failure(
    workflow_id: &str,
    outcome: &RunOutcome,
) -> Option<TrigflowError> {
    if outcome.status == OutcomeStatus::InsufficientResource {
        let reason = outcome.stop_reason.as_deref().unwrap_or_default();
        let reason = reason.strip_prefix(EXHAUSTED_PREFIX).unwrap_or(reason);
        return Some(TrigflowError::ResourceExhausted(format!("sub-workflow {workflow_id}: {reason}")));
    }
    if let Some(error) = &outcome.global_error {
        return Some(TrigflowError::Node(format!("Sub-workflow {workflow_id} failed: {error}")));
    }
    if outcome.errors.is_empty() {
        return None;
    }

    let mut errors: Vec<_> = outcome.errors.iter().map(|(node, message)| format!("{node}: {message}")).collect();
    errors.sort();
    Some(TrigflowError::Node(format!("Sub-workflow {workflow_id} failed: {}", errors.join("; "))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_units() {
        let params = Vars::new().with("duration", "2").with("unit", "seconds");
        assert_eq!(DelayTool::duration(&params).unwrap(), Duration::from_secs(2));

        let params = Vars::new().with("duration", 1.5).with("unit", "minutes");
        assert_eq!(DelayTool::duration(&params).unwrap(), Duration::from_secs(90));

        let params = Vars::new().with("duration", "5").with("unit", "days");
        assert_eq!(DelayTool::duration(&params).unwrap_err().to_string(), "Invalid time unit for delay");

        let params = Vars::new().with("duration", "soon").with("unit", "seconds");
        assert!(DelayTool::duration(&params).is_err());
    }

    #[test]
    fn test_nested_failure() {
        let mut outcome = RunOutcome {
            run_id: None,
            status: OutcomeStatus::Completed,
            outputs: Default::default(),
            errors: Default::default(),
            global_error: None,
            stop_reason: None,
            resource_units: 0.0,
        };
        assert!(nested_failure("child", &outcome).is_none());

        outcome.status = OutcomeStatus::Error;
        outcome.errors.insert("C2".to_string(), "late".to_string());
        outcome.errors.insert("C1".to_string(), "boom".to_string());
        assert_eq!(nested_failure("child", &outcome), Some(TrigflowError::Node("Sub-workflow child failed: C1: boom; C2: late".to_string())));

        outcome.status = OutcomeStatus::InsufficientResource;
        outcome.stop_reason = Some("Insufficient credits: none left".to_string());
        let error = nested_failure("child", &outcome).unwrap();
        assert!(error.is_resource_exhausted());
        assert_eq!(error.to_string(), "Insufficient credits: sub-workflow child: none left");
    }

    #[test]
    fn test_merged_input() {
        let input = json!({"a": 1, "b": 1});
        let params = Vars::new().with("inputData", r#"{"b": 2, "c": 3}"#);
        assert_eq!(RunWorkflowTool::merged_input(&input, &params), json!({"a": 1, "b": 2, "c": 3}));

        let params = Vars::new().with("inputData", json!({"c": 4}));
        assert_eq!(RunWorkflowTool::merged_input(&input, &params), json!({"a": 1, "b": 1, "c": 4}));

        let params = Vars::new().with("inputData", "{not json");
        assert_eq!(RunWorkflowTool::merged_input(&json!("text"), &params), json!({}));
    }
}
