mod common;

use std::sync::Arc;

use serde_json::json;
use trigflow::{
    Config, EngineBuilder, Runner, RunnerOptions,
    credentials::StaticCredentials,
    runtime::{OutcomeStatus, Services},
    store::{
        MemStore,
        data::{NodeStatus, RunStatus, WorkflowStatus},
    },
    tools::ToolCategory,
};

use common::*;

fn services(
    store: &Arc<MemStore>,
    config: Config,
) -> Arc<Services> {
    EngineBuilder::new()
        .config(config)
        .store(store.clone())
        .tool(ToolCategory::Actions, Arc::new(EchoTool))
        .tool(ToolCategory::Actions, Arc::new(FailTool))
        .plugin(Arc::new(SlowTool))
        .trigger(Arc::new(ManualTrigger))
        .services()
        .unwrap()
}

fn runner(
    store: &Arc<MemStore>,
    model: &trigflow::WorkflowModel,
    config: Config,
) -> Runner {
    store.save_workflow(model, OWNER, WorkflowStatus::Listening).unwrap();
    let options = RunnerOptions {
        owner_id: OWNER.to_string(),
        ..Default::default()
    };
    Runner::new(model, options, services(store, config)).unwrap()
}

#[tokio::test]
async fn failed_node_isolates_its_successors() {
    let store = MemStore::new().into_shared();
    let model = chain(
        "wf-isolation",
        &[("T", "manual-trigger", "trigger"), ("A", "echo", "action"), ("B", "fail", "action"), ("C", "echo", "action")],
        &[("T", "A"), ("A", "B"), ("B", "C")],
    );
    let runner = runner(&store, &model, Config::default());

    let outcome = runner.trigger_and_wait(json!({ "x": 1 })).await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Error);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors["B"], "boom");
    assert_eq!(outcome.outputs["A"], json!({ "x": 1 }));
    assert_eq!(outcome.outputs["B"], json!({ "error": "boom" }));
    assert!(!outcome.outputs.contains_key("C"));
    assert!(outcome.global_error.is_none());

    let run_id = outcome.run_id.unwrap();
    let records = store.node_records(&run_id);
    assert!(records.iter().all(|r| r.node_id != "C"));
    let b = records.iter().find(|r| r.node_id == "B").unwrap();
    assert_eq!(b.status, NodeStatus::Failed);
    assert_eq!(b.err.as_deref(), Some("boom"));
    let a = records.iter().find(|r| r.node_id == "A").unwrap();
    assert_eq!(a.status, NodeStatus::Completed);

    assert_eq!(store.runs("wf-isolation")[0].status, RunStatus::Error);
    assert_eq!(store.workflow_status("wf-isolation"), Some(WorkflowStatus::Error));
    runner.teardown().await;
}

#[tokio::test]
async fn edge_cap_bounds_a_cycle() {
    let store = MemStore::new().into_shared();
    let model = workflow(json!({
        "id": "wf-cap",
        "nodes": [
            { "id": "T", "type": "manual-trigger", "category": "trigger" },
            { "id": "A", "type": "counter", "category": "utility", "text": "A" }
        ],
        "edges": [
            { "id": "e0", "start": { "id": "T" }, "end": { "id": "A" } },
            { "id": "loop", "start": { "id": "A" }, "end": { "id": "A" }, "maxIterations": "3" }
        ]
    }));
    let runner = runner(&store, &model, Config::default());

    let outcome = runner.trigger_and_wait(json!({})).await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert_eq!(outcome.outputs["A"], json!({ "count": 4 }));

    let run_id = outcome.run_id.unwrap();
    assert_eq!(store.node_records(&run_id).iter().filter(|r| r.node_id == "A").count(), 4);
    assert_eq!(store.workflow_status("wf-cap"), Some(WorkflowStatus::Listening));
    runner.teardown().await;
}

#[tokio::test]
async fn global_ceiling_halts_an_uncapped_cycle() {
    let store = MemStore::new().into_shared();
    let model = workflow(json!({
        "id": "wf-ceiling",
        "nodes": [
            { "id": "T", "type": "manual-trigger", "category": "trigger" },
            { "id": "A", "type": "counter", "category": "utility" }
        ],
        "edges": [
            { "id": "e0", "start": { "id": "T" }, "end": { "id": "A" } },
            { "id": "loop", "start": { "id": "A" }, "end": { "id": "A" } }
        ]
    }));
    let mut config = Config::default();
    config.engine.global_max_iterations = 5;
    let runner = runner(&store, &model, config);

    let outcome = runner.trigger_and_wait(json!({})).await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert_eq!(outcome.outputs["A"], json!({ "count": 6 }));

    let run = &store.runs("wf-ceiling")[0];
    assert!(run.log.contains("iteration limit"));
    runner.teardown().await;
}

#[tokio::test]
async fn unconditional_edges_fire_and_conditions_gate() {
    let store = MemStore::new().into_shared();
    let model = workflow(json!({
        "id": "wf-edges",
        "nodes": [
            { "id": "T", "type": "manual-trigger", "category": "trigger" },
            { "id": "A", "type": "echo", "text": "Step A", "parameters": { "flag": false } },
            { "id": "B", "type": "echo", "text": "B" },
            { "id": "C", "type": "echo", "text": "C" },
            { "id": "D", "type": "echo", "text": "D", "parameters": { "greeting": "hi {{trigger.name}}" } }
        ],
        "edges": [
            { "id": "e0", "start": { "id": "T" }, "end": { "id": "A" } },
            { "id": "ab", "start": { "id": "A" }, "end": { "id": "B" } },
            { "id": "ac", "start": { "id": "A" }, "end": { "id": "C" }, "if": "{{StepA.flag}}", "condition": "equals", "value": "true" },
            { "id": "ad", "start": { "id": "A" }, "end": { "id": "D" }, "if": "{{trigger.amount}}", "condition": "greater_than", "value": "2" }
        ]
    }));
    let runner = runner(&store, &model, Config::default());

    let outcome = runner.trigger_and_wait(json!({ "name": "ada", "amount": "10" })).await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert!(outcome.outputs.contains_key("B"));
    assert!(!outcome.outputs.contains_key("C"));
    assert_eq!(outcome.outputs["D"]["greeting"], "hi ada");

    let snapshot = runner.snapshot();
    assert!(snapshot.active_edges.contains(&"ab".to_string()));
    assert!(!snapshot.active_edges.contains(&"ac".to_string()));
    runner.teardown().await;
}

#[tokio::test]
async fn stop_node_ends_the_run_and_tears_down() {
    let store = MemStore::new().into_shared();
    let model = workflow(json!({
        "id": "wf-stop",
        "nodes": [
            { "id": "T", "type": "manual-trigger", "category": "trigger" },
            { "id": "S", "type": "stop-workflow", "category": "control", "parameters": { "reason": "enough for {{trigger.who}}" } },
            { "id": "A", "type": "echo" }
        ],
        "edges": [
            { "id": "e0", "start": { "id": "T" }, "end": { "id": "S" } },
            { "id": "e1", "start": { "id": "S" }, "end": { "id": "A" } }
        ]
    }));
    let runner = runner(&store, &model, Config::default());

    let outcome = runner.trigger_and_wait(json!({ "who": "today" })).await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Stopped);
    assert_eq!(outcome.stop_reason.as_deref(), Some("enough for today"));
    assert!(!outcome.outputs.contains_key("A"));
    assert!(runner.is_torn_down());

    assert_eq!(store.runs("wf-stop")[0].status, RunStatus::Stopped);
    assert_eq!(store.workflow_status("wf-stop"), Some(WorkflowStatus::Stopped));
    assert!(runner.trigger(json!({})).await.is_err());
}

#[tokio::test]
async fn exhausted_budget_ends_with_insufficient_credits() {
    let store = MemStore::new().into_shared();
    store.set_budget(OWNER, 0.0).unwrap();
    let model = chain(
        "wf-credits",
        &[("T", "manual-trigger", "trigger"), ("S", "slow", "action"), ("A", "echo", "action")],
        &[("T", "S"), ("S", "A")],
    );
    let mut config = Config::default();
    config.engine.non_metered_node_types.push("manual-trigger".to_string());
    let runner = runner(&store, &model, config);

    let outcome = runner.trigger_and_wait(json!({})).await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::InsufficientResource);
    assert!(outcome.stop_reason.unwrap().starts_with("Insufficient credits"));
    assert!(!outcome.outputs.contains_key("A"));
    assert!(runner.is_torn_down());

    assert_eq!(store.runs("wf-credits")[0].status, RunStatus::InsufficientCredits);
    assert_eq!(store.workflow_status("wf-credits"), Some(WorkflowStatus::InsufficientCredits));
}

#[tokio::test]
async fn sub_workflow_runs_nested_with_merged_input() {
    let store = MemStore::new().into_shared();
    let child = chain("wf-child", &[("C1", "echo", "action"), ("C2", "counter", "utility")], &[("C1", "C2")]);
    store.save_workflow(&child, OWNER, WorkflowStatus::Inactive).unwrap();

    let parent = workflow(json!({
        "id": "wf-parent",
        "nodes": [
            { "id": "T", "type": "manual-trigger", "category": "trigger" },
            { "id": "R", "type": "run-workflow", "category": "control", "parameters": { "workflowId": "wf-child", "inputData": "{\"count\": 10}" } }
        ],
        "edges": [{ "id": "e0", "start": { "id": "T" }, "end": { "id": "R" } }]
    }));
    let runner = runner(&store, &parent, Config::default());

    let outcome = runner.trigger_and_wait(json!({ "from": "parent" })).await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Completed);
    let r = &outcome.outputs["R"];
    assert_eq!(r["success"], true);
    assert_eq!(r["subWorkflowCompleted"], true);
    assert_eq!(r["outputs"]["C1"], json!({ "from": "parent", "count": 10 }));
    assert_eq!(r["outputs"]["C2"], json!({ "count": 11 }));

    // nested runs never touch the child's persisted status
    assert_eq!(store.workflow_status("wf-child"), Some(WorkflowStatus::Inactive));
    runner.teardown().await;
}

#[tokio::test]
async fn sub_workflow_of_another_owner_is_a_node_error() {
    let store = MemStore::new().into_shared();
    let child = chain("wf-foreign", &[("C1", "echo", "action")], &[]);
    store.save_workflow(&child, "someone-else", WorkflowStatus::Inactive).unwrap();

    let mut parent = chain("wf-thief", &[("T", "manual-trigger", "trigger"), ("R", "run-workflow", "control")], &[("T", "R")]);
    parent.nodes[1].parameters.insert("workflowId".to_string(), json!("wf-foreign"));
    let runner = runner(&store, &parent, Config::default());

    let outcome = runner.trigger_and_wait(json!({})).await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Error);
    assert!(outcome.errors["R"].contains("permission"));
    runner.teardown().await;
}

#[tokio::test]
async fn failing_sub_workflow_fails_its_node() {
    let store = MemStore::new().into_shared();
    let child = chain("wf-flaky", &[("C1", "fail", "action")], &[]);
    store.save_workflow(&child, OWNER, WorkflowStatus::Inactive).unwrap();

    let mut parent = chain(
        "wf-caller",
        &[("T", "manual-trigger", "trigger"), ("R", "run-workflow", "control"), ("A", "echo", "action")],
        &[("T", "R"), ("R", "A")],
    );
    parent.nodes[1].parameters.insert("workflowId".to_string(), json!("wf-flaky"));
    let runner = runner(&store, &parent, Config::default());

    let outcome = runner.trigger_and_wait(json!({})).await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Error);
    assert_eq!(outcome.errors["R"], "Sub-workflow wf-flaky failed: C1: boom");
    assert!(!outcome.outputs.contains_key("A"));
    assert_eq!(store.workflow_status("wf-caller"), Some(WorkflowStatus::Error));
    runner.teardown().await;
}

#[tokio::test]
async fn exhausted_sub_workflow_ends_the_parent_run() {
    let store = MemStore::new().into_shared();
    store.set_budget(OWNER, 0.0).unwrap();
    let child = chain("wf-costly", &[("C1", "slow", "action")], &[]);
    store.save_workflow(&child, OWNER, WorkflowStatus::Inactive).unwrap();

    let mut parent = chain(
        "wf-spender",
        &[("T", "manual-trigger", "trigger"), ("R", "run-workflow", "control"), ("A", "echo", "action")],
        &[("T", "R"), ("R", "A")],
    );
    parent.nodes[1].parameters.insert("workflowId".to_string(), json!("wf-costly"));
    let mut config = Config::default();
    config.engine.non_metered_node_types.push("manual-trigger".to_string());
    let runner = runner(&store, &parent, config);

    let outcome = runner.trigger_and_wait(json!({})).await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::InsufficientResource);
    assert!(outcome.stop_reason.unwrap().starts_with("Insufficient credits: sub-workflow wf-costly"));
    assert!(!outcome.outputs.contains_key("A"));
    assert!(runner.is_torn_down());
    assert_eq!(store.runs("wf-spender")[0].status, RunStatus::InsufficientCredits);
}

#[tokio::test]
async fn metering_charges_elapsed_seconds() {
    let store = MemStore::new().into_shared();
    store.set_budget(OWNER, 1.0).unwrap();
    let model = chain(
        "wf-metered",
        &[("T", "manual-trigger", "trigger"), ("S1", "slow", "action"), ("S2", "slow", "action")],
        &[("T", "S1"), ("S1", "S2")],
    );
    let runner = runner(&store, &model, Config::default());

    let outcome = runner.trigger_and_wait(json!({})).await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert!(outcome.resource_units >= 0.04 && outcome.resource_units < 1.0, "charged {}", outcome.resource_units);

    let run = &store.runs("wf-metered")[0];
    assert_eq!(run.resource_units, outcome.resource_units);
    let s1 = store.node_records(run.id.as_str()).into_iter().find(|r| r.node_id == "S1").unwrap();
    assert!(s1.resource_units > 0.0 && s1.resource_units < 1.0);
    runner.teardown().await;
}

#[tokio::test]
async fn oauth_nodes_receive_an_access_token() {
    let store = MemStore::new().into_shared();
    let model = workflow(json!({
        "id": "wf-oauth",
        "nodes": [
            { "id": "T", "type": "manual-trigger", "category": "trigger" },
            { "id": "G", "type": "echo", "category": "action", "requiresOAuth": true, "oauthProvider": "google" },
            { "id": "H", "type": "echo", "category": "action", "requiresOAuth": true, "oauthProvider": "hubspot" }
        ],
        "edges": [
            { "id": "e0", "start": { "id": "T" }, "end": { "id": "G" } },
            { "id": "e1", "start": { "id": "T" }, "end": { "id": "H" } }
        ]
    }));
    store.save_workflow(&model, OWNER, WorkflowStatus::Listening).unwrap();
    let services = EngineBuilder::new()
        .store(store.clone())
        .tool(ToolCategory::Actions, Arc::new(EchoTool))
        .trigger(Arc::new(ManualTrigger))
        .credentials(Arc::new(StaticCredentials::new().with_token(OWNER, "google", "tok-123")))
        .services()
        .unwrap();
    let options = RunnerOptions {
        owner_id: OWNER.to_string(),
        ..Default::default()
    };
    let runner = Runner::new(&model, options, services).unwrap();

    let outcome = runner.trigger_and_wait(json!({})).await.unwrap();
    assert_eq!(outcome.outputs["G"]["accessToken"], "tok-123");
    assert_eq!(outcome.errors["H"], "OAuth tokens not found for provider: hubspot");
    assert_eq!(outcome.status, OutcomeStatus::Error);
    runner.teardown().await;
}

#[tokio::test]
async fn custom_nodes_run_their_script() {
    let store = MemStore::new().into_shared();
    let model = workflow(json!({
        "id": "wf-script",
        "nodes": [
            { "id": "T", "type": "manual-trigger", "category": "trigger" },
            { "id": "J", "type": "doubler", "category": "custom", "parameters": { "tag": "x", "code": "return { doubled: input.n * 2, tag: params.tag };" } }
        ],
        "edges": [{ "id": "e0", "start": { "id": "T" }, "end": { "id": "J" } }]
    }));
    let runner = runner(&store, &model, Config::default());

    let outcome = runner.trigger_and_wait(json!({ "n": 21 })).await.unwrap();
    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert_eq!(outcome.outputs["J"], json!({ "doubled": 42, "tag": "x" }));
    runner.teardown().await;
}

#[tokio::test]
async fn unknown_tool_is_reported_per_node() {
    let store = MemStore::new().into_shared();
    let model = chain("wf-unknown", &[("T", "manual-trigger", "trigger"), ("X", "send-fax", "action")], &[("T", "X")]);
    let runner = runner(&store, &model, Config::default());

    let outcome = runner.trigger_and_wait(json!({})).await.unwrap();
    assert_eq!(outcome.errors["X"], "Tool not found: send-fax");
    runner.teardown().await;
}

#[tokio::test]
async fn passes_run_one_at_a_time() {
    let store = MemStore::new().into_shared();
    let model = chain("wf-fifo", &[("T", "manual-trigger", "trigger"), ("S", "slow", "action")], &[("T", "S")]);
    let runner = runner(&store, &model, Config::default());

    let (a, b) = tokio::join!(runner.trigger_and_wait(json!({ "n": 1 })), runner.trigger_and_wait(json!({ "n": 2 })));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_ne!(a.run_id, b.run_id);

    let runs = store.runs("wf-fifo");
    assert_eq!(runs.len(), 2);
    assert!(runs[0].end_time <= runs[1].start_time);
    runner.teardown().await;
}
