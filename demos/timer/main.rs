use std::{sync::Arc, time::Duration};

use tracing_subscriber::EnvFilter;
use trigflow::{ChannelEvent, ChannelOptions, EngineBuilder, WorkflowModel, store::MemStore, store::data::WorkflowStatus};

const OWNER: &str = "demo";

#[tokio::main]
async fn main() -> trigflow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();

    let text = include_str!("./workflow.json");
    let workflow = WorkflowModel::from_json(text)?;

    let store = Arc::new(MemStore::new());
    store.save_workflow(&workflow, OWNER, WorkflowStatus::Inactive)?;

    let scheduler = EngineBuilder::new().store(store.clone()).build()?;

    ChannelEvent::channel(scheduler.channel(), ChannelOptions::with_wid(&workflow.id))?.on_status(|wid, event| {
        println!("{wid}: {}", event.status());
    });

    scheduler.launch()?;
    scheduler.activate(workflow.clone(), OWNER, None).await?;

    for _ in 0..50 {
        if store.workflow_status(&workflow.id) == Some(WorkflowStatus::Stopped) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    for run in store.runs(&workflow.id) {
        println!("run {} {}:\n{}", run.id, run.status, run.log);
    }

    scheduler.shutdown().await;
    Ok(())
}
