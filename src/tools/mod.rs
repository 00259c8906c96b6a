//! Executable behavior behind node types.
//!
//! Tools are looked up by `node.type` in a typed registry populated at
//! startup: first in the built-in library by category, then among plugins.
//! Adding a tool never touches the dispatcher.

mod controls;
mod registry;
mod script;
mod utilities;

use async_trait::async_trait;
use serde_json::Value;

use crate::{Result, common::Vars, runtime::RunContext};

pub use controls::{DelayTool, RunWorkflowTool};
pub use registry::{ToolCategory, ToolRegistry};
pub use script::{QuickJsBackend, ScriptBackend};
pub use utilities::CounterTool;

/// Node type handled inline by the dispatcher.
pub const STOP_WORKFLOW: &str = "stop-workflow";

#[async_trait]
pub trait Tool: Send + Sync {
    /// The `node.type` this tool serves.
    fn name(&self) -> &str;

    /// Optional JSON schema the resolved parameters are validated against
    /// before execution.
    fn schema(&self) -> Option<Value> {
        None
    }

    /// Execute the tool.
    ///
    /// # Arguments
    ///
    /// * `params` - node parameters with every placeholder resolved.
    /// * `input` - output of the node this one was reached from.
    /// * `ctx` - the [`RunContext`] of the current pass.
    ///
    /// An `Err` and an output object carrying a non-null `error` field are
    /// both recorded as a node failure.
    async fn execute(
        &self,
        params: Vars,
        input: Value,
        ctx: &RunContext,
    ) -> Result<Value>;
}
