use std::{fs, path::Path, time::Duration};

use serde::Deserialize;

use crate::{Result, TrigflowError};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// scheduler config
    pub scheduler: SchedulerConfig,
    /// per-run engine config
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// size of the activation worker pool, defaults to 8
    pub worker_count: usize,
    /// soft ceiling on live runners; exceeding it still queues, defaults to 100
    pub max_concurrent_workflows: usize,
    /// delay before retrying a drain when no worker is idle, in milliseconds
    pub drain_retry_interval_ms: u64,
    /// number of workflows read per batch during restart recovery
    pub restart_batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// upper bound on traversals of any single edge within one pass
    pub global_max_iterations: u32,
    /// capacity of each runner's command queue
    pub command_queue_size: usize,
    /// node types whose execution time is never metered
    pub non_metered_node_types: Vec<String>,
    /// resolve `{{...}}` placeholders nested inside other placeholders
    pub nested_placeholders: bool,
    /// maximum nesting of `run-workflow` nodes
    pub max_sub_workflow_depth: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 8,
            max_concurrent_workflows: 100,
            drain_retry_interval_ms: 1000,
            restart_batch_size: 100,
        }
    }
}

impl SchedulerConfig {
    pub fn drain_retry_interval(&self) -> Duration {
        Duration::from_millis(self.drain_retry_interval_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            global_max_iterations: 100,
            command_queue_size: 100,
            non_metered_node_types: vec!["delay".to_string()],
            nested_placeholders: false,
            max_sub_workflow_depth: 8,
        }
    }
}

impl Config {
    pub fn create<T: AsRef<Path>>(path: T) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref()).map_err(|e| TrigflowError::Config(format!("failed to load config file {:?}: {}", path.as_ref(), e)))?;

        Self::load_from_str(data.as_str())
    }

    pub fn load_from_str(toml_str: &str) -> Result<Self> {
        let config = toml::from_str::<Config>(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.scheduler.worker_count == 0 {
            return Err(TrigflowError::Config("scheduler.worker_count must be at least 1".to_string()));
        }
        if self.scheduler.restart_batch_size == 0 {
            return Err(TrigflowError::Config("scheduler.restart_batch_size must be at least 1".to_string()));
        }
        if self.engine.command_queue_size == 0 {
            return Err(TrigflowError::Config("engine.command_queue_size must be at least 1".to_string()));
        }
        Ok(())
    }
}
