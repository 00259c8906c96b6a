//! # Trigflow
//!
//! Trigflow is a trigger-driven workflow runtime written in Rust.
//! It is designed to be embedded in a host service that owns persistence,
//! HTTP and notifications, and hands workflows to the engine to keep alive.
//!
//! ## Core Features
//!
//! - **Bounded Activation**: a fixed worker pool sets up triggers; listening workflows cost no worker
//! - **Actor Runners**: each live workflow runs its passes one at a time on its own task
//! - **Conditional Graph Walk**: edges carry conditions and traversal caps, loops are bounded
//! - **Pluggable Collaborators**: history store, tools, trigger adapters, credentials and broadcasting are traits
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trigflow::{EngineBuilder, WorkflowModel};
//!
//! let scheduler = EngineBuilder::new().store(store).build()?;
//! scheduler.launch()?;
//!
//! let workflow = WorkflowModel::from_json(json_str)?;
//! scheduler.activate(workflow, "owner-1", None).await?;
//!
//! // on restart
//! scheduler.restart_active_workflows().await?;
//! ```

mod builder;
mod error;
mod model;
mod utils;

pub mod broadcast;
pub mod common;
pub mod config;
pub mod credentials;
pub mod events;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod tools;
pub mod triggers;
pub mod workflow;

use std::sync::{Arc, RwLock};

pub use builder::EngineBuilder;
pub use config::Config;
pub use error::TrigflowError;
pub use model::*;
pub use runtime::{ChannelEvent, ChannelOptions, RunOutcome, Runner, RunnerOptions};
pub use scheduler::{ActivationResult, Scheduler, WorkflowState};

/// Result type alias for Trigflow operations.
pub type Result<T> = std::result::Result<T, TrigflowError>;

/// Thread-safe shared lock wrapper using Arc<RwLock<T>>.
pub(crate) type ShareLock<T> = Arc<RwLock<T>>;
