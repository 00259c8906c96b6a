//! Error types for Trigflow.
//!
//! All errors in Trigflow are represented by the `TrigflowError` enum,
//! which provides specific variants for different error categories.

use std::{io::ErrorKind, string::FromUtf8Error};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all Trigflow operations.
///
/// Node-level failures never surface as this type past the dispatcher; they
/// are converted into data. `ResourceExhausted` is the one kind the runner
/// inspects to end a run early.
#[derive(Deserialize, Serialize, Error, Debug, Clone, PartialEq)]
pub enum TrigflowError {
    /// Engine-level errors (startup, shutdown, wiring).
    #[error("{0}")]
    Engine(String),

    /// Configuration parsing or validation errors.
    #[error("{0}")]
    Config(String),

    /// Data conversion errors (JSON, TOML).
    #[error("{0}")]
    Convert(String),

    /// Script execution errors for custom nodes.
    #[error("{0}")]
    Script(String),

    /// Runtime execution errors.
    #[error("{0}")]
    Runtime(String),

    /// History store errors.
    #[error("{0}")]
    Store(String),

    /// Workflow definition errors (malformed graph).
    #[error("{0}")]
    Workflow(String),

    /// Node definition or execution errors.
    #[error("{0}")]
    Node(String),

    /// Edge definition errors.
    #[error("{0}")]
    Edge(String),

    /// Tool resolution or execution errors.
    #[error("{0}")]
    Tool(String),

    /// Trigger setup or processing errors.
    #[error("{0}")]
    Trigger(String),

    /// Credential lookup errors.
    #[error("{0}")]
    Credential(String),

    /// The owner has no resource balance left to run this node.
    #[error("Insufficient credits: {0}")]
    ResourceExhausted(String),

    /// Message queue errors.
    #[error("{0}")]
    Queue(String),

    /// I/O operation errors.
    #[error("{0}")]
    IoError(String),
}

impl TrigflowError {
    /// Whether this error must end the run with an insufficient-resource outcome.
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(self, TrigflowError::ResourceExhausted(_))
    }
}

impl From<TrigflowError> for String {
    fn from(val: TrigflowError) -> Self {
        val.to_string()
    }
}

impl From<std::io::Error> for TrigflowError {
    fn from(error: std::io::Error) -> Self {
        TrigflowError::IoError(error.to_string())
    }
}

impl From<TrigflowError> for std::io::Error {
    fn from(val: TrigflowError) -> Self {
        #[allow(clippy::io_other_error)]
        std::io::Error::new(ErrorKind::Other, val.to_string())
    }
}

impl From<FromUtf8Error> for TrigflowError {
    fn from(_: FromUtf8Error) -> Self {
        TrigflowError::Runtime("Error with utf-8 string convert".to_string())
    }
}

impl From<serde_json::Error> for TrigflowError {
    fn from(error: serde_json::Error) -> Self {
        TrigflowError::Convert(error.to_string())
    }
}

impl From<toml::de::Error> for TrigflowError {
    fn from(error: toml::de::Error) -> Self {
        TrigflowError::Config(error.to_string())
    }
}

impl From<jsonschema::ValidationError<'_>> for TrigflowError {
    fn from(error: jsonschema::ValidationError<'_>) -> Self {
        TrigflowError::Tool(error.to_string())
    }
}
