use std::fmt;

#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// start time in milliseconds
    Running(i64),
    /// elapsed milliseconds
    Succeeded(u64),
    Error(ErrorReason),
}

impl NodeEvent {
    pub fn str(&self) -> &str {
        match self {
            NodeEvent::Running(_) => "Running",
            NodeEvent::Succeeded(_) => "Succeeded",
            NodeEvent::Error(_) => "Error",
        }
    }
}

#[derive(Debug, Clone)]
pub enum ErrorReason {
    Failed(String),
    ResourceExhausted(String),
    Setup(String),
}

impl fmt::Display for ErrorReason {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ErrorReason::Failed(msg) => write!(f, "Failed: {}", msg),
            ErrorReason::ResourceExhausted(msg) => write!(f, "Resource exhausted: {}", msg),
            ErrorReason::Setup(msg) => write!(f, "Setup failed: {}", msg),
        }
    }
}
