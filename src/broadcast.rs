//! Fire-and-forget status notifications to the owner of a workflow.

use serde_json::Value;
use tracing::trace;

pub trait StatusBroadcaster: Send + Sync {
    /// Publish a status event. Must not block; failures are the
    /// implementation's concern.
    fn publish(
        &self,
        owner_id: &str,
        event_type: &str,
        payload: Value,
    );
}

/// Broadcaster that only traces what it would have sent.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBroadcaster;

impl StatusBroadcaster for NoopBroadcaster {
    fn publish(
        &self,
        owner_id: &str,
        event_type: &str,
        payload: Value,
    ) {
        trace!(owner_id, event_type, %payload, "status event");
    }
}
