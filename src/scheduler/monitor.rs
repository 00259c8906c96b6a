use std::sync::Arc;

use tracing::trace;

use crate::{
    Result,
    broadcast::StatusBroadcaster,
    events::GraphEvent,
    runtime::{Channel, ChannelEvent, ChannelOptions},
};

/// Bridges channel events to the status broadcaster.
pub(crate) struct Monitor {
    channel: Arc<Channel>,
    broadcaster: Arc<dyn StatusBroadcaster>,
}

impl Monitor {
    pub fn new(
        channel: Arc<Channel>,
        broadcaster: Arc<dyn StatusBroadcaster>,
    ) -> Self {
        Self {
            channel,
            broadcaster,
        }
    }

    pub fn monitor(&self) -> Result<()> {
        let events = ChannelEvent::channel(self.channel.clone(), ChannelOptions::default())?;

        let broadcaster = self.broadcaster.clone();
        events.on_event(move |e| match &e.event {
            GraphEvent::Workflow(w) => broadcaster.publish(&e.owner, w.status().as_ref(), w.payload(&e.wid)),
            GraphEvent::Node(n) => trace!(workflow_id = e.wid, node_id = e.nid, event = n.str(), "node event"),
        });

        events.on_log(|log| {
            trace!(workflow_id = log.wid, run_id = log.run_id, node_id = log.nid, "{}", log.content);
        });
        Ok(())
    }
}
