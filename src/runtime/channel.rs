use std::sync::{Arc, PoisonError, RwLock};

use futures::future::BoxFuture;
use tokio::runtime::Handle;

use crate::{
    Result, ShareLock, TrigflowError,
    common::{BroadcastQueue, Shutdown},
    events::{Event, GraphEvent, Log, Message, WorkflowEvent},
};

macro_rules! dispatch_event {
    ($handles:expr, $(&$item:ident), +) => {
        let handlers = $handles.read().unwrap_or_else(PoisonError::into_inner).clone();
        for handle in handlers.iter() {
            (handle)($(&$item),+);
        }
    };
}

macro_rules! dispatch_event_async {
    ($runtime:expr, $handles:expr, $(&$item:ident), +) => {
        let handles = $handles.clone();

        $runtime.spawn(async move {
            let handlers = handles.read().unwrap_or_else(PoisonError::into_inner).clone();
            for handle in handlers.iter() {
                (handle)($(&$item),+).await;
            }
        });
    };
}

const EVENT_QUEUE_SIZE: usize = 2048;
const LOG_QUEUE_SIZE: usize = 4096;

pub type WorkflowEventHandle = Arc<dyn Fn(&Event<Message>) + Send + Sync>;
pub type WorkflowLogHandle = Arc<dyn Fn(&Event<Log>) + Send + Sync>;
pub type WorkflowEventHandleAsync = Arc<dyn Fn(&Event<Message>) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// use the glob pattern to match the workflow id
    /// eg. wf-billing*
    pub wid: String,

    /// use the glob pattern to match the node id
    /// eg. nid1*
    pub nid: String,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            wid: "*".to_string(),
            nid: "*".to_string(),
        }
    }
}

impl ChannelOptions {
    pub fn with_wid(wid: &str) -> Self {
        Self {
            wid: wid.to_string(),
            ..Default::default()
        }
    }
}

/// In-process event bus shared by every runner of one scheduler.
#[derive(Clone)]
pub struct Channel {
    event_queue: Arc<BroadcastQueue<Event<Message>>>,
    log_queue: Arc<BroadcastQueue<Event<Log>>>,

    events: ShareLock<Vec<WorkflowEventHandle>>,
    logs: ShareLock<Vec<WorkflowLogHandle>>,
    events_async: ShareLock<Vec<WorkflowEventHandleAsync>>,

    runtime: Handle,
    shutdown: Arc<Shutdown>,
}

impl Channel {
    pub(crate) fn new(runtime: Handle) -> Self {
        Self {
            event_queue: BroadcastQueue::new(EVENT_QUEUE_SIZE),
            log_queue: BroadcastQueue::new(LOG_QUEUE_SIZE),
            events: Arc::new(RwLock::new(Vec::new())),
            logs: Arc::new(RwLock::new(Vec::new())),
            events_async: Arc::new(RwLock::new(Vec::new())),
            runtime,
            shutdown: Arc::new(Shutdown::new()),
        }
    }

    pub(crate) fn emit(
        &self,
        wid: &str,
        owner: &str,
        nid: &str,
        event: GraphEvent,
    ) {
        self.event_queue.send(Event::new(&Message {
            wid: wid.to_string(),
            owner: owner.to_string(),
            nid: nid.to_string(),
            event,
        }));
    }

    pub(crate) fn emit_log(
        &self,
        log: Log,
    ) {
        self.log_queue.send(Event::new(&log));
    }

    pub(crate) fn listen(&self) {
        let mut event_queue = self.event_queue.subscribe();
        let mut log_queue = self.log_queue.subscribe();
        let events = self.events.clone();
        let logs = self.logs.clone();
        let events_async = self.events_async.clone();
        let runtime = self.runtime.clone();

        let shutdown = self.shutdown.clone();
        self.runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    Ok(e) = event_queue.recv() => {
                        let evt = e.clone();
                        dispatch_event!(events, &evt);
                        dispatch_event_async!(runtime, events_async, &e);
                    }
                    Ok(log) = log_queue.recv() => {
                        dispatch_event!(logs, &log);
                    }
                }
            }
        });
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.shutdown();
    }
}

/// Filtered subscription to a [`Channel`].
#[derive(Clone)]
pub struct ChannelEvent {
    channel: Arc<Channel>,

    glob: (globset::GlobMatcher, globset::GlobMatcher),
}

impl ChannelEvent {
    pub fn channel(
        channel: Arc<Channel>,
        options: ChannelOptions,
    ) -> Result<Self> {
        let compile = |pattern: &str| {
            globset::Glob::new(pattern).map(|g| g.compile_matcher()).map_err(|e| TrigflowError::Engine(format!("invalid channel pattern {pattern}: {e}")))
        };

        Ok(Self {
            channel,
            glob: (compile(&options.wid)?, compile(&options.nid)?),
        })
    }

    /// Called for every workflow status transition.
    pub fn on_status(
        &self,
        f: impl Fn(&str, &WorkflowEvent) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        self.push_event(Arc::new(move |e| {
            if let GraphEvent::Workflow(w) = &e.event {
                if glob.0.is_match(&e.wid) {
                    f(&e.wid, w);
                }
            }
        }));
    }

    pub fn on_error(
        &self,
        f: impl Fn(&Event<Message>) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        self.push_event(Arc::new(move |e| {
            if e.event.is_error() && is_match(&glob, e) {
                f(e);
            }
        }));
    }

    pub fn on_event(
        &self,
        f: impl Fn(&Event<Message>) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        self.push_event(Arc::new(move |e| {
            if is_match(&glob, e) {
                f(e);
            }
        }));
    }

    pub fn on_log(
        &self,
        f: impl Fn(&Event<Log>) + Send + Sync + 'static,
    ) {
        let glob = self.glob.clone();

        self.channel.logs.write().unwrap_or_else(PoisonError::into_inner).push(Arc::new(move |e| {
            let (pat_wid, pat_nid) = &glob;
            if pat_wid.is_match(&e.wid) && pat_nid.is_match(&e.nid) {
                f(e);
            }
        }));
    }

    pub fn on_event_async<F>(
        &self,
        f: F,
    ) where
        F: Fn(&Event<Message>) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let glob = self.glob.clone();

        self.channel.events_async.write().unwrap_or_else(PoisonError::into_inner).push(Arc::new(move |e| {
            if is_match(&glob, e) {
                f(e)
            } else {
                Box::pin(async {})
            }
        }));
    }

    fn push_event(
        &self,
        handle: WorkflowEventHandle,
    ) {
        self.channel.events.write().unwrap_or_else(PoisonError::into_inner).push(handle);
    }
}

fn is_match(
    glob: &(globset::GlobMatcher, globset::GlobMatcher),
    e: &Event<Message>,
) -> bool {
    let (pat_wid, pat_nid) = glob;
    pat_wid.is_match(&e.wid) && (e.nid.is_empty() || pat_nid.is_match(&e.nid))
}
