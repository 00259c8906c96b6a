use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

/// One-shot termination signal shared between a task and its owners.
///
/// `shutdown` is idempotent; every pending and future `wait` resolves once it
/// has been called.
pub struct Shutdown {
    terminated: AtomicBool,
    sender: watch::Sender<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            terminated: AtomicBool::new(false),
            sender,
        }
    }

    /// Signal termination. Returns `true` only for the first call.
    pub fn shutdown(&self) -> bool {
        let first = !self.terminated.swap(true, Ordering::SeqCst);
        self.sender.send_replace(true);
        first
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut receiver = self.sender.subscribe();
        async move {
            let _ = receiver.wait_for(|terminated| *terminated).await;
        }
    }
}
