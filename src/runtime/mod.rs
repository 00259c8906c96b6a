mod channel;
mod context;
pub(crate) mod dispatcher;
pub(crate) mod runner;

pub use channel::{Channel, ChannelEvent, ChannelOptions};
pub use context::{RunContext, Services, StopSignal, TriggerContext, TriggerSender};
pub use dispatcher::{DispatchResult, NodeError, NodeErrorKind};
pub use runner::{OutcomeStatus, RunOutcome, Runner, RunnerCommand, RunnerOptions, RunnerSnapshot, SetupReport};
