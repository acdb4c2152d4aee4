//! Bot commands: translation, per-agent serialisation and routing.

mod mapper;
mod queue;
mod router;

pub use mapper::{BotCommandType, CommandMapper};
pub use queue::{CommandQueue, CommandResult, CompleteReason, QueuedCommand};
pub use router::{CommandRouter, RouteOutcome};
