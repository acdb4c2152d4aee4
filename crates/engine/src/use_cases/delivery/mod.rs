//! World event delivery: per-agent lanes, ack deadlines and the dispatcher.

mod dispatcher;
mod registry;
mod timer;

pub use dispatcher::EventDispatcher;
pub use registry::{AgentLane, BotQueueRegistry, SharedLane};
pub use timer::AckTimer;
