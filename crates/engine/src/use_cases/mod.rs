//! Use cases - gateway flows.
//!
//! Each module orchestrates one direction of traffic through the gateway.

pub mod commands;
pub mod delivery;
pub mod intake;

pub use commands::{CommandQueue, CommandRouter};
pub use delivery::{BotQueueRegistry, EventDispatcher};
pub use intake::{EventIntake, IntakeOutcome};
