//! Core delivery model for the bot gateway.
//!
//! Everything here is synchronous and I/O free: events, priorities, queues,
//! the per-agent delivery state machine and the small caches around them.
//! The engine crate drives these types from tokio tasks.

pub mod delivery;
pub mod error;
pub mod event_queue;
pub mod idempotency;
pub mod ids;
pub mod priority;
pub mod subscription;
pub mod world_event;

pub use delivery::{
    AckOutcome, AckPlan, Admission, AgentDelivery, DeadlineOutcome, Delivery, DeliveryPlans,
    DeliveryState, Dispatch, DispatchStep, InFlight,
};
pub use error::DomainError;
pub use event_queue::{
    DropReason, DroppedEvent, EventQueue, QueuedEvent, DEFAULT_PER_PRIORITY_LIMIT,
};
pub use idempotency::IdempotencyCache;
pub use ids::{AgentId, BotToken, CommandId, ConnectionId, EventId, PlayerId, WorldId};
pub use priority::{classify, PriorityLevel};
pub use subscription::SubscriptionMatcher;
pub use world_event::{event_types, EventKind, WorldEvent, WorldEventPayload};
