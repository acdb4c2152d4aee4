//! World events arriving from the simulation.

use std::sync::{Arc, Mutex};

use botgate_domain::{classify, event_types, Admission, EventId, IdempotencyCache, PriorityLevel};
use botgate_shared::{IncomingWorldEvent, ProtocolError};

use crate::infrastructure::metrics::GatewayMetrics;
use crate::infrastructure::ports::ClockPort;
use crate::use_cases::commands::{CommandQueue, CompleteReason};
use crate::use_cases::delivery::EventDispatcher;

#[derive(Debug, Clone, PartialEq)]
pub enum IntakeOutcome {
    Accepted {
        event_id: EventId,
        priority: PriorityLevel,
        admission: Admission,
    },
    /// The idempotency key was already seen; nothing was queued.
    Duplicate,
}

pub struct EventIntake {
    dispatcher: Arc<EventDispatcher>,
    commands: Arc<CommandQueue>,
    seen: Mutex<IdempotencyCache>,
    metrics: Arc<GatewayMetrics>,
    clock: Arc<dyn ClockPort>,
}

impl EventIntake {
    pub fn new(
        dispatcher: Arc<EventDispatcher>,
        commands: Arc<CommandQueue>,
        metrics: Arc<GatewayMetrics>,
        clock: Arc<dyn ClockPort>,
        idempotency_capacity: usize,
    ) -> Self {
        Self {
            dispatcher,
            commands,
            seen: Mutex::new(IdempotencyCache::new(idempotency_capacity)),
            metrics,
            clock,
        }
    }

    /// Classify and queue an event for its target agent.
    pub async fn receive(
        &self,
        idempotency_key: String,
        incoming: IncomingWorldEvent,
    ) -> Result<IntakeOutcome, ProtocolError> {
        let target = incoming.target_agent_id.clone();
        let hint = incoming.priority;
        let event = incoming.into_world_event(EventId::generate(), self.clock.now())?;

        let fresh = self
            .seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .add(idempotency_key.clone());
        if !fresh {
            tracing::debug!(
                agent_id = %target,
                idempotency_key = %idempotency_key,
                "Duplicate world event ignored"
            );
            return Ok(IntakeOutcome::Duplicate);
        }

        let priority = classify(&event, Some(hint));
        let event_id = event.id().clone();
        let finishes_action = event.event_type() == event_types::ACTION_FINISHED;
        self.metrics
            .events_received
            .with_label_values(&[event.event_type(), priority.label()])
            .inc();
        tracing::info!(
            agent_id = %target,
            event_id = %event_id,
            event_type = %event.event_type(),
            priority = priority.label(),
            "World event received"
        );

        let admission = self.dispatcher.enqueue(&target, event, priority).await;

        if finishes_action {
            self.commands.complete(&target, CompleteReason::ActionFinished);
        }

        Ok(IntakeOutcome::Accepted {
            event_id,
            priority,
            admission,
        })
    }
}
