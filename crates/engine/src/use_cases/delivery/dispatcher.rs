//! Event dispatcher: pushes queued world events to bots one at a time and
//! drives the ack / retry cycle.
//!
//! All state for an agent lives in its [`AgentLane`]. Every entry point takes
//! the lane lock first and only then reads the connection index, so the two
//! locks are always acquired in the same order.

use std::sync::Arc;

use botgate_domain::{
    AckOutcome, Admission, AgentId, DeadlineOutcome, Delivery, DeliveryPlans, Dispatch,
    DispatchStep, DropReason, DroppedEvent, EventId, PriorityLevel, SubscriptionMatcher,
    WorldEvent,
};
use botgate_shared::WorldEventMessage;

use super::registry::{AgentLane, BotQueueRegistry};
use super::timer::AckTimer;
use crate::api::connections::{ConnectionManager, TransportError};
use crate::infrastructure::metrics::GatewayMetrics;
use crate::infrastructure::ports::ClockPort;

pub struct EventDispatcher {
    registry: Arc<BotQueueRegistry>,
    connections: Arc<ConnectionManager>,
    metrics: Arc<GatewayMetrics>,
    clock: Arc<dyn ClockPort>,
    plans: DeliveryPlans,
}

impl EventDispatcher {
    pub fn new(
        registry: Arc<BotQueueRegistry>,
        connections: Arc<ConnectionManager>,
        metrics: Arc<GatewayMetrics>,
        clock: Arc<dyn ClockPort>,
        plans: DeliveryPlans,
    ) -> Self {
        Self {
            registry,
            connections,
            metrics,
            clock,
            plans,
        }
    }

    pub fn registry(&self) -> &Arc<BotQueueRegistry> {
        &self.registry
    }

    // =========================================================================
    // Intake
    // =========================================================================

    /// Queue an event for an agent and send it right away if the agent is idle.
    pub async fn enqueue(
        self: &Arc<Self>,
        agent_id: &AgentId,
        event: WorldEvent,
        priority: PriorityLevel,
    ) -> Admission {
        let lane = self.registry.get(agent_id);
        let mut lane = lane.lock().await;

        // A lane created after teardown starts suspended even though the
        // agent's socket may still be live.
        if lane.delivery.is_suspended() {
            if let Some(conn) = self.connections.get_by_agent_id(agent_id).await {
                lane.delivery.resume(conn.subscription.clone());
                tracing::debug!(agent_id = %agent_id, "Delivery resumed for live connection");
            }
        }

        let event_id = event.id().clone();
        let event_type = event.event_type().to_string();
        let admission = lane.delivery.admit(event, priority, self.clock.now());

        match &admission {
            Admission::Rejected => {
                tracing::debug!(
                    agent_id = %agent_id,
                    event_id = %event_id,
                    event_type = %event_type,
                    "Event skipped, agent not subscribed"
                );
                return admission;
            }
            Admission::Accepted { dropped } => {
                for item in dropped {
                    self.record_drop(agent_id, item);
                }
                tracing::debug!(
                    agent_id = %agent_id,
                    event_id = %event_id,
                    event_type = %event_type,
                    priority = priority.label(),
                    depth = lane.delivery.queue().depth(),
                    "Event queued"
                );
            }
        }

        self.metrics
            .record_queue_depth(agent_id, lane.delivery.queue());
        self.pump(agent_id, &mut lane).await;
        admission
    }

    /// Send the next event for an agent if nothing is in flight.
    pub async fn try_dispatch(self: &Arc<Self>, agent_id: &AgentId) {
        let Some(lane) = self.registry.peek(agent_id) else {
            return;
        };
        let mut lane = lane.lock().await;
        self.pump(agent_id, &mut lane).await;
    }

    // =========================================================================
    // Acknowledgment
    // =========================================================================

    pub async fn on_ack(self: &Arc<Self>, agent_id: &AgentId, event_id: &EventId) {
        let Some(lane) = self.registry.peek(agent_id) else {
            tracing::debug!(agent_id = %agent_id, event_id = %event_id, "Ack for unknown agent ignored");
            return;
        };
        let mut lane = lane.lock().await;

        match lane.delivery.acknowledge(event_id) {
            AckOutcome::Acknowledged { in_flight, removed } => {
                lane.cancel_timer();
                let event_type = in_flight.event.event_type();
                let latency = self.clock.now() - in_flight.enqueued_at;
                self.metrics
                    .dispatch_latency_ms
                    .with_label_values(&[event_type])
                    .observe(latency.num_milliseconds().max(0) as f64);
                self.metrics.record_dispatch(event_type, "acked");
                self.metrics
                    .record_queue_depth(agent_id, lane.delivery.queue());
                tracing::debug!(
                    agent_id = %agent_id,
                    event_id = %event_id,
                    event_type = %event_type,
                    attempt = in_flight.attempt,
                    removed,
                    "Event acknowledged"
                );
                self.pump(agent_id, &mut lane).await;
            }
            AckOutcome::Ignored => {
                tracing::debug!(agent_id = %agent_id, event_id = %event_id, "Stale ack ignored");
            }
        }
    }

    /// Deadline for `(event_id, attempt)` elapsed without an ack.
    pub async fn on_deadline(self: &Arc<Self>, agent_id: &AgentId, event_id: &EventId, attempt: u32) {
        let Some(lane) = self.registry.peek(agent_id) else {
            return;
        };
        let mut lane = lane.lock().await;
        lane.release_fired(event_id, attempt);

        match lane.delivery.on_deadline(event_id, attempt, &self.plans) {
            DeadlineOutcome::Stale => {
                tracing::debug!(agent_id = %agent_id, event_id = %event_id, attempt, "Stale ack deadline");
            }
            DeadlineOutcome::Retry(delivery) => {
                tracing::warn!(
                    agent_id = %agent_id,
                    event_id = %event_id,
                    event_type = %delivery.event.event_type(),
                    attempt = delivery.attempt,
                    "Ack timeout, resending event"
                );
                self.deliver(agent_id, &mut lane, delivery).await;
            }
            DeadlineOutcome::Exhausted(dropped) => {
                let event_type = dropped.item.event.event_type();
                self.metrics
                    .ack_failures
                    .with_label_values(&[event_type])
                    .inc();
                self.metrics.record_dispatch(event_type, "failed");
                self.record_drop(agent_id, &dropped);
                self.metrics
                    .record_queue_depth(agent_id, lane.delivery.queue());
                self.pump(agent_id, &mut lane).await;
            }
            DeadlineOutcome::Abandoned(in_flight) => {
                tracing::debug!(
                    agent_id = %agent_id,
                    event_id = %in_flight.event.id(),
                    "In-flight event left the queue before its ack"
                );
                self.pump(agent_id, &mut lane).await;
            }
        }
    }

    // =========================================================================
    // Connection lifecycle
    // =========================================================================

    /// A connection for the agent was registered; resume delivery.
    pub async fn on_connect(self: &Arc<Self>, agent_id: &AgentId, subscription: SubscriptionMatcher) {
        let lane = self.registry.get(agent_id);
        let mut lane = lane.lock().await;
        lane.cancel_timer();
        lane.delivery.resume(subscription);
        tracing::info!(
            agent_id = %agent_id,
            pending = lane.delivery.queue().depth(),
            "Delivery resumed"
        );
        self.pump(agent_id, &mut lane).await;
    }

    /// The agent's connection is gone. Pending events, including the one in
    /// flight, stay queued until it reconnects.
    pub async fn on_disconnect(&self, agent_id: &AgentId) {
        let Some(lane) = self.registry.peek(agent_id) else {
            return;
        };
        let mut lane = lane.lock().await;
        lane.cancel_timer();
        let in_flight = lane.delivery.suspend();
        tracing::info!(
            agent_id = %agent_id,
            pending = lane.delivery.queue().depth(),
            in_flight = ?in_flight.as_ref().map(|f| f.event.id().as_str()),
            "Delivery suspended"
        );
    }

    /// Discard the agent's lane entirely. Returns the number of events dropped.
    pub async fn teardown(&self, agent_id: &AgentId) -> usize {
        let Some(lane) = self.registry.delete(agent_id) else {
            return 0;
        };
        let mut lane = lane.lock().await;
        lane.cancel_timer();
        lane.delivery.suspend();
        let discarded = lane.delivery.queue().depth();
        self.metrics.forget_agent(agent_id);
        tracing::info!(agent_id = %agent_id, discarded, "Delivery lane removed");
        discarded
    }

    /// Pending events for an agent, in-flight event included.
    pub async fn queue_depth(&self, agent_id: &AgentId) -> usize {
        match self.registry.peek(agent_id) {
            Some(lane) => lane.lock().await.delivery.queue().depth(),
            None => 0,
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn pump(self: &Arc<Self>, agent_id: &AgentId, lane: &mut AgentLane) {
        let Dispatch { step, dropped } = lane.delivery.next_dispatch(self.clock.now(), &self.plans);
        if !dropped.is_empty() {
            for item in &dropped {
                self.record_drop(agent_id, item);
            }
            self.metrics
                .record_queue_depth(agent_id, lane.delivery.queue());
        }

        match step {
            DispatchStep::Send(delivery) => self.deliver(agent_id, lane, delivery).await,
            DispatchStep::Busy | DispatchStep::Suspended | DispatchStep::Drained => {}
        }
    }

    /// Write one attempt to the socket and arm its deadline.
    async fn deliver(self: &Arc<Self>, agent_id: &AgentId, lane: &mut AgentLane, delivery: Delivery) {
        let event_type = delivery.event.event_type();
        match self.transmit(agent_id, &delivery).await {
            Ok(()) => {
                let status = if delivery.attempt == 0 { "sent" } else { "retried" };
                self.metrics.record_dispatch(event_type, status);
                tracing::debug!(
                    agent_id = %agent_id,
                    event_id = %delivery.event.id(),
                    event_type = %event_type,
                    attempt = delivery.attempt,
                    "Event sent"
                );
            }
            Err(TransportError::NotConnected) => {
                lane.cancel_timer();
                lane.delivery.suspend();
                tracing::info!(agent_id = %agent_id, "No live connection, delivery suspended");
                return;
            }
            Err(e) => {
                self.metrics.record_dispatch(event_type, "send_failed");
                tracing::warn!(
                    agent_id = %agent_id,
                    event_id = %delivery.event.id(),
                    error = %e,
                    "Event send failed, awaiting retry"
                );
            }
        }
        self.arm(agent_id, lane, &delivery);
    }

    async fn transmit(&self, agent_id: &AgentId, delivery: &Delivery) -> Result<(), TransportError> {
        let conn = self
            .connections
            .get_by_agent_id(agent_id)
            .await
            .ok_or(TransportError::NotConnected)?;
        let frame = WorldEventMessage::from_event(&delivery.event, conn.session.negotiated_version);
        conn.send(frame.into())
    }

    fn arm(self: &Arc<Self>, agent_id: &AgentId, lane: &mut AgentLane, delivery: &Delivery) {
        let dispatcher = Arc::clone(self);
        let agent_id = agent_id.clone();
        let timer = AckTimer::spawn(
            delivery.event.id().clone(),
            delivery.attempt,
            delivery.deadline,
            move |event_id, attempt| async move {
                dispatcher.on_deadline(&agent_id, &event_id, attempt).await;
            },
        );
        lane.arm(timer);
    }

    fn record_drop(&self, agent_id: &AgentId, dropped: &DroppedEvent) {
        let event = &dropped.item.event;
        match dropped.reason {
            DropReason::OverflowOldest => tracing::warn!(
                agent_id = %agent_id,
                event_id = %event.id(),
                event_type = %event.event_type(),
                priority = dropped.item.priority.label(),
                "Queue full, evicted oldest event"
            ),
            DropReason::RetryExhausted => tracing::error!(
                agent_id = %agent_id,
                event_id = %event.id(),
                event_type = %event.event_type(),
                "Event dropped after exhausting ack retries"
            ),
            DropReason::Expired => tracing::warn!(
                agent_id = %agent_id,
                event_id = %event.id(),
                event_type = %event.event_type(),
                "Event expired before delivery"
            ),
            reason => tracing::debug!(
                agent_id = %agent_id,
                event_id = %event.id(),
                event_type = %event.event_type(),
                reason = reason.as_str(),
                "Event dropped"
            ),
        }
        self.metrics.record_dropped(dropped);
    }
}
