//! Per-agent delivery state machine.
//!
//! [`AgentDelivery`] owns an agent's [`EventQueue`] together with its
//! acknowledgment state. Every transition is a plain method returning an
//! explicit outcome; the runtime owns the timers and the transport, and
//! feeds deadlines and acks back in.
//!
//! ```text
//!              admit / ack / deadline
//!   Suspended ──resume──> Idle ──next_dispatch──> AwaitingAck(n)
//!       ^                  ^                         │   │
//!       └──────suspend─────┼─────────────────────────┘   │ deadline, n < max
//!                          │ ack / exhausted / abandoned  └──> AwaitingAck(n+1)
//!                          └─────────────────────────────────
//! ```
//!
//! The in-flight event stays at its place in the queue until it is acked or
//! given up on, so a disconnect never loses it.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::event_queue::{DropReason, DroppedEvent, EventQueue, QueuedEvent};
use crate::ids::EventId;
use crate::priority::PriorityLevel;
use crate::subscription::SubscriptionMatcher;
use crate::world_event::WorldEvent;

/// Timeout and retry schedule for one class of events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckPlan {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: Vec<Duration>,
}

impl AckPlan {
    /// Deadline to arm after the `retry`-th resend (1-based). The last backoff
    /// value repeats once the list is exhausted.
    pub fn retry_delay(&self, retry: u32) -> Duration {
        let idx = (retry.saturating_sub(1) as usize).min(self.backoff.len().saturating_sub(1));
        self.backoff.get(idx).copied().unwrap_or(self.timeout)
    }
}

impl Default for AckPlan {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(10_000),
            max_retries: 3,
            backoff: vec![
                Duration::from_millis(5_000),
                Duration::from_millis(10_000),
                Duration::from_millis(20_000),
            ],
        }
    }
}

/// The default plan plus the refill-specific one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryPlans {
    pub standard: AckPlan,
    pub refill: AckPlan,
}

impl DeliveryPlans {
    /// Refill events keep the standard backoff schedule but get their own
    /// timeout and retry budget.
    pub fn new(standard: AckPlan, refill_timeout: Duration, refill_max_retries: u32) -> Self {
        let refill = AckPlan {
            timeout: refill_timeout,
            max_retries: refill_max_retries,
            backoff: standard.backoff.clone(),
        };
        Self { standard, refill }
    }

    pub fn for_event(&self, event: &WorldEvent) -> &AckPlan {
        if event.is_queue_refill() {
            &self.refill
        } else {
            &self.standard
        }
    }
}

impl Default for DeliveryPlans {
    fn default() -> Self {
        let standard = AckPlan::default();
        let refill_timeout = standard.timeout * 2;
        Self::new(standard, refill_timeout, 1)
    }
}

/// The event currently awaiting acknowledgment.
#[derive(Debug, Clone, PartialEq)]
pub struct InFlight {
    pub event: WorldEvent,
    pub priority: PriorityLevel,
    pub enqueued_at: DateTime<Utc>,
    /// 0 for the first send, n for the n-th resend
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryState {
    /// Nothing awaiting acknowledgment.
    Idle,
    /// One event sent, deadline running.
    AwaitingAck(InFlight),
    /// No live connection; nothing is sent until the agent reconnects.
    Suspended,
}

/// Result of offering an event to an agent.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// The agent is not subscribed to this type; the queue was not touched.
    Rejected,
    /// Queued. `dropped` lists anything removed to make room or collapsed.
    Accepted { dropped: Vec<DroppedEvent> },
}

/// One send the runtime must perform, followed by arming a deadline.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub event: WorldEvent,
    pub priority: PriorityLevel,
    pub attempt: u32,
    pub deadline: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchStep {
    /// Another event is already awaiting acknowledgment.
    Busy,
    /// The agent is disconnected.
    Suspended,
    /// Nothing left to send.
    Drained,
    Send(Delivery),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub step: DispatchStep,
    /// Heads discarded while selecting (expired or no longer subscribed).
    pub dropped: Vec<DroppedEvent>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AckOutcome {
    /// Matched the in-flight event. `removed` is false when the event had
    /// already left the queue (evicted or collapsed) while in flight.
    Acknowledged { in_flight: InFlight, removed: bool },
    /// Stale or unknown id; state unchanged.
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeadlineOutcome {
    /// Deadline for an attempt that is no longer current.
    Stale,
    /// Resend and arm the next deadline.
    Retry(Delivery),
    /// Retries used up; the event was removed from the queue.
    Exhausted(DroppedEvent),
    /// The in-flight event left the queue while waiting; nothing to resend.
    Abandoned(InFlight),
}

#[derive(Debug, Clone)]
pub struct AgentDelivery {
    queue: EventQueue,
    state: DeliveryState,
    subscription: SubscriptionMatcher,
}

impl AgentDelivery {
    /// New agents start suspended; [`resume`](Self::resume) is called once a
    /// connection is registered.
    pub fn new(per_priority_limit: usize) -> Self {
        Self {
            queue: EventQueue::new(per_priority_limit),
            state: DeliveryState::Suspended,
            subscription: SubscriptionMatcher::all(),
        }
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    pub fn state(&self) -> &DeliveryState {
        &self.state
    }

    pub fn subscription(&self) -> &SubscriptionMatcher {
        &self.subscription
    }

    pub fn in_flight(&self) -> Option<&InFlight> {
        match &self.state {
            DeliveryState::AwaitingAck(in_flight) => Some(in_flight),
            _ => None,
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self.state, DeliveryState::Suspended)
    }

    /// Subscription check, refill collapsing, then enqueue.
    pub fn admit(
        &mut self,
        event: WorldEvent,
        priority: PriorityLevel,
        now: DateTime<Utc>,
    ) -> Admission {
        if !self.subscription.matches(event.event_type()) {
            return Admission::Rejected;
        }

        let mut dropped = Vec::new();
        if event.is_queue_refill() {
            dropped.extend(
                self.queue
                    .take_by_type(event.event_type())
                    .into_iter()
                    .map(|item| DroppedEvent::new(item, DropReason::Deduplicated)),
            );
        }
        if let Some(evicted) = self.queue.enqueue(event, priority, now) {
            dropped.push(evicted);
        }
        Admission::Accepted { dropped }
    }

    /// Select the next event to send, if the agent is idle.
    pub fn next_dispatch(&mut self, now: DateTime<Utc>, plans: &DeliveryPlans) -> Dispatch {
        match self.state {
            DeliveryState::AwaitingAck(_) => {
                return Dispatch {
                    step: DispatchStep::Busy,
                    dropped: Vec::new(),
                }
            }
            DeliveryState::Suspended => {
                return Dispatch {
                    step: DispatchStep::Suspended,
                    dropped: Vec::new(),
                }
            }
            DeliveryState::Idle => {}
        }

        let subscription = &self.subscription;
        let dropped = self
            .queue
            .pop_heads_while(|item| {
                item.event.is_expired(now) || !subscription.matches(item.event.event_type())
            })
            .into_iter()
            .map(|item| {
                let reason = if item.event.is_expired(now) {
                    DropReason::Expired
                } else {
                    DropReason::Unsubscribed
                };
                DroppedEvent::new(item, reason)
            })
            .collect();

        let Some(head) = self.queue.peek_next() else {
            return Dispatch {
                step: DispatchStep::Drained,
                dropped,
            };
        };

        let in_flight = InFlight {
            event: head.event.clone(),
            priority: head.priority,
            enqueued_at: head.enqueued_at,
            attempt: 0,
        };
        let delivery = Delivery {
            event: in_flight.event.clone(),
            priority: in_flight.priority,
            attempt: 0,
            deadline: plans.for_event(&in_flight.event).timeout,
        };
        self.state = DeliveryState::AwaitingAck(in_flight);

        Dispatch {
            step: DispatchStep::Send(delivery),
            dropped,
        }
    }

    /// Handle an ack from the agent. Only the in-flight id is honoured.
    pub fn acknowledge(&mut self, event_id: &EventId) -> AckOutcome {
        let matches = self
            .in_flight()
            .is_some_and(|in_flight| in_flight.event.id() == event_id);
        if !matches {
            return AckOutcome::Ignored;
        }

        match std::mem::replace(&mut self.state, DeliveryState::Idle) {
            DeliveryState::AwaitingAck(in_flight) => {
                let removed = self.queue.remove_by_id(event_id).is_some();
                AckOutcome::Acknowledged { in_flight, removed }
            }
            other => {
                self.state = other;
                AckOutcome::Ignored
            }
        }
    }

    /// Handle the expiry of the deadline armed for `(event_id, attempt)`.
    pub fn on_deadline(
        &mut self,
        event_id: &EventId,
        attempt: u32,
        plans: &DeliveryPlans,
    ) -> DeadlineOutcome {
        let current = self
            .in_flight()
            .is_some_and(|f| f.event.id() == event_id && f.attempt == attempt);
        if !current {
            return DeadlineOutcome::Stale;
        }

        if !self.queue.contains(event_id) {
            return match std::mem::replace(&mut self.state, DeliveryState::Idle) {
                DeliveryState::AwaitingAck(in_flight) => DeadlineOutcome::Abandoned(in_flight),
                other => {
                    self.state = other;
                    DeadlineOutcome::Stale
                }
            };
        }

        let DeliveryState::AwaitingAck(in_flight) = &mut self.state else {
            return DeadlineOutcome::Stale;
        };
        let plan = plans.for_event(&in_flight.event);

        if in_flight.attempt < plan.max_retries {
            in_flight.attempt += 1;
            return DeadlineOutcome::Retry(Delivery {
                event: in_flight.event.clone(),
                priority: in_flight.priority,
                attempt: in_flight.attempt,
                deadline: plan.retry_delay(in_flight.attempt),
            });
        }

        let item = self.queue.remove_by_id(event_id);
        match std::mem::replace(&mut self.state, DeliveryState::Idle) {
            DeliveryState::AwaitingAck(in_flight) => {
                let item = item.unwrap_or(QueuedEvent {
                    event: in_flight.event,
                    priority: in_flight.priority,
                    enqueued_at: in_flight.enqueued_at,
                });
                DeadlineOutcome::Exhausted(DroppedEvent::new(item, DropReason::RetryExhausted))
            }
            other => {
                self.state = other;
                DeadlineOutcome::Stale
            }
        }
    }

    /// Connection lost. The in-flight event (if any) stays queued and is
    /// returned so the caller can cancel its deadline.
    pub fn suspend(&mut self) -> Option<InFlight> {
        match std::mem::replace(&mut self.state, DeliveryState::Suspended) {
            DeliveryState::AwaitingAck(in_flight) => Some(in_flight),
            _ => None,
        }
    }

    /// Connection (re)established with the given subscription.
    pub fn resume(&mut self, subscription: SubscriptionMatcher) {
        self.subscription = subscription;
        self.state = DeliveryState::Idle;
    }
}
