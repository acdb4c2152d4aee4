//! Per-agent, priority-stratified bounded event buffer.
//!
//! Each [`PriorityLevel`] owns a FIFO with its own capacity. Overflow evicts
//! the oldest event of the *same* level, so a burst of background events can
//! never take queue space from conversation traffic.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};

use crate::ids::EventId;
use crate::priority::PriorityLevel;
use crate::world_event::WorldEvent;

pub const DEFAULT_PER_PRIORITY_LIMIT: usize = 100;

/// Why an event left a queue without being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Evicted to make room for a newer event of the same level
    OverflowOldest,
    /// Collapsed by a newer event of the same control type
    Deduplicated,
    /// Passed its `expires_at` before it could be sent
    Expired,
    /// Never acknowledged after every retry of its ack plan
    RetryExhausted,
    /// The agent's subscription no longer covers the type
    Unsubscribed,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OverflowOldest => "overflow_oldest",
            Self::Deduplicated => "deduplicated",
            Self::Expired => "expired",
            Self::RetryExhausted => "ack_retry_exhausted",
            Self::Unsubscribed => "unsubscribed",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    pub event: WorldEvent,
    pub priority: PriorityLevel,
    pub enqueued_at: DateTime<Utc>,
}

/// An event removed without delivery, with the reason it was removed.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedEvent {
    pub item: QueuedEvent,
    pub reason: DropReason,
}

impl DroppedEvent {
    pub fn new(item: QueuedEvent, reason: DropReason) -> Self {
        Self { item, reason }
    }
}

#[derive(Debug, Clone)]
pub struct EventQueue {
    levels: [VecDeque<QueuedEvent>; 4],
    per_priority_limit: usize,
}

impl EventQueue {
    /// Create an empty queue. A limit of zero is raised to one so the newest
    /// event can always be accepted.
    pub fn new(per_priority_limit: usize) -> Self {
        Self {
            levels: Default::default(),
            per_priority_limit: per_priority_limit.max(1),
        }
    }

    pub fn per_priority_limit(&self) -> usize {
        self.per_priority_limit
    }

    /// Append to the tail of `priority`, evicting that level's oldest event
    /// first if the level is full. Never rejects the new event.
    pub fn enqueue(
        &mut self,
        event: WorldEvent,
        priority: PriorityLevel,
        now: DateTime<Utc>,
    ) -> Option<DroppedEvent> {
        let level = &mut self.levels[priority.index()];
        let evicted = if level.len() >= self.per_priority_limit {
            level
                .pop_front()
                .map(|item| DroppedEvent::new(item, DropReason::OverflowOldest))
        } else {
            None
        };
        level.push_back(QueuedEvent {
            event,
            priority,
            enqueued_at: now,
        });
        evicted
    }

    /// Remove every event of `event_type` across all levels, returning how many
    /// were removed.
    pub fn remove_by_type(&mut self, event_type: &str) -> usize {
        self.take_by_type(event_type).len()
    }

    /// Like [`remove_by_type`](Self::remove_by_type) but hands back the removed
    /// events, in priority-then-FIFO order.
    pub fn take_by_type(&mut self, event_type: &str) -> Vec<QueuedEvent> {
        self.take_where(|item| item.event.event_type() == event_type)
    }

    /// Remove every event matching `predicate`, preserving order of the rest.
    pub fn take_where<F>(&mut self, mut predicate: F) -> Vec<QueuedEvent>
    where
        F: FnMut(&QueuedEvent) -> bool,
    {
        let mut removed = Vec::new();
        for level in &mut self.levels {
            let mut kept = VecDeque::with_capacity(level.len());
            for item in level.drain(..) {
                if predicate(&item) {
                    removed.push(item);
                } else {
                    kept.push_back(item);
                }
            }
            *level = kept;
        }
        removed
    }

    pub fn remove_by_id(&mut self, id: &EventId) -> Option<QueuedEvent> {
        for level in &mut self.levels {
            if let Some(pos) = level.iter().position(|item| item.event.id() == id) {
                return level.remove(pos);
            }
        }
        None
    }

    pub fn contains(&self, id: &EventId) -> bool {
        self.iter().any(|item| item.event.id() == id)
    }

    /// Head of the highest-priority non-empty level (strict priority scan).
    pub fn peek_next(&self) -> Option<&QueuedEvent> {
        self.levels.iter().find_map(|level| level.front())
    }

    /// Pop heads matching `reject`, scanning levels in priority order and
    /// stopping at the first head that does not match. Events behind that
    /// head are left alone.
    pub fn pop_heads_while<F>(&mut self, mut reject: F) -> Vec<QueuedEvent>
    where
        F: FnMut(&QueuedEvent) -> bool,
    {
        let mut popped = Vec::new();
        for level in &mut self.levels {
            while let Some(head) = level.front() {
                if !reject(head) {
                    return popped;
                }
                if let Some(item) = level.pop_front() {
                    popped.push(item);
                }
            }
        }
        popped
    }

    /// Total number of queued events.
    pub fn depth(&self) -> usize {
        self.levels.iter().map(VecDeque::len).sum()
    }

    pub fn depth_at(&self, priority: PriorityLevel) -> usize {
        self.levels[priority.index()].len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(VecDeque::is_empty)
    }

    /// Iterate in delivery order: level 0 first, FIFO within a level.
    pub fn iter(&self) -> impl Iterator<Item = &QueuedEvent> {
        self.levels.iter().flat_map(|level| level.iter())
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(DEFAULT_PER_PRIORITY_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world_event::WorldEventPayload;
    use serde_json::json;

    fn event(id: &str, event_type: &str) -> WorldEvent {
        WorldEvent::new(
            EventId::new(id),
            WorldEventPayload::parse(event_type, json!({})).unwrap(),
            Utc::now(),
        )
    }

    fn ids(queue: &EventQueue) -> Vec<String> {
        queue.iter().map(|q| q.event.id().to_string()).collect()
    }

    #[test]
    fn overflow_evicts_oldest_of_same_level_only() {
        let now = Utc::now();
        let mut queue = EventQueue::new(2);
        assert!(queue.enqueue(event("bg", "x.y"), PriorityLevel::Background, now).is_none());
        assert!(queue.enqueue(event("a", "x.y"), PriorityLevel::Normal, now).is_none());
        assert!(queue.enqueue(event("b", "x.y"), PriorityLevel::Normal, now).is_none());

        let dropped = queue
            .enqueue(event("c", "x.y"), PriorityLevel::Normal, now)
            .expect("level 2 was full");
        assert_eq!(dropped.item.event.id().as_str(), "a");
        assert_eq!(dropped.reason, DropReason::OverflowOldest);

        assert_eq!(queue.depth_at(PriorityLevel::Normal), 2);
        assert_eq!(queue.depth_at(PriorityLevel::Background), 1);
        assert_eq!(ids(&queue), ["b", "c", "bg"]);
    }

    #[test]
    fn no_level_ever_exceeds_its_capacity() {
        let now = Utc::now();
        let mut queue = EventQueue::new(3);
        for i in 0..50 {
            let level = PriorityLevel::ALL[i % 4];
            queue.enqueue(event(&format!("e{i}"), "x.y"), level, now);
            for level in PriorityLevel::ALL {
                assert!(queue.depth_at(level) <= 3);
            }
        }
    }

    #[test]
    fn remove_by_type_counts_matches_across_levels() {
        let now = Utc::now();
        let mut queue = EventQueue::new(2);
        queue.enqueue(event("r1", "agent.queue_refill_requested"), PriorityLevel::Background, now);
        queue.enqueue(event("r2", "agent.queue_refill_requested"), PriorityLevel::Background, now);
        queue.enqueue(event("keep", "action.finished"), PriorityLevel::Normal, now);
        queue.enqueue(event("r3", "agent.queue_refill_requested"), PriorityLevel::High, now);

        assert_eq!(queue.remove_by_type("agent.queue_refill_requested"), 3);
        assert_eq!(ids(&queue), ["keep"]);

        // the level that was full accepts again without eviction
        assert!(queue
            .enqueue(event("r4", "agent.queue_refill_requested"), PriorityLevel::Background, now)
            .is_none());
    }

    #[test]
    fn strict_priority_scan_order() {
        let now = Utc::now();
        let mut queue = EventQueue::new(10);
        queue.enqueue(event("D", "x.y"), PriorityLevel::Background, now);
        queue.enqueue(event("B", "x.y"), PriorityLevel::Normal, now);
        queue.enqueue(event("C", "x.y"), PriorityLevel::Normal, now);
        queue.enqueue(event("A", "x.y"), PriorityLevel::Realtime, now);

        let mut order = Vec::new();
        while let Some(head) = queue.peek_next() {
            let id = head.event.id().clone();
            queue.remove_by_id(&id);
            order.push(id.into_inner());
        }
        assert_eq!(order, ["A", "B", "C", "D"]);
    }

    #[test]
    fn pop_heads_stops_at_first_kept_head() {
        let now = Utc::now();
        let mut queue = EventQueue::new(10);
        queue.enqueue(event("x1", "drop.me"), PriorityLevel::Realtime, now);
        queue.enqueue(event("k1", "keep.me"), PriorityLevel::High, now);
        queue.enqueue(event("x2", "drop.me"), PriorityLevel::Normal, now);

        let popped = queue.pop_heads_while(|q| q.event.event_type() == "drop.me");
        assert_eq!(popped.len(), 1);
        assert_eq!(ids(&queue), ["k1", "x2"]);
    }

    #[test]
    fn zero_limit_still_accepts_newest() {
        let now = Utc::now();
        let mut queue = EventQueue::new(0);
        queue.enqueue(event("a", "x.y"), PriorityLevel::High, now);
        let dropped = queue.enqueue(event("b", "x.y"), PriorityLevel::High, now);
        assert_eq!(dropped.map(|d| d.item.event.id().to_string()), Some("a".to_string()));
        assert_eq!(ids(&queue), ["b"]);
    }
}
