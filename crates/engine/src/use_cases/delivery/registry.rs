//! Per-agent delivery lanes.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use botgate_domain::{AgentDelivery, AgentId, EventId};

use super::timer::AckTimer;

/// Everything the dispatcher tracks for one agent, guarded by one lock.
pub struct AgentLane {
    pub delivery: AgentDelivery,
    timer: Option<AckTimer>,
}

impl AgentLane {
    fn new(per_priority_limit: usize) -> Self {
        Self {
            delivery: AgentDelivery::new(per_priority_limit),
            timer: None,
        }
    }

    pub(crate) fn arm(&mut self, timer: AckTimer) {
        if let Some(previous) = self.timer.replace(timer) {
            previous.cancel();
        }
    }

    /// Abort the pending deadline, if any.
    pub(crate) fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }

    /// Forget the timer that just fired without aborting its task.
    pub(crate) fn release_fired(&mut self, event_id: &EventId, attempt: u32) {
        if self
            .timer
            .as_ref()
            .is_some_and(|t| t.is_for(event_id, attempt))
        {
            self.timer = None;
        }
    }

    pub fn has_timer(&self) -> bool {
        self.timer.is_some()
    }
}

pub type SharedLane = Arc<Mutex<AgentLane>>;

/// Lazily creates one lane per agent on first use.
pub struct BotQueueRegistry {
    lanes: DashMap<AgentId, SharedLane>,
    per_priority_limit: usize,
}

impl BotQueueRegistry {
    pub fn new(per_priority_limit: usize) -> Self {
        Self {
            lanes: DashMap::new(),
            per_priority_limit,
        }
    }

    /// The agent's lane, created on first access.
    pub fn get(&self, agent_id: &AgentId) -> SharedLane {
        if let Some(lane) = self.lanes.get(agent_id) {
            return Arc::clone(lane.value());
        }
        let lane = self
            .lanes
            .entry(agent_id.clone())
            .or_insert_with(|| {
                tracing::debug!(agent_id = %agent_id, "Delivery lane created");
                Arc::new(Mutex::new(AgentLane::new(self.per_priority_limit)))
            });
        Arc::clone(lane.value())
    }

    /// The agent's lane if one exists; never creates.
    pub fn peek(&self, agent_id: &AgentId) -> Option<SharedLane> {
        self.lanes.get(agent_id).map(|lane| Arc::clone(lane.value()))
    }

    pub fn delete(&self, agent_id: &AgentId) -> Option<SharedLane> {
        self.lanes.remove(agent_id).map(|(_, lane)| lane)
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    pub fn per_priority_limit(&self) -> usize {
        self.per_priority_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_creates_once_and_returns_same_lane() {
        let registry = BotQueueRegistry::new(5);
        let agent = AgentId::new("a1");

        let first = registry.get(&agent);
        let second = registry.get(&agent);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert_eq!(first.lock().await.delivery.queue().per_priority_limit(), 5);
    }

    #[test]
    fn peek_does_not_create() {
        let registry = BotQueueRegistry::new(5);
        assert!(registry.peek(&AgentId::new("ghost")).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn delete_removes_lane() {
        let registry = BotQueueRegistry::new(5);
        let agent = AgentId::new("a1");
        registry.get(&agent);

        assert!(registry.delete(&agent).is_some());
        assert!(registry.peek(&agent).is_none());
        assert!(registry.delete(&agent).is_none());
    }
}
