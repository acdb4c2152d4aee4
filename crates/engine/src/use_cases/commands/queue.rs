//! Per-agent command serialisation.
//!
//! Each agent has at most one command in flight. The next one starts when the
//! current job finishes, its timeout elapses, or the simulation reports
//! `action.finished` for the agent.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::time::Instant;

use botgate_domain::{AgentId, CommandId};

/// What a finished job reports back to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResult {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteReason {
    Accepted,
    Rejected,
    Timeout,
    ActionFinished,
}

impl CompleteReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
            Self::ActionFinished => "action.finished",
        }
    }
}

pub struct QueuedCommand {
    pub command_id: CommandId,
    pub command_type: String,
    pub job: BoxFuture<'static, CommandResult>,
}

struct InflightCommand {
    command_id: CommandId,
    command_type: String,
    generation: u64,
    started_at: Instant,
}

#[derive(Default)]
struct AgentCommands {
    pending: VecDeque<QueuedCommand>,
    inflight: Option<InflightCommand>,
}

pub struct CommandQueue {
    agents: Mutex<HashMap<AgentId, AgentCommands>>,
    timeout: Duration,
    next_generation: AtomicU64,
}

impl CommandQueue {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agents: Mutex::new(HashMap::new()),
            timeout,
            next_generation: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AgentId, AgentCommands>> {
        self.agents
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn enqueue(self: &Arc<Self>, agent_id: &AgentId, command: QueuedCommand) {
        let mut agents = self.lock();
        let entry = agents.entry(agent_id.clone()).or_default();
        entry.pending.push_back(command);
        tracing::debug!(
            agent_id = %agent_id,
            pending = entry.pending.len(),
            "Command queued"
        );
        self.drain(agent_id, &mut agents);
    }

    /// Release the agent's in-flight slot, whatever the job is doing.
    /// Returns false when nothing was in flight.
    pub fn complete(self: &Arc<Self>, agent_id: &AgentId, reason: CompleteReason) -> bool {
        let mut agents = self.lock();
        let Some(entry) = agents.get_mut(agent_id) else {
            return false;
        };
        let Some(inflight) = entry.inflight.take() else {
            return false;
        };
        Self::log_completion(agent_id, &inflight, reason);
        self.drain(agent_id, &mut agents);
        true
    }

    /// Forget everything queued for an agent. A running job is left to
    /// finish but its completion no longer affects the queue.
    pub fn clear_agent(&self, agent_id: &AgentId) {
        if let Some(entry) = self.lock().remove(agent_id) {
            tracing::debug!(
                agent_id = %agent_id,
                dropped = entry.pending.len(),
                had_inflight = entry.inflight.is_some(),
                "Command queue cleared"
            );
        }
    }

    pub fn inflight(&self, agent_id: &AgentId) -> Option<CommandId> {
        self.lock()
            .get(agent_id)
            .and_then(|entry| entry.inflight.as_ref().map(|c| c.command_id.clone()))
    }

    pub fn pending_len(&self, agent_id: &AgentId) -> usize {
        self.lock()
            .get(agent_id)
            .map_or(0, |entry| entry.pending.len())
    }

    fn finish(self: &Arc<Self>, agent_id: &AgentId, generation: u64, reason: CompleteReason) {
        let mut agents = self.lock();
        let Some(entry) = agents.get_mut(agent_id) else {
            return;
        };
        if entry.inflight.as_ref().map(|c| c.generation) != Some(generation) {
            return;
        }
        if let Some(inflight) = entry.inflight.take() {
            Self::log_completion(agent_id, &inflight, reason);
        }
        self.drain(agent_id, &mut agents);
    }

    fn drain(self: &Arc<Self>, agent_id: &AgentId, agents: &mut HashMap<AgentId, AgentCommands>) {
        let Some(entry) = agents.get_mut(agent_id) else {
            return;
        };
        if entry.inflight.is_some() {
            return;
        }
        let Some(command) = entry.pending.pop_front() else {
            agents.remove(agent_id);
            return;
        };

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        entry.inflight = Some(InflightCommand {
            command_id: command.command_id.clone(),
            command_type: command.command_type.clone(),
            generation,
            started_at: Instant::now(),
        });

        let queue = Arc::clone(self);
        let agent_id = agent_id.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            let mut job = tokio::spawn(command.job);
            let reason = tokio::select! {
                result = &mut job => match result {
                    Ok(CommandResult::Accepted) => CompleteReason::Accepted,
                    Ok(CommandResult::Rejected) => CompleteReason::Rejected,
                    Err(e) => {
                        tracing::error!(
                            agent_id = %agent_id,
                            command_id = %command.command_id,
                            error = %e,
                            "Command job failed"
                        );
                        CompleteReason::Rejected
                    }
                },
                _ = tokio::time::sleep(timeout) => {
                    tracing::warn!(
                        agent_id = %agent_id,
                        command_id = %command.command_id,
                        command_type = %command.command_type,
                        timeout_ms = timeout.as_millis() as u64,
                        "Command timed out"
                    );
                    CompleteReason::Timeout
                }
            };
            queue.finish(&agent_id, generation, reason);
        });
    }

    fn log_completion(agent_id: &AgentId, inflight: &InflightCommand, reason: CompleteReason) {
        tracing::info!(
            agent_id = %agent_id,
            command_id = %inflight.command_id,
            command_type = %inflight.command_type,
            reason = reason.as_str(),
            elapsed_ms = inflight.started_at.elapsed().as_millis() as u64,
            "Command completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use tokio::sync::{mpsc, oneshot};

    fn command(id: &str, job: BoxFuture<'static, CommandResult>) -> QueuedCommand {
        QueuedCommand {
            command_id: CommandId::new(id),
            command_type: "say".into(),
            job,
        }
    }

    /// A job that reports its start and waits for the test to release it.
    fn gated(
        id: &str,
        started: mpsc::UnboundedSender<String>,
    ) -> (QueuedCommand, oneshot::Sender<CommandResult>) {
        let (release, wait) = oneshot::channel();
        let name = id.to_string();
        let job = async move {
            let _ = started.send(name);
            wait.await.unwrap_or(CommandResult::Rejected)
        }
        .boxed();
        (command(id, job), release)
    }

    #[tokio::test(start_paused = true)]
    async fn runs_one_command_at_a_time_in_order() {
        let queue = Arc::new(CommandQueue::new(Duration::from_secs(30)));
        let agent = AgentId::new("a1");
        let (tx, mut started) = mpsc::unbounded_channel();

        let (c1, release1) = gated("c1", tx.clone());
        let (c2, release2) = gated("c2", tx.clone());
        queue.enqueue(&agent, c1);
        queue.enqueue(&agent, c2);

        assert_eq!(started.recv().await.unwrap(), "c1");
        assert_eq!(queue.inflight(&agent), Some(CommandId::new("c1")));
        assert_eq!(queue.pending_len(&agent), 1);

        release1.send(CommandResult::Accepted).unwrap();
        assert_eq!(started.recv().await.unwrap(), "c2");
        assert_eq!(queue.inflight(&agent), Some(CommandId::new("c2")));

        release2.send(CommandResult::Rejected).unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(queue.inflight(&agent), None);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_releases_the_slot() {
        let queue = Arc::new(CommandQueue::new(Duration::from_secs(30)));
        let agent = AgentId::new("a1");
        let (tx, mut started) = mpsc::unbounded_channel();

        let (c1, _hold1) = gated("c1", tx.clone());
        let (c2, _hold2) = gated("c2", tx.clone());
        queue.enqueue(&agent, c1);
        queue.enqueue(&agent, c2);
        assert_eq!(started.recv().await.unwrap(), "c1");

        let before = Instant::now();
        assert_eq!(started.recv().await.unwrap(), "c2");
        assert!(before.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn action_finished_releases_early_and_late_result_is_ignored() {
        let queue = Arc::new(CommandQueue::new(Duration::from_secs(30)));
        let agent = AgentId::new("a1");
        let (tx, mut started) = mpsc::unbounded_channel();

        let (c1, release1) = gated("c1", tx.clone());
        let (c2, _hold2) = gated("c2", tx.clone());
        queue.enqueue(&agent, c1);
        queue.enqueue(&agent, c2);
        assert_eq!(started.recv().await.unwrap(), "c1");

        assert!(queue.complete(&agent, CompleteReason::ActionFinished));
        assert_eq!(started.recv().await.unwrap(), "c2");

        release1.send(CommandResult::Accepted).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(queue.inflight(&agent), Some(CommandId::new("c2")));
    }

    #[tokio::test]
    async fn complete_without_inflight_is_false() {
        let queue = Arc::new(CommandQueue::new(Duration::from_secs(1)));
        assert!(!queue.complete(&AgentId::new("nobody"), CompleteReason::ActionFinished));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_agent_drops_pending_commands() {
        let queue = Arc::new(CommandQueue::new(Duration::from_secs(30)));
        let agent = AgentId::new("a1");
        let (tx, mut started) = mpsc::unbounded_channel();

        let (c1, release1) = gated("c1", tx.clone());
        let (c2, _hold2) = gated("c2", tx.clone());
        queue.enqueue(&agent, c1);
        queue.enqueue(&agent, c2);
        assert_eq!(started.recv().await.unwrap(), "c1");

        queue.clear_agent(&agent);
        assert_eq!(queue.inflight(&agent), None);
        assert_eq!(queue.pending_len(&agent), 0);

        release1.send(CommandResult::Accepted).unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(started.try_recv().is_err());
    }
}
