//! Routes bot commands to the simulation and acknowledges the outcome.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures_util::FutureExt;

use botgate_domain::IdempotencyCache;
use botgate_shared::{CommandAckPayload, CommandMessage, ServerMessage};

use super::mapper::CommandMapper;
use super::queue::{CommandQueue, CommandResult, QueuedCommand};
use crate::api::connections::BotConnection;
use crate::infrastructure::metrics::GatewayMetrics;
use crate::infrastructure::ports::{ClockPort, CommandVerdict, SimulationPort};

const UNKNOWN_COMMAND: &str = "Unknown commandType";
const GATEWAY_ERROR: &str = "Gateway error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Handed to the agent's command queue.
    Queued,
    /// Same command id seen before for this agent; nothing sent.
    Duplicate,
    /// Rejected without contacting the simulation.
    Rejected,
}

pub struct CommandRouter {
    simulation: Arc<dyn SimulationPort>,
    mapper: CommandMapper,
    queue: Arc<CommandQueue>,
    seen: Mutex<IdempotencyCache>,
    metrics: Arc<GatewayMetrics>,
    clock: Arc<dyn ClockPort>,
}

impl CommandRouter {
    pub fn new(
        simulation: Arc<dyn SimulationPort>,
        queue: Arc<CommandQueue>,
        metrics: Arc<GatewayMetrics>,
        clock: Arc<dyn ClockPort>,
        idempotency_capacity: usize,
    ) -> Self {
        Self {
            simulation,
            mapper: CommandMapper::new(),
            queue,
            seen: Mutex::new(IdempotencyCache::new(idempotency_capacity)),
            metrics,
            clock,
        }
    }

    pub fn handle(&self, conn: &BotConnection, command: CommandMessage) -> RouteOutcome {
        let agent_id = &conn.session.agent_id;
        let key = format!("{}:{}", agent_id, command.id);

        let fresh = self
            .seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .add(key.clone());
        if !fresh {
            self.metrics.record_command(&command.command_type, "duplicate");
            tracing::debug!(
                agent_id = %agent_id,
                command_id = %command.id,
                "Duplicate command ignored"
            );
            return RouteOutcome::Duplicate;
        }

        let Some(request) =
            self.mapper
                .map(agent_id, &command.command_type, &command.payload, self.clock.now())
        else {
            self.metrics.record_command(&command.command_type, "rejected");
            tracing::warn!(
                agent_id = %agent_id,
                command_type = %command.command_type,
                "Unknown command type"
            );
            send_ack(
                conn,
                CommandAckPayload::rejected(command.id, UNKNOWN_COMMAND),
                &command.command_type,
            );
            return RouteOutcome::Rejected;
        };

        let simulation = Arc::clone(&self.simulation);
        let metrics = Arc::clone(&self.metrics);
        let conn = conn.clone();
        let command_id = command.id.clone();
        let command_type = command.command_type.clone();
        let job = async move {
            let started = Instant::now();
            let result = simulation
                .post_command(&conn.session.token, &key, &request)
                .await;
            metrics
                .command_latency_ms
                .with_label_values(&[&command_type])
                .observe(started.elapsed().as_secs_f64() * 1_000.0);

            match result {
                Ok(CommandVerdict::Accepted { input_id }) => {
                    metrics.record_command(&command_type, "accepted");
                    send_ack(
                        &conn,
                        CommandAckPayload::accepted(command_id, input_id),
                        &command_type,
                    );
                    CommandResult::Accepted
                }
                Ok(CommandVerdict::Rejected { code, message }) => {
                    metrics.record_command(&command_type, "rejected");
                    tracing::info!(
                        agent_id = %conn.session.agent_id,
                        command_id = %command_id,
                        command_type = %command_type,
                        code = %code,
                        "Command rejected by simulation"
                    );
                    send_ack(
                        &conn,
                        CommandAckPayload::rejected(command_id, message),
                        &command_type,
                    );
                    CommandResult::Rejected
                }
                Err(e) => {
                    metrics.record_command(&command_type, "rejected");
                    tracing::error!(
                        agent_id = %conn.session.agent_id,
                        command_id = %command_id,
                        command_type = %command_type,
                        error = %e,
                        "Command forwarding failed"
                    );
                    send_ack(
                        &conn,
                        CommandAckPayload::rejected(command_id, GATEWAY_ERROR),
                        &command_type,
                    );
                    CommandResult::Rejected
                }
            }
        }
        .boxed();

        self.queue.enqueue(
            agent_id,
            QueuedCommand {
                command_id: command.id,
                command_type: command.command_type,
                job,
            },
        );
        RouteOutcome::Queued
    }
}

fn send_ack(conn: &BotConnection, payload: CommandAckPayload, command_type: &str) {
    let status = payload.status;
    if let Err(e) = conn.send(ServerMessage::command_ack(payload).into()) {
        tracing::warn!(
            agent_id = %conn.session.agent_id,
            command_type = %command_type,
            ack_status = ?status,
            error = %e,
            "Failed to send command ack"
        );
    }
}
