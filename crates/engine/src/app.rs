//! Application state and composition.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::api::connections::ConnectionManager;
use crate::infrastructure::config::GatewayConfig;
use crate::infrastructure::metrics::GatewayMetrics;
use crate::infrastructure::ports::{ClockPort, SimulationPort};
use crate::use_cases::commands::{CommandQueue, CommandRouter};
use crate::use_cases::delivery::{BotQueueRegistry, EventDispatcher};
use crate::use_cases::intake::EventIntake;

/// Main application state.
///
/// Passed to HTTP/WebSocket handlers via Axum state.
pub struct App {
    pub config: GatewayConfig,
    pub connections: Arc<ConnectionManager>,
    pub simulation: Arc<dyn SimulationPort>,
    pub metrics: Arc<GatewayMetrics>,
    pub clock: Arc<dyn ClockPort>,
    pub use_cases: UseCases,
    started_at: Instant,
}

/// Container for all use cases.
pub struct UseCases {
    pub dispatcher: Arc<EventDispatcher>,
    pub commands: Arc<CommandQueue>,
    pub router: CommandRouter,
    pub intake: EventIntake,
}

impl App {
    pub fn new(
        config: GatewayConfig,
        simulation: Arc<dyn SimulationPort>,
        clock: Arc<dyn ClockPort>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        let connections = Arc::new(ConnectionManager::new());
        let registry = Arc::new(BotQueueRegistry::new(config.queue_max_size_per_level));

        let dispatcher = Arc::new(EventDispatcher::new(
            registry,
            connections.clone(),
            metrics.clone(),
            clock.clone(),
            config.delivery.clone(),
        ));
        let commands = Arc::new(CommandQueue::new(config.command_timeout));
        let router = CommandRouter::new(
            simulation.clone(),
            commands.clone(),
            metrics.clone(),
            clock.clone(),
            config.idempotency_capacity,
        );
        let intake = EventIntake::new(
            dispatcher.clone(),
            commands.clone(),
            metrics.clone(),
            clock.clone(),
            config.idempotency_capacity,
        );

        Self {
            config,
            connections,
            simulation,
            metrics,
            clock,
            use_cases: UseCases {
                dispatcher,
                commands,
                router,
                intake,
            },
            started_at: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
