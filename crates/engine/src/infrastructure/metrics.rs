//! Prometheus metrics for the gateway.
//!
//! One [`GatewayMetrics`] is built at startup and shared by `Arc`; every
//! collector is registered on its own [`Registry`] rather than the process
//! default, so tests can build as many instances as they like.

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Opts, Registry, TextEncoder,
};

use botgate_domain::{AgentId, DroppedEvent, EventQueue, PriorityLevel};

const PREFIX: &str = "botgate";

fn name(suffix: &str) -> String {
    format!("{PREFIX}_{suffix}")
}

const LATENCY_BUCKETS_MS: &[f64] = &[
    5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0, 30_000.0,
];

pub struct GatewayMetrics {
    registry: Registry,
    pub ws_connections: IntGauge,
    pub ws_connections_created: IntCounter,
    /// `reason` label: closed, auth_failed, auth_error, send_failed,
    /// heartbeat_timeout, server_closed
    pub ws_connections_closed: IntCounterVec,
    /// `type`, `status` labels: accepted, rejected, duplicate
    pub commands: IntCounterVec,
    pub command_latency_ms: HistogramVec,
    pub events_received: IntCounterVec,
    /// `status` label: sent, retried, acked, failed, send_failed
    pub events_dispatched: IntCounterVec,
    pub events_dropped: IntCounterVec,
    pub ack_failures: IntCounterVec,
    pub queue_depth: IntGaugeVec,
    /// Enqueue to ack, per event type.
    pub dispatch_latency_ms: HistogramVec,
    pub heartbeat_latency_ms: Histogram,
}

impl GatewayMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let ws_connections = IntGauge::new(name("ws_connections"), "Live bot connections")?;
        let ws_connections_created = IntCounter::new(
            name("ws_connections_created_total"),
            "Bot connection attempts that passed the handshake pre-checks",
        )?;
        let ws_connections_closed = IntCounterVec::new(
            Opts::new(name("ws_connections_closed_total"), "Closed bot connections (label: reason)"),
            &["reason"],
        )?;
        let commands = IntCounterVec::new(
            Opts::new(name("commands_total"), "Bot commands by type and outcome"),
            &["type", "status"],
        )?;
        let command_latency_ms = HistogramVec::new(
            HistogramOpts::new(name("command_latency_ms"), "Simulation round trip per command")
                .buckets(LATENCY_BUCKETS_MS.to_vec()),
            &["type"],
        )?;
        let events_received = IntCounterVec::new(
            Opts::new(name("events_received_total"), "World events accepted from the simulation"),
            &["type", "priority"],
        )?;
        let events_dispatched = IntCounterVec::new(
            Opts::new(name("events_dispatched_total"), "World event sends and their outcome"),
            &["type", "status"],
        )?;
        let events_dropped = IntCounterVec::new(
            Opts::new(name("events_dropped_total"), "World events removed without delivery"),
            &["type", "priority", "reason"],
        )?;
        let ack_failures = IntCounterVec::new(
            Opts::new(name("ack_failures_total"), "Events abandoned after every retry"),
            &["type"],
        )?;
        let queue_depth = IntGaugeVec::new(
            Opts::new(name("queue_depth"), "Pending events per agent and priority"),
            &["agent_id", "priority"],
        )?;
        let dispatch_latency_ms = HistogramVec::new(
            HistogramOpts::new(name("dispatch_latency_ms"), "Time from enqueue to ack")
                .buckets(LATENCY_BUCKETS_MS.to_vec()),
            &["type"],
        )?;
        let heartbeat_latency_ms = Histogram::with_opts(
            HistogramOpts::new(name("heartbeat_latency_ms"), "Ping to pong round trip")
                .buckets(LATENCY_BUCKETS_MS.to_vec()),
        )?;

        registry.register(Box::new(ws_connections.clone()))?;
        registry.register(Box::new(ws_connections_created.clone()))?;
        registry.register(Box::new(ws_connections_closed.clone()))?;
        registry.register(Box::new(commands.clone()))?;
        registry.register(Box::new(command_latency_ms.clone()))?;
        registry.register(Box::new(events_received.clone()))?;
        registry.register(Box::new(events_dispatched.clone()))?;
        registry.register(Box::new(events_dropped.clone()))?;
        registry.register(Box::new(ack_failures.clone()))?;
        registry.register(Box::new(queue_depth.clone()))?;
        registry.register(Box::new(dispatch_latency_ms.clone()))?;
        registry.register(Box::new(heartbeat_latency_ms.clone()))?;

        Ok(Self {
            registry,
            ws_connections,
            ws_connections_created,
            ws_connections_closed,
            commands,
            command_latency_ms,
            events_received,
            events_dispatched,
            events_dropped,
            ack_failures,
            queue_depth,
            dispatch_latency_ms,
            heartbeat_latency_ms,
        })
    }

    pub fn record_dropped(&self, dropped: &DroppedEvent) {
        self.events_dropped
            .with_label_values(&[
                dropped.item.event.event_type(),
                dropped.item.priority.label(),
                dropped.reason.as_str(),
            ])
            .inc();
    }

    pub fn record_dispatch(&self, event_type: &str, status: &str) {
        self.events_dispatched
            .with_label_values(&[event_type, status])
            .inc();
    }

    pub fn record_command(&self, command_type: &str, status: &str) {
        self.commands.with_label_values(&[command_type, status]).inc();
    }

    /// Publish the current per-level depth of an agent's queue.
    pub fn record_queue_depth(&self, agent_id: &AgentId, queue: &EventQueue) {
        for level in PriorityLevel::ALL {
            self.queue_depth
                .with_label_values(&[agent_id.as_str(), level.label()])
                .set(queue.depth_at(level) as i64);
        }
    }

    /// Forget an agent's depth series after explicit teardown.
    pub fn forget_agent(&self, agent_id: &AgentId) {
        for level in PriorityLevel::ALL {
            // Missing series are fine: the agent may never have queued at this level.
            let _ = self
                .queue_depth
                .remove_label_values(&[agent_id.as_str(), level.label()]);
        }
    }

    /// Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn content_type(&self) -> &'static str {
        prometheus::TEXT_FORMAT
    }
}
