//! Gateway configuration loaded from environment variables.
//!
//! Every knob has a default. A value that is present but unusable is a
//! [`ConfigError`] and the gateway refuses to start.

use std::net::SocketAddr;
use std::time::Duration;

use botgate_domain::{AckPlan, DeliveryPlans, DEFAULT_PER_PRIORITY_LIMIT};
use botgate_shared::SUPPORTED_PROTOCOL_VERSIONS;

pub const DEFAULT_SIMULATION_URL: &str = "http://localhost:3210";
pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_ACK_MAX_RETRIES: u32 = 3;
pub const DEFAULT_ACK_BACKOFF_MS: &[u64] = &[5_000, 10_000, 20_000];
pub const DEFAULT_REFILL_MAX_RETRIES: u32 = 1;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_IDEMPOTENCY_CAPACITY: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be a non-negative integer, got {value:?}")]
    InvalidNumber { key: &'static str, value: String },
    #[error("{key} must be greater than zero")]
    MustBePositive { key: &'static str },
    #[error("ACK_BACKOFF_MS contains no usable delays: {0:?}")]
    EmptyBackoff(String),
    #[error("invalid listen address {0}")]
    InvalidAddress(String),
}

/// Runtime configuration, immutable after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub simulation_url: String,
    pub host: String,
    pub port: u16,
    /// Shared secret for the simulation-facing endpoints. `None` locks them.
    pub gateway_secret: Option<String>,
    pub server_version: String,
    pub supported_protocol_versions: Vec<u32>,
    pub delivery: DeliveryPlans,
    pub queue_max_size_per_level: usize,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub command_timeout: Duration,
    pub idempotency_capacity: usize,
}

impl GatewayConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let ack_timeout_ms = positive(&get, "ACK_TIMEOUT", DEFAULT_ACK_TIMEOUT_MS)?;
        let ack_max_retries = number(&get, "ACK_MAX_RETRIES", DEFAULT_ACK_MAX_RETRIES)?;
        let backoff = match get("ACK_BACKOFF_MS") {
            Some(raw) => parse_backoff(&raw)?,
            None => DEFAULT_ACK_BACKOFF_MS.to_vec(),
        };
        let refill_timeout_ms = positive(&get, "QUEUE_REFILL_ACK_TIMEOUT_MS", ack_timeout_ms.saturating_mul(2))?;
        let refill_max_retries = number(&get, "QUEUE_REFILL_MAX_RETRIES", DEFAULT_REFILL_MAX_RETRIES)?;

        let standard = AckPlan {
            timeout: Duration::from_millis(ack_timeout_ms),
            max_retries: ack_max_retries,
            backoff: backoff.into_iter().map(Duration::from_millis).collect(),
        };

        Ok(Self {
            simulation_url: get("SIMULATION_URL").unwrap_or_else(|| DEFAULT_SIMULATION_URL.into()),
            host: get("SERVER_HOST").unwrap_or_else(|| DEFAULT_HOST.into()),
            port: positive(&get, "PORT", DEFAULT_PORT)?,
            gateway_secret: get("GATEWAY_SECRET"),
            server_version: get("GATEWAY_VERSION")
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").into()),
            supported_protocol_versions: SUPPORTED_PROTOCOL_VERSIONS.to_vec(),
            delivery: DeliveryPlans::new(
                standard,
                Duration::from_millis(refill_timeout_ms),
                refill_max_retries,
            ),
            queue_max_size_per_level: positive(
                &get,
                "QUEUE_MAX_SIZE_PER_LEVEL",
                DEFAULT_PER_PRIORITY_LIMIT,
            )?,
            heartbeat_interval: Duration::from_millis(positive(
                &get,
                "WS_HEARTBEAT_INTERVAL",
                DEFAULT_HEARTBEAT_INTERVAL_MS,
            )?),
            heartbeat_timeout: Duration::from_millis(positive(
                &get,
                "WS_HEARTBEAT_TIMEOUT",
                DEFAULT_HEARTBEAT_TIMEOUT_MS,
            )?),
            command_timeout: Duration::from_millis(positive(
                &get,
                "COMMAND_TIMEOUT_MS",
                DEFAULT_COMMAND_TIMEOUT_MS,
            )?),
            idempotency_capacity: positive(&get, "IDEMPOTENCY_CAPACITY", DEFAULT_IDEMPOTENCY_CAPACITY)?,
        })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse().map_err(|_| ConfigError::InvalidAddress(addr))
    }
}

fn number<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { key, value: raw }),
        None => Ok(default),
    }
}

fn positive<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default,
    G: Fn(&str) -> Option<String>,
{
    let value = number(get, key, default)?;
    if value == T::default() {
        return Err(ConfigError::MustBePositive { key });
    }
    Ok(value)
}

/// Comma-separated millisecond delays. Entries that are not non-negative
/// integers are skipped; nothing usable is an error.
fn parse_backoff(raw: &str) -> Result<Vec<u64>, ConfigError> {
    let delays: Vec<u64> = raw
        .split(',')
        .filter_map(|part| part.trim().parse::<u64>().ok())
        .collect();
    if delays.is_empty() {
        return Err(ConfigError::EmptyBackoff(raw.to_string()));
    }
    Ok(delays)
}
