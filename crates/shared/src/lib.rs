//! Botgate Protocol - wire types for bots and the simulation
//!
//! This crate contains everything that crosses the gateway's edges:
//! - WebSocket frames exchanged with bot agents (ClientMessage, ServerMessage)
//! - The connection handshake (auth error codes, version negotiation)
//! - The simulation → gateway event intake body
//!
//! # Design Principles
//!
//! 1. **No runtime** - pure data types, parsing and serialization
//! 2. **Domain vocabulary** - ids and events come from `botgate-domain`

pub mod error;
pub mod handshake;
pub mod intake;
pub mod messages;

pub use error::ProtocolError;
pub use handshake::{
    negotiate_version, parse_subscribe_list, parse_version_range, AuthErrorCode, Negotiated,
    VersionMismatch, VersionRange, SUPPORTED_PROTOCOL_VERSIONS,
};
pub use intake::{idempotency_key, EventReceipt, IncomingWorldEvent, SUPPORTED_EVENT_TYPES};
pub use messages::{
    AckSemantics, ClientMessage, CommandAckPayload, CommandMessage, CommandStatus,
    ConnectedPayload, OutboundMessage, ServerMessage, WorldEventMessage, COMMAND_PREFIX,
    PROTOCOL_VERSION,
};
