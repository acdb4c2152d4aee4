//! WebSocket frames exchanged between the gateway and bot agents.
//!
//! Every frame is a JSON object with a `type` discriminator, an `id`, a
//! millisecond `timestamp` and a `payload`.
//!
//! ## Versioning Policy
//!
//! - New outbound message types can be added (bots ignore unknown types)
//! - Inbound types the gateway does not know are rejected, not guessed at
//! - World events are relayed with their simulation type string unchanged

use botgate_domain::{CommandId, EventId, WorldEvent};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ProtocolError;
use crate::handshake::AuthErrorCode;

/// Current wire protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Type prefix shared by every bot command.
pub const COMMAND_PREFIX: &str = "command.";

const EVENT_ACK: &str = "event.ack";
const PONG: &str = "pong";
const COMMAND_BATCH: &str = "command.batch";

fn message_id() -> String {
    Uuid::new_v4().to_string()
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// =============================================================================
// Client Messages (Bot → Gateway)
// =============================================================================

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    payload: Value,
}

/// One command as sent by a bot, with the `command.` prefix stripped.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandMessage {
    pub id: CommandId,
    pub command_type: String,
    pub payload: Value,
}

impl CommandMessage {
    fn from_frame(message_type: &str, id: Option<String>, payload: Value) -> Result<Self, ProtocolError> {
        let command_type = message_type
            .strip_prefix(COMMAND_PREFIX)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ProtocolError::UnknownMessageType(message_type.to_string()))?;
        let id = id
            .filter(|id| !id.is_empty())
            .ok_or(ProtocolError::MissingField("id"))?;
        Ok(Self {
            id: CommandId::new(id),
            command_type: command_type.to_string(),
            payload,
        })
    }
}

/// Messages from a bot to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// The bot received a world event.
    EventAck { event_id: EventId },
    /// Heartbeat reply.
    Pong { id: Option<String> },
    Command(CommandMessage),
    /// Several commands in one frame, handled as if sent one by one.
    CommandBatch { id: Option<String>, commands: Vec<CommandMessage> },
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let frame: RawFrame = serde_json::from_str(text)?;

        match frame.message_type.as_str() {
            PONG => Ok(Self::Pong { id: frame.id }),
            EVENT_ACK => {
                let event_id = frame
                    .payload
                    .get("eventId")
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                    .ok_or(ProtocolError::MissingField("payload.eventId"))?;
                Ok(Self::EventAck {
                    event_id: EventId::new(event_id),
                })
            }
            COMMAND_BATCH => {
                let items = frame
                    .payload
                    .get("commands")
                    .and_then(Value::as_array)
                    .ok_or(ProtocolError::MissingField("payload.commands"))?;
                let commands = items
                    .iter()
                    .map(|item| {
                        let item: RawFrame = serde_json::from_value(item.clone())?;
                        CommandMessage::from_frame(&item.message_type, item.id, item.payload)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::CommandBatch {
                    id: frame.id,
                    commands,
                })
            }
            t if t.starts_with(COMMAND_PREFIX) => Ok(Self::Command(CommandMessage::from_frame(
                t, frame.id, frame.payload,
            )?)),
            other => Err(ProtocolError::UnknownMessageType(other.to_string())),
        }
    }

    /// Commands carried by this frame, in order.
    pub fn into_commands(self) -> Vec<CommandMessage> {
        match self {
            Self::Command(command) => vec![command],
            Self::CommandBatch { commands, .. } => commands,
            _ => Vec::new(),
        }
    }
}

// =============================================================================
// Server Messages (Gateway → Bot)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    pub agent_id: String,
    pub player_id: String,
    pub player_name: String,
    pub world_id: String,
    pub server_version: String,
    pub negotiated_version: u32,
    pub supported_versions: Vec<u32>,
    pub subscribed_events: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthErrorPayload {
    pub code: AuthErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_versions: Option<Vec<u32>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Accepted,
    Rejected,
}

/// `queued`: the simulation accepted the command into its input queue. It
/// says nothing about the command having been carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AckSemantics {
    Queued,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAckPayload {
    pub command_id: CommandId,
    pub status: CommandStatus,
    pub ack_semantics: AckSemantics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_id: Option<String>,
}

impl CommandAckPayload {
    pub fn accepted(command_id: CommandId, input_id: impl Into<String>) -> Self {
        Self {
            command_id,
            status: CommandStatus::Accepted,
            ack_semantics: AckSemantics::Queued,
            reason: None,
            input_id: Some(input_id.into()),
        }
    }

    pub fn rejected(command_id: CommandId, reason: impl Into<String>) -> Self {
        Self {
            command_id,
            status: CommandStatus::Rejected,
            ack_semantics: AckSemantics::Queued,
            reason: Some(reason.into()),
            input_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmptyPayload {}

/// Control messages from the gateway to a bot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "connected")]
    Connected {
        id: String,
        version: u32,
        timestamp: i64,
        payload: ConnectedPayload,
    },
    #[serde(rename = "auth_error")]
    AuthError {
        id: String,
        version: u32,
        timestamp: i64,
        payload: AuthErrorPayload,
    },
    #[serde(rename = "command.ack")]
    CommandAck {
        id: String,
        timestamp: i64,
        payload: CommandAckPayload,
    },
    #[serde(rename = "ping")]
    Ping {
        id: String,
        timestamp: i64,
        payload: EmptyPayload,
    },
}

impl ServerMessage {
    pub fn connected(payload: ConnectedPayload) -> Self {
        Self::Connected {
            id: message_id(),
            version: payload.negotiated_version,
            timestamp: now_millis(),
            payload,
        }
    }

    pub fn auth_error(
        version: u32,
        code: AuthErrorCode,
        message: impl Into<String>,
        supported_versions: Option<Vec<u32>>,
    ) -> Self {
        Self::AuthError {
            id: message_id(),
            version,
            timestamp: now_millis(),
            payload: AuthErrorPayload {
                code,
                message: message.into(),
                supported_versions,
            },
        }
    }

    pub fn command_ack(payload: CommandAckPayload) -> Self {
        Self::CommandAck {
            id: message_id(),
            timestamp: now_millis(),
            payload,
        }
    }

    pub fn ping() -> Self {
        Self::Ping {
            id: message_id(),
            timestamp: now_millis(),
            payload: EmptyPayload {},
        }
    }
}

/// A world event as framed for a bot. `type` is the simulation event type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldEventMessage {
    #[serde(rename = "type")]
    pub event_type: String,
    pub id: EventId,
    pub version: u32,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl WorldEventMessage {
    pub fn from_event(event: &WorldEvent, version: u32) -> Self {
        Self {
            event_type: event.event_type().to_string(),
            id: event.id().clone(),
            version,
            timestamp: event.timestamp().timestamp_millis(),
            expires_at: event.expires_at().map(|at| at.timestamp_millis()),
            payload: event.payload().to_json(),
            metadata: event.metadata().cloned(),
        }
    }
}

/// Anything written to a bot socket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    Server(ServerMessage),
    Event(WorldEventMessage),
}

impl OutboundMessage {
    pub fn to_text(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Type string as it appears on the wire, for logs and metrics.
    pub fn message_type(&self) -> &str {
        match self {
            Self::Server(ServerMessage::Connected { .. }) => "connected",
            Self::Server(ServerMessage::AuthError { .. }) => "auth_error",
            Self::Server(ServerMessage::CommandAck { .. }) => "command.ack",
            Self::Server(ServerMessage::Ping { .. }) => "ping",
            Self::Event(event) => &event.event_type,
        }
    }
}

impl From<ServerMessage> for OutboundMessage {
    fn from(value: ServerMessage) -> Self {
        Self::Server(value)
    }
}

impl From<WorldEventMessage> for OutboundMessage {
    fn from(value: WorldEventMessage) -> Self {
        Self::Event(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botgate_domain::WorldEventPayload;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn parses_event_ack() {
        let msg = ClientMessage::parse(
            r#"{"type":"event.ack","id":"m1","timestamp":1,"payload":{"eventId":"evt-1"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::EventAck {
                event_id: EventId::new("evt-1")
            }
        );
    }

    #[test]
    fn event_ack_without_event_id_is_rejected() {
        let err = ClientMessage::parse(r#"{"type":"event.ack","id":"m1","payload":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("payload.eventId")));
    }

    #[test]
    fn parses_command_and_strips_prefix() {
        let msg = ClientMessage::parse(
            r#"{"type":"command.say","id":"c1","timestamp":1,"payload":{"conversationId":"k","text":"hi"}}"#,
        )
        .unwrap();
        let ClientMessage::Command(cmd) = msg else {
            panic!("expected a command");
        };
        assert_eq!(cmd.command_type, "say");
        assert_eq!(cmd.id.as_str(), "c1");
        assert_eq!(cmd.payload["text"], "hi");
    }

    #[test]
    fn command_without_id_is_rejected() {
        let err = ClientMessage::parse(r#"{"type":"command.say","payload":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("id")));
    }

    #[test]
    fn batch_unrolls_in_order() {
        let msg = ClientMessage::parse(
            &json!({
                "type": "command.batch",
                "id": "b1",
                "timestamp": 1,
                "payload": {"commands": [
                    {"id": "c1", "type": "command.move_to", "payload": {"targetPlayerId": "p2"}},
                    {"id": "c2", "type": "command.say", "payload": {"text": "hi"}}
                ]}
            })
            .to_string(),
        )
        .unwrap();
        let types: Vec<_> = msg
            .into_commands()
            .into_iter()
            .map(|c| c.command_type)
            .collect();
        assert_eq!(types, ["move_to", "say"]);
    }

    #[test]
    fn unknown_and_malformed_frames() {
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"hello","id":"x"}"#),
            Err(ProtocolError::UnknownMessageType(t)) if t == "hello"
        ));
        assert!(matches!(
            ClientMessage::parse("not json"),
            Err(ProtocolError::InvalidJson(_))
        ));
    }

    #[test]
    fn command_ack_wire_shape() {
        let msg = ServerMessage::command_ack(CommandAckPayload::accepted(CommandId::new("c1"), "in-9"));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "command.ack");
        assert_eq!(
            value["payload"],
            json!({"commandId": "c1", "status": "accepted", "ackSemantics": "queued", "inputId": "in-9"})
        );

        let rejected = ServerMessage::command_ack(CommandAckPayload::rejected(
            CommandId::new("c2"),
            "Unknown commandType",
        ));
        let value = serde_json::to_value(&rejected).unwrap();
        assert_eq!(value["payload"]["status"], "rejected");
        assert_eq!(value["payload"]["reason"], "Unknown commandType");
        assert!(value["payload"].get("inputId").is_none());
    }

    #[test]
    fn auth_error_wire_shape() {
        let msg = ServerMessage::auth_error(1, AuthErrorCode::AlreadyConnected, "Token already connected", None);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "auth_error");
        assert_eq!(value["payload"]["code"], "ALREADY_CONNECTED");
        assert!(value["payload"].get("supportedVersions").is_none());
    }

    #[test]
    fn world_event_frame_keeps_simulation_type() {
        let ts = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let event = WorldEvent::new(
            EventId::new("e1"),
            WorldEventPayload::parse("conversation.message", json!({"conversationId": "k"})).unwrap(),
            ts,
        )
        .with_expiry(ts + chrono::Duration::seconds(60))
        .with_metadata(json!({"targetAgentId": "a1"}));

        let out = OutboundMessage::from(WorldEventMessage::from_event(&event, PROTOCOL_VERSION));
        assert_eq!(out.message_type(), "conversation.message");
        let value: Value = serde_json::from_str(&out.to_text().unwrap()).unwrap();
        assert_eq!(value["type"], "conversation.message");
        assert_eq!(value["id"], "e1");
        assert_eq!(value["timestamp"], 1_700_000_000_000_i64);
        assert_eq!(value["expiresAt"], 1_700_000_060_000_i64);
        assert_eq!(value["payload"]["conversationId"], "k");
        assert_eq!(value["metadata"]["targetAgentId"], "a1");
    }
}
