//! World events relayed from the simulation to bot agents.
//!
//! Events are keyed by their type string. The body is relayed to bots exactly
//! as the simulation sent it. Types the gateway knows about also get a typed
//! [`EventKind`] view, read leniently, for priority decisions; anything else
//! is [`EventKind::Other`] so new simulation event types pass through without
//! a gateway release.

use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;

use crate::error::DomainError;
use crate::ids::EventId;

pub mod event_types {
    pub const AGENT_STATE_CHANGED: &str = "agent.state_changed";
    pub const CONVERSATION_STARTED: &str = "conversation.started";
    pub const CONVERSATION_INVITED: &str = "conversation.invited";
    pub const CONVERSATION_MESSAGE: &str = "conversation.message";
    pub const CONVERSATION_ENDED: &str = "conversation.ended";
    pub const CONVERSATION_TIMEOUT: &str = "conversation.timeout";
    pub const ACTION_FINISHED: &str = "action.finished";
    pub const QUEUE_REFILL_REQUESTED: &str = "agent.queue_refill_requested";
    pub const RELATIONSHIP_PROPOSED: &str = "social.relationship_proposed";
    pub const RELATIONSHIP_RESPONDED: &str = "social.relationship_responded";

    /// Prefix shared by every conversation-class event.
    pub const CONVERSATION_PREFIX: &str = "conversation.";
}

/// Read a field leniently: a missing or mistyped value falls back to the
/// default instead of rejecting the event.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentStateChanged {
    #[serde(deserialize_with = "lenient")]
    pub state: String,
    pub position: Value,
    /// Anything but an array means nobody is nearby.
    #[serde(deserialize_with = "lenient")]
    pub nearby_players: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConversationStarted {
    #[serde(deserialize_with = "lenient")]
    pub conversation_id: String,
    #[serde(deserialize_with = "lenient")]
    pub other_participant_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConversationInvited {
    #[serde(deserialize_with = "lenient")]
    pub conversation_id: String,
    #[serde(deserialize_with = "lenient")]
    pub inviter_id: String,
    #[serde(deserialize_with = "lenient")]
    pub inviter_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChatLine {
    #[serde(deserialize_with = "lenient")]
    pub content: String,
    #[serde(deserialize_with = "lenient")]
    pub speaker_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConversationMessage {
    #[serde(deserialize_with = "lenient")]
    pub conversation_id: String,
    #[serde(deserialize_with = "lenient")]
    pub message: ChatLine,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConversationEnded {
    #[serde(deserialize_with = "lenient")]
    pub conversation_id: String,
    #[serde(deserialize_with = "lenient")]
    pub other_participant_id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub other_participant_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConversationTimeout {
    #[serde(deserialize_with = "lenient")]
    pub conversation_id: String,
    /// `invite_timeout` or `idle_timeout`
    #[serde(deserialize_with = "lenient")]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActionFinished {
    #[serde(deserialize_with = "lenient")]
    pub action_type: String,
    #[serde(deserialize_with = "lenient")]
    pub success: bool,
    pub result: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueRefillRequested {
    #[serde(deserialize_with = "lenient")]
    pub agent_id: String,
    #[serde(deserialize_with = "lenient")]
    pub player_id: String,
    #[serde(deserialize_with = "lenient")]
    pub request_id: String,
    #[serde(deserialize_with = "lenient")]
    pub remaining: u32,
    #[serde(deserialize_with = "lenient")]
    pub last_dequeued_at: Option<i64>,
    #[serde(deserialize_with = "lenient")]
    pub nearby_players: Vec<Value>,
    /// `empty` or `low_watermark`
    #[serde(deserialize_with = "lenient")]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelationshipProposed {
    #[serde(deserialize_with = "lenient")]
    pub proposer_id: String,
    #[serde(deserialize_with = "lenient")]
    pub target_player_id: String,
    #[serde(deserialize_with = "lenient")]
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelationshipResponded {
    #[serde(deserialize_with = "lenient")]
    pub proposer_id: String,
    #[serde(deserialize_with = "lenient")]
    pub responder_id: String,
    #[serde(deserialize_with = "lenient")]
    pub status: String,
    #[serde(deserialize_with = "lenient")]
    pub accept: bool,
}

/// Typed view of a world event, one variant per known event type.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    AgentStateChanged(AgentStateChanged),
    ConversationStarted(ConversationStarted),
    ConversationInvited(ConversationInvited),
    ConversationMessage(ConversationMessage),
    ConversationEnded(ConversationEnded),
    ConversationTimeout(ConversationTimeout),
    ActionFinished(ActionFinished),
    QueueRefillRequested(QueueRefillRequested),
    RelationshipProposed(RelationshipProposed),
    RelationshipResponded(RelationshipResponded),
    /// Any event type the gateway does not model explicitly.
    Other(String),
}

/// A non-object body reads as an empty one.
fn typed<T: DeserializeOwned + Default>(body: &Value) -> T {
    if body.is_object() {
        T::deserialize(body).unwrap_or_default()
    } else {
        T::default()
    }
}

impl EventKind {
    fn read(event_type: &str, body: &Value) -> Self {
        use event_types::*;

        match event_type {
            AGENT_STATE_CHANGED => Self::AgentStateChanged(typed(body)),
            CONVERSATION_STARTED => Self::ConversationStarted(typed(body)),
            CONVERSATION_INVITED => Self::ConversationInvited(typed(body)),
            CONVERSATION_MESSAGE => Self::ConversationMessage(typed(body)),
            CONVERSATION_ENDED => Self::ConversationEnded(typed(body)),
            CONVERSATION_TIMEOUT => Self::ConversationTimeout(typed(body)),
            ACTION_FINISHED => Self::ActionFinished(typed(body)),
            QUEUE_REFILL_REQUESTED => Self::QueueRefillRequested(typed(body)),
            RELATIONSHIP_PROPOSED => Self::RelationshipProposed(typed(body)),
            RELATIONSHIP_RESPONDED => Self::RelationshipResponded(typed(body)),
            other => Self::Other(other.to_string()),
        }
    }

    /// The wire type string of this kind.
    pub fn event_type(&self) -> &str {
        use event_types::*;

        match self {
            Self::AgentStateChanged(_) => AGENT_STATE_CHANGED,
            Self::ConversationStarted(_) => CONVERSATION_STARTED,
            Self::ConversationInvited(_) => CONVERSATION_INVITED,
            Self::ConversationMessage(_) => CONVERSATION_MESSAGE,
            Self::ConversationEnded(_) => CONVERSATION_ENDED,
            Self::ConversationTimeout(_) => CONVERSATION_TIMEOUT,
            Self::ActionFinished(_) => ACTION_FINISHED,
            Self::QueueRefillRequested(_) => QUEUE_REFILL_REQUESTED,
            Self::RelationshipProposed(_) => RELATIONSHIP_PROPOSED,
            Self::RelationshipResponded(_) => RELATIONSHIP_RESPONDED,
            Self::Other(event_type) => event_type,
        }
    }
}

/// Payload of a world event: the producer's body, relayed byte for byte,
/// plus a typed view used for routing decisions.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldEventPayload {
    kind: EventKind,
    body: Value,
}

impl WorldEventPayload {
    /// Build a payload from its wire type string and raw JSON body. Only
    /// the type string is validated; the body is never rejected.
    pub fn parse(event_type: &str, body: Value) -> Result<Self, DomainError> {
        if event_type.is_empty() {
            return Err(DomainError::validation("event type cannot be empty"));
        }
        Ok(Self {
            kind: EventKind::read(event_type, &body),
            body,
        })
    }

    pub fn event_type(&self) -> &str {
        self.kind.event_type()
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// The body exactly as the simulation sent it.
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// JSON body sent to bots.
    pub fn to_json(&self) -> Value {
        self.body.clone()
    }
}

/// An immutable fact emitted by the simulation for delivery to an agent.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldEvent {
    id: EventId,
    payload: WorldEventPayload,
    timestamp: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    metadata: Option<Value>,
}

impl WorldEvent {
    pub fn new(id: EventId, payload: WorldEventPayload, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            payload,
            timestamp,
            expires_at: None,
            metadata: None,
        }
    }

    /// Builder: drop the event if it has not been sent by `expires_at`.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Builder: attach routing metadata forwarded untouched to the bot.
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn id(&self) -> &EventId {
        &self.id
    }

    pub fn event_type(&self) -> &str {
        self.payload.event_type()
    }

    pub fn payload(&self) -> &WorldEventPayload {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn metadata(&self) -> Option<&Value> {
        self.metadata.as_ref()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }

    /// Background housekeeping signal with its own ack plan and collapsing rule.
    pub fn is_queue_refill(&self) -> bool {
        matches!(self.payload.kind(), EventKind::QueueRefillRequested(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn known_types_get_a_typed_view() {
        let payload = WorldEventPayload::parse(
            event_types::AGENT_STATE_CHANGED,
            json!({"state": "idle", "position": {"x": 1, "y": 2}, "nearbyPlayers": ["p1"]}),
        )
        .unwrap();

        match payload.kind() {
            EventKind::AgentStateChanged(p) => {
                assert_eq!(p.state, "idle");
                assert_eq!(p.nearby_players.len(), 1);
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(payload.event_type(), "agent.state_changed");
    }

    #[test]
    fn non_array_nearby_players_means_nobody() {
        for nearby in [json!(null), json!("p1"), json!({"id": "p1"})] {
            let payload = WorldEventPayload::parse(
                event_types::AGENT_STATE_CHANGED,
                json!({"state": "walking", "nearbyPlayers": nearby}),
            )
            .unwrap();
            let EventKind::AgentStateChanged(p) = payload.kind() else {
                panic!("expected agent.state_changed");
            };
            assert!(p.nearby_players.is_empty());
            assert_eq!(p.state, "walking");
        }
    }

    #[test]
    fn unknown_types_are_carried_verbatim() {
        let body = json!({"anything": [1, 2, 3]});
        let payload = WorldEventPayload::parse("weather.changed", body.clone()).unwrap();
        assert_eq!(payload.event_type(), "weather.changed");
        assert_eq!(payload.kind(), &EventKind::Other("weather.changed".into()));
        assert_eq!(payload.to_json(), body);
    }

    #[test]
    fn minimal_body_is_relayed_without_added_fields() {
        let body = json!({"nearbyPlayers": []});
        let payload = WorldEventPayload::parse(event_types::AGENT_STATE_CHANGED, body.clone()).unwrap();
        assert_eq!(payload.to_json(), body);
    }

    #[test]
    fn mistyped_fields_are_relayed_untouched() {
        let body = json!({"actionType": "dance", "success": "yes", "durationMs": 1200});
        let payload = WorldEventPayload::parse(event_types::ACTION_FINISHED, body.clone()).unwrap();

        let EventKind::ActionFinished(view) = payload.kind() else {
            panic!("expected action.finished");
        };
        assert_eq!(view.action_type, "dance");
        assert!(!view.success);
        assert_eq!(payload.to_json(), body);
    }

    #[test]
    fn non_object_body_is_accepted() {
        let payload = WorldEventPayload::parse(event_types::ACTION_FINISHED, json!("done")).unwrap();
        assert_eq!(payload.kind(), &EventKind::ActionFinished(ActionFinished::default()));
        assert_eq!(payload.to_json(), json!("done"));
    }

    #[test]
    fn empty_type_is_rejected() {
        assert!(WorldEventPayload::parse("", json!({})).is_err());
    }

    #[test]
    fn expiry_is_strictly_after_deadline() {
        let now = Utc::now();
        let event = WorldEvent::new(
            EventId::new("e1"),
            WorldEventPayload::parse("custom.ping", json!({})).unwrap(),
            now,
        )
        .with_expiry(now);

        assert!(!event.is_expired(now));
        assert!(event.is_expired(now + Duration::milliseconds(1)));
    }
}
