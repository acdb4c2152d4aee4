//! Simulation → gateway event intake (`POST /gateway/event`).
//!
//! The body is validated by hand rather than derived: several fields have
//! legacy aliases and fallbacks, and errors must name the offending field.

use botgate_domain::{event_types, AgentId, EventId, PriorityLevel, WorldEvent, WorldEventPayload, WorldId};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::ProtocolError;

/// Event types the simulation may push through the intake endpoint.
pub const SUPPORTED_EVENT_TYPES: &[&str] = &[
    event_types::AGENT_STATE_CHANGED,
    event_types::CONVERSATION_STARTED,
    event_types::CONVERSATION_INVITED,
    event_types::CONVERSATION_MESSAGE,
    event_types::CONVERSATION_TIMEOUT,
    event_types::ACTION_FINISHED,
    event_types::QUEUE_REFILL_REQUESTED,
];

/// Lifetime given to events that only carry the legacy `eventTs`.
pub const LEGACY_EVENT_TTL_MS: i64 = 60_000;

pub const IDEMPOTENCY_HEADER: &str = "x-idempotency-key";

/// A validated intake request.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingWorldEvent {
    pub event_type: String,
    /// The agent the event is about.
    pub event_agent_id: AgentId,
    /// The agent the event is delivered to.
    pub target_agent_id: AgentId,
    pub world_id: WorldId,
    /// Producer hint, subject to classification.
    pub priority: PriorityLevel,
    pub expires_at: DateTime<Utc>,
    pub payload: Value,
}

fn non_empty_str<'a>(body: &'a Value, key: &str) -> Option<&'a str> {
    body.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

impl IncomingWorldEvent {
    pub fn parse(body: &Value) -> Result<Self, ProtocolError> {
        if !body.is_object() {
            return Err(ProtocolError::invalid_field("body", "expected a JSON object"));
        }

        let legacy_agent = non_empty_str(body, "agentId");
        let event_agent = non_empty_str(body, "eventAgentId").or(legacy_agent);
        let target_agent = non_empty_str(body, "targetAgentId")
            .or(legacy_agent)
            .or(event_agent);

        let event_type = non_empty_str(body, "eventType").ok_or(ProtocolError::MissingField("eventType"))?;
        if !SUPPORTED_EVENT_TYPES.contains(&event_type) {
            return Err(ProtocolError::UnsupportedEventType {
                event_type: event_type.to_string(),
                supported: SUPPORTED_EVENT_TYPES.join(", "),
            });
        }
        let event_agent = event_agent.ok_or(ProtocolError::MissingField("eventAgentId"))?;
        let target_agent = target_agent.ok_or(ProtocolError::MissingField("targetAgentId"))?;
        let world_id = non_empty_str(body, "worldId").ok_or(ProtocolError::MissingField("worldId"))?;

        let priority = body
            .get("priority")
            .and_then(Value::as_u64)
            .and_then(|p| u8::try_from(p).ok())
            .and_then(|p| PriorityLevel::try_from(p).ok())
            .ok_or_else(|| ProtocolError::invalid_field("priority", "expected 0, 1, 2 or 3"))?;

        let expires_at_ms = match body.get("expiresAt") {
            Some(value) if value.is_number() => value.as_f64(),
            _ => body
                .get("eventTs")
                .and_then(Value::as_f64)
                .filter(|ts| ts.is_finite() && *ts > 0.0)
                .map(|ts| ts + LEGACY_EVENT_TTL_MS as f64),
        }
        .ok_or(ProtocolError::MissingField("expiresAt"))?;
        if !expires_at_ms.is_finite() || expires_at_ms <= 0.0 {
            return Err(ProtocolError::invalid_field("expiresAt", "must be a positive timestamp"));
        }
        let expires_at = Utc
            .timestamp_millis_opt(expires_at_ms as i64)
            .single()
            .ok_or_else(|| ProtocolError::invalid_field("expiresAt", "out of range"))?;

        let payload = match body.get("payload") {
            Some(p) if !p.is_null() => p.clone(),
            _ => body.get("eventData").cloned().unwrap_or(Value::Null),
        };

        Ok(Self {
            event_type: event_type.to_string(),
            event_agent_id: AgentId::new(event_agent),
            target_agent_id: AgentId::new(target_agent),
            world_id: WorldId::new(world_id),
            priority,
            expires_at,
            payload,
        })
    }

    /// Build the event relayed to the target agent. Routing ids travel in
    /// the metadata.
    pub fn into_world_event(self, id: EventId, now: DateTime<Utc>) -> Result<WorldEvent, ProtocolError> {
        let payload = WorldEventPayload::parse(&self.event_type, self.payload)?;
        Ok(WorldEvent::new(id, payload, now)
            .with_expiry(self.expires_at)
            .with_metadata(json!({
                "eventAgentId": self.event_agent_id,
                "targetAgentId": self.target_agent_id,
                "worldId": self.world_id,
            })))
    }
}

/// Idempotency key from the header, falling back to `idempotencyKey` in the body.
pub fn idempotency_key(header: Option<&str>, body: &Value) -> Option<String> {
    header
        .filter(|k| !k.is_empty())
        .or_else(|| non_empty_str(body, "idempotencyKey"))
        .map(str::to_string)
}

/// Response body of the intake endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventReceipt {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EventReceipt {
    pub fn accepted(event_id: EventId) -> Self {
        Self {
            received: true,
            event_id: Some(event_id),
            error: None,
        }
    }

    /// Duplicate delivery: acknowledged, nothing enqueued.
    pub fn duplicate() -> Self {
        Self {
            received: true,
            event_id: None,
            error: None,
        }
    }

    pub fn refused(error: impl Into<String>) -> Self {
        Self {
            received: false,
            event_id: None,
            error: Some(error.into()),
        }
    }

    pub fn unauthorized() -> Self {
        Self {
            received: false,
            event_id: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body() -> Value {
        json!({
            "eventType": "action.finished",
            "eventAgentId": "a1",
            "targetAgentId": "a2",
            "worldId": "w1",
            "priority": 2,
            "expiresAt": 1_700_000_060_000_i64,
            "payload": {"actionType": "wave", "success": true}
        })
    }

    #[test]
    fn parses_full_body() {
        let incoming = IncomingWorldEvent::parse(&body()).unwrap();
        assert_eq!(incoming.event_type, "action.finished");
        assert_eq!(incoming.event_agent_id.as_str(), "a1");
        assert_eq!(incoming.target_agent_id.as_str(), "a2");
        assert_eq!(incoming.priority, PriorityLevel::Normal);
        assert_eq!(incoming.expires_at.timestamp_millis(), 1_700_000_060_000);
        assert_eq!(incoming.payload["actionType"], "wave");
    }

    #[test]
    fn legacy_fields_fill_in() {
        let incoming = IncomingWorldEvent::parse(&json!({
            "eventType": "conversation.started",
            "agentId": "legacy",
            "worldId": "w1",
            "priority": 0,
            "eventTs": 1_700_000_000_000_i64,
            "eventData": {"conversationId": "c1"}
        }))
        .unwrap();
        assert_eq!(incoming.event_agent_id.as_str(), "legacy");
        assert_eq!(incoming.target_agent_id.as_str(), "legacy");
        assert_eq!(incoming.expires_at.timestamp_millis(), 1_700_000_060_000);
        assert_eq!(incoming.payload["conversationId"], "c1");
    }

    #[test]
    fn target_falls_back_to_event_agent() {
        let mut b = body();
        b.as_object_mut().unwrap().remove("targetAgentId");
        let incoming = IncomingWorldEvent::parse(&b).unwrap();
        assert_eq!(incoming.target_agent_id.as_str(), "a1");
    }

    #[test]
    fn rejects_unsupported_type() {
        let mut b = body();
        b["eventType"] = json!("weather.changed");
        assert!(matches!(
            IncomingWorldEvent::parse(&b),
            Err(ProtocolError::UnsupportedEventType { event_type, .. }) if event_type == "weather.changed"
        ));
    }

    #[test]
    fn rejects_bad_priority_and_missing_expiry() {
        let mut b = body();
        b["priority"] = json!(7);
        assert!(matches!(
            IncomingWorldEvent::parse(&b),
            Err(ProtocolError::InvalidField { field: "priority", .. })
        ));

        let mut b = body();
        b.as_object_mut().unwrap().remove("expiresAt");
        assert!(matches!(
            IncomingWorldEvent::parse(&b),
            Err(ProtocolError::MissingField("expiresAt"))
        ));

        let mut b = body();
        b["expiresAt"] = json!(-5);
        assert!(matches!(
            IncomingWorldEvent::parse(&b),
            Err(ProtocolError::InvalidField { field: "expiresAt", .. })
        ));
    }

    #[test]
    fn world_event_carries_routing_metadata() {
        let now = Utc::now();
        let event = IncomingWorldEvent::parse(&body())
            .unwrap()
            .into_world_event(EventId::new("e1"), now)
            .unwrap();
        assert_eq!(event.event_type(), "action.finished");
        assert_eq!(event.timestamp(), now);
        let metadata = event.metadata().unwrap();
        assert_eq!(metadata["eventAgentId"], "a1");
        assert_eq!(metadata["targetAgentId"], "a2");
    }

    #[test]
    fn mistyped_payload_is_accepted_and_relayed_as_sent() {
        let mut b = body();
        b["eventType"] = json!("agent.state_changed");
        b["payload"] = json!({"nearbyPlayers": "p1", "success": "yes"});

        let event = IncomingWorldEvent::parse(&b)
            .unwrap()
            .into_world_event(EventId::new("e1"), Utc::now())
            .unwrap();

        assert_eq!(
            event.payload().to_json(),
            json!({"nearbyPlayers": "p1", "success": "yes"})
        );
    }

    #[test]
    fn idempotency_key_prefers_header() {
        let b = json!({"idempotencyKey": "from-body"});
        assert_eq!(idempotency_key(Some("hdr"), &b).as_deref(), Some("hdr"));
        assert_eq!(idempotency_key(Some(""), &b).as_deref(), Some("from-body"));
        assert_eq!(idempotency_key(None, &json!({})), None);
    }

    #[test]
    fn receipts_serialize_compactly() {
        assert_eq!(
            serde_json::to_value(EventReceipt::duplicate()).unwrap(),
            json!({"received": true})
        );
        assert_eq!(
            serde_json::to_value(EventReceipt::accepted(EventId::new("e1"))).unwrap(),
            json!({"received": true, "eventId": "e1"})
        );
    }
}
