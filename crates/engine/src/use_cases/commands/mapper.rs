//! Bot command vocabulary and its translation into simulation commands.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use botgate_domain::AgentId;

use crate::infrastructure::ports::SimulationCommand;

/// Command types a bot may send, without the `command.` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommandType {
    MoveTo,
    Say,
    SetActivity,
    AcceptInvite,
    Invite,
    StartConversation,
    LeaveConversation,
    ContinueDoing,
    DoSomething,
}

impl BotCommandType {
    pub const ALL: [BotCommandType; 9] = [
        Self::MoveTo,
        Self::Say,
        Self::SetActivity,
        Self::AcceptInvite,
        Self::Invite,
        Self::StartConversation,
        Self::LeaveConversation,
        Self::ContinueDoing,
        Self::DoSomething,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == raw)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MoveTo => "move_to",
            Self::Say => "say",
            Self::SetActivity => "set_activity",
            Self::AcceptInvite => "accept_invite",
            Self::Invite => "invite",
            Self::StartConversation => "start_conversation",
            Self::LeaveConversation => "leave_conversation",
            Self::ContinueDoing => "continue_doing",
            Self::DoSomething => "do_something",
        }
    }
}

/// Stateless translator from bot payloads to simulation arguments.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandMapper;

impl CommandMapper {
    pub fn new() -> Self {
        Self
    }

    /// `None` when the command type is not one the simulation understands.
    pub fn map(
        &self,
        agent_id: &AgentId,
        command_type: &str,
        payload: &Value,
        now: DateTime<Utc>,
    ) -> Option<SimulationCommand> {
        let kind = BotCommandType::parse(command_type)?;
        let field = |key: &str| payload.get(key).filter(|v| !v.is_null()).cloned();

        let (target_type, args) = match kind {
            BotCommandType::MoveTo => (kind, args([("targetPlayerId", field("targetPlayerId"))])),
            BotCommandType::Say => (
                kind,
                args([
                    ("conversationId", field("conversationId")),
                    ("text", field("text")),
                    ("leaveAfter", Some(Value::Bool(truthy(payload.get("leaveAfter"))))),
                ]),
            ),
            BotCommandType::SetActivity => {
                let duration_ms = payload.get("duration").and_then(as_millis).unwrap_or(0);
                let until = now.timestamp_millis().saturating_add(duration_ms);
                let activity = args([
                    ("description", field("description")),
                    ("emoji", field("emoji")),
                    ("until", Some(json!(until))),
                ]);
                (BotCommandType::ContinueDoing, json!({ "activity": activity }))
            }
            BotCommandType::AcceptInvite | BotCommandType::LeaveConversation => {
                (kind, args([("conversationId", field("conversationId"))]))
            }
            BotCommandType::Invite => (
                BotCommandType::StartConversation,
                args([("invitee", field("targetPlayerId"))]),
            ),
            BotCommandType::StartConversation => (
                kind,
                args([("invitee", field("targetPlayerId").or_else(|| field("invitee")))]),
            ),
            BotCommandType::ContinueDoing => (kind, args([("activity", field("activity"))])),
            BotCommandType::DoSomething => (
                kind,
                args([("actionType", field("actionType")), ("args", field("args"))]),
            ),
        };

        Some(SimulationCommand {
            agent_id: agent_id.clone(),
            command_type: target_type.as_str().to_string(),
            args,
        })
    }
}

/// Object of the present fields only.
fn args<const N: usize>(fields: [(&str, Option<Value>); N]) -> Value {
    let map: Map<String, Value> = fields
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key.to_string(), v)))
        .collect();
    Value::Object(map)
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

fn as_millis(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
