//! Delivery priority levels and the event classifier.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::world_event::{event_types, EventKind, WorldEvent};

/// Ordinal delivery class. Lower ordinal always preempts higher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PriorityLevel {
    /// Conversation-class events
    Realtime = 0,
    High = 1,
    Normal = 2,
    /// Default and housekeeping
    Background = 3,
}

impl PriorityLevel {
    /// All levels in scan order (highest first).
    pub const ALL: [PriorityLevel; 4] = [
        PriorityLevel::Realtime,
        PriorityLevel::High,
        PriorityLevel::Normal,
        PriorityLevel::Background,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Slot of this level in per-level arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Label used for metrics and logs (`"0"`..`"3"`).
    pub fn label(self) -> &'static str {
        match self {
            Self::Realtime => "0",
            Self::High => "1",
            Self::Normal => "2",
            Self::Background => "3",
        }
    }
}

impl TryFrom<u8> for PriorityLevel {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Realtime),
            1 => Ok(Self::High),
            2 => Ok(Self::Normal),
            3 => Ok(Self::Background),
            other => Err(DomainError::parse(format!("priority out of range: {other}"))),
        }
    }
}

impl From<PriorityLevel> for u8 {
    fn from(value: PriorityLevel) -> Self {
        value.as_u8()
    }
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Map an event (and an optional producer hint) to its delivery priority.
///
/// Rule order matters: the refill and conversation rules short-circuit before
/// any payload inspection.
pub fn classify(event: &WorldEvent, hint: Option<PriorityLevel>) -> PriorityLevel {
    let event_type = event.event_type();

    if event.is_queue_refill() {
        return PriorityLevel::Background;
    }

    let is_conversation = event_type.starts_with(event_types::CONVERSATION_PREFIX);

    if let Some(hint) = hint {
        return if is_conversation {
            PriorityLevel::Realtime
        } else {
            hint
        };
    }

    if event_type == event_types::CONVERSATION_TIMEOUT || is_conversation {
        return PriorityLevel::Realtime;
    }

    match event.payload().kind() {
        EventKind::AgentStateChanged(state) => {
            if state.nearby_players.is_empty() {
                PriorityLevel::Normal
            } else {
                PriorityLevel::High
            }
        }
        EventKind::ActionFinished(_) => PriorityLevel::Normal,
        EventKind::RelationshipProposed(_) => PriorityLevel::High,
        _ => PriorityLevel::Background,
    }
}
