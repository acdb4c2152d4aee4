//! Protocol-level errors.

use botgate_domain::DomainError;

/// A frame or request body that cannot be turned into a protocol value.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("missing {0}")]
    MissingField(&'static str),

    #[error("invalid {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },

    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("unsupported eventType: \"{event_type}\". Supported: {supported}")]
    UnsupportedEventType {
        event_type: String,
        supported: String,
    },

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ProtocolError {
    pub fn invalid_field(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            message: message.into(),
        }
    }
}
