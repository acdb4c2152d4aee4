use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifiers handed to us by the simulation server. They are opaque strings,
/// not UUIDs, so they only get the newtype treatment.
macro_rules! define_key {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

/// Identifiers minted by the gateway itself.
macro_rules! define_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

// Identity triple of an authenticated bot
define_key!(BotToken);
define_key!(AgentId);
define_key!(PlayerId);
define_key!(WorldId);

// Event and command correlation
define_key!(EventId);
define_key!(CommandId);

// One per accepted socket
define_id!(ConnectionId);

impl EventId {
    /// Mint a fresh, globally unique event id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl BotToken {
    /// Token with everything but the edges hidden, for logs.
    pub fn masked(&self) -> String {
        let token = self.as_str();
        let chars: Vec<char> = token.chars().collect();
        if chars.is_empty() {
            return String::new();
        }
        let keep = if chars.len() <= 12 { 2 } else { 4 };
        if chars.len() <= keep * 2 {
            return "***".to_string();
        }
        let head: String = chars[..keep].iter().collect();
        let tail: String = chars[chars.len() - keep..].iter().collect();
        format!("{head}***{tail}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_serialize_as_plain_strings() {
        let agent = AgentId::new("agent-7");
        assert_eq!(serde_json::to_string(&agent).unwrap(), "\"agent-7\"");
        let back: AgentId = serde_json::from_str("\"agent-7\"").unwrap();
        assert_eq!(back, agent);
    }

    #[test]
    fn generated_event_ids_are_unique() {
        assert_ne!(EventId::generate(), EventId::generate());
    }

    #[test]
    fn masked_token_hides_the_middle() {
        assert_eq!(BotToken::new("abcdefghijklmnop").masked(), "abcd***mnop");
        assert_eq!(BotToken::new("short-token").masked(), "sh***en");
        assert_eq!(BotToken::new("abc").masked(), "***");
        assert_eq!(BotToken::new("").masked(), "");
    }
}
