//! Connection handshake: auth error codes, protocol version negotiation and
//! the `subscribe` query parameter.

use serde::Serialize;

use botgate_domain::subscription::WILDCARD;

/// Protocol versions this gateway speaks, ascending.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[u32] = &[1];

/// Structured reason a connection attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthErrorCode {
    InvalidToken,
    TokenExpired,
    NpcNotFound,
    /// The token already has a live connection.
    AlreadyConnected,
    VersionMismatch,
}

impl AuthErrorCode {
    /// Map a code reported by the simulation. Anything unrecognised is
    /// reported to the bot as an invalid token.
    pub fn from_code(code: &str) -> Self {
        match code {
            "TOKEN_EXPIRED" => Self::TokenExpired,
            "NPC_NOT_FOUND" => Self::NpcNotFound,
            "ALREADY_CONNECTED" => Self::AlreadyConnected,
            "VERSION_MISMATCH" => Self::VersionMismatch,
            _ => Self::InvalidToken,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidToken => "INVALID_TOKEN",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::NpcNotFound => "NPC_NOT_FOUND",
            Self::AlreadyConnected => "ALREADY_CONNECTED",
            Self::VersionMismatch => "VERSION_MISMATCH",
        }
    }
}

/// Inclusive range of protocol versions a client accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    pub min: u32,
    pub max: u32,
}

impl Default for VersionRange {
    fn default() -> Self {
        Self { min: 1, max: 1 }
    }
}

/// Parse `v=min-max`. Missing or malformed input falls back to `1-1`;
/// reversed bounds are swapped.
pub fn parse_version_range(raw: Option<&str>) -> VersionRange {
    let Some((min, max)) = raw.and_then(|v| v.split_once('-')) else {
        return VersionRange::default();
    };
    match (min.trim().parse::<u32>(), max.trim().parse::<u32>()) {
        (Ok(min), Ok(max)) if min > 0 && max > 0 => VersionRange {
            min: min.min(max),
            max: min.max(max),
        },
        _ => VersionRange::default(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    pub version: u32,
    pub supported: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("No compatible protocol version")]
pub struct VersionMismatch {
    pub supported: Vec<u32>,
}

/// Pick the highest supported version inside the client's range.
pub fn negotiate_version(
    range: VersionRange,
    supported: &[u32],
) -> Result<Negotiated, VersionMismatch> {
    let mut sorted = supported.to_vec();
    sorted.sort_unstable();
    match sorted
        .iter()
        .copied()
        .filter(|v| (range.min..=range.max).contains(v))
        .max()
    {
        Some(version) => Ok(Negotiated {
            version,
            supported: sorted,
        }),
        None => Err(VersionMismatch { supported: sorted }),
    }
}

/// Split a comma-separated `subscribe` list. Empty input subscribes to all.
pub fn parse_subscribe_list(raw: Option<&str>) -> Vec<String> {
    let items: Vec<String> = raw
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if items.is_empty() {
        vec![WILDCARD.to_string()]
    } else {
        items
    }
}
