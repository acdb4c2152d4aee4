//! Connection management for bot WebSocket clients.
//!
//! Connections are indexed by token, agent id and player id. The three maps
//! live behind a single lock so a lookup never sees one index updated and
//! another not.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use botgate_domain::{AgentId, BotToken, ConnectionId, PlayerId, SubscriptionMatcher, WorldId};
use botgate_shared::OutboundMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Authenticated,
    /// Close requested; the socket task is winding down.
    Closing,
}

/// Identity of one authenticated bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotSession {
    pub token: BotToken,
    pub agent_id: AgentId,
    pub player_id: PlayerId,
    pub world_id: WorldId,
    pub player_name: String,
    pub negotiated_version: u32,
    pub subscribed_events: Vec<String>,
    pub connected_at: DateTime<Utc>,
}

/// A live bot connection.
#[derive(Debug, Clone)]
pub struct BotConnection {
    pub connection_id: ConnectionId,
    pub state: ConnectionState,
    pub session: BotSession,
    pub last_pong_at: DateTime<Utc>,
    pub subscription: SubscriptionMatcher,
    sender: mpsc::Sender<OutboundMessage>,
    close: CancellationToken,
}

impl BotConnection {
    pub fn new(
        session: BotSession,
        sender: mpsc::Sender<OutboundMessage>,
        now: DateTime<Utc>,
    ) -> Self {
        let subscription = SubscriptionMatcher::new(&session.subscribed_events);
        Self {
            connection_id: ConnectionId::new(),
            state: ConnectionState::Authenticated,
            session,
            last_pong_at: now,
            subscription,
            sender,
            close: CancellationToken::new(),
        }
    }

    /// Queue a frame on the socket's writer without waiting.
    pub fn send(&self, message: OutboundMessage) -> Result<(), TransportError> {
        self.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Full,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    /// Ask the socket task to close this connection.
    pub fn close(&self) {
        self.close.cancel();
    }

    /// Fires when [`close`](Self::close) is called on any clone.
    pub fn close_token(&self) -> CancellationToken {
        self.close.clone()
    }
}

#[derive(Default)]
struct Indices {
    by_token: HashMap<BotToken, BotConnection>,
    token_by_agent: HashMap<AgentId, BotToken>,
    token_by_player: HashMap<PlayerId, BotToken>,
}

impl Indices {
    fn remove(&mut self, token: &BotToken) -> Option<BotConnection> {
        let conn = self.by_token.remove(token)?;
        if self.token_by_agent.get(&conn.session.agent_id) == Some(token) {
            self.token_by_agent.remove(&conn.session.agent_id);
        }
        if self.token_by_player.get(&conn.session.player_id) == Some(token) {
            self.token_by_player.remove(&conn.session.player_id);
        }
        Some(conn)
    }
}

/// Manages all active bot connections.
pub struct ConnectionManager {
    inner: RwLock<Indices>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Indices::default()),
        }
    }

    pub async fn has_token(&self, token: &BotToken) -> bool {
        self.inner.read().await.by_token.contains_key(token)
    }

    /// Insert into all three indices. A token that is already registered is
    /// refused rather than replaced.
    pub async fn register(&self, conn: BotConnection) -> Result<(), ConnectionError> {
        let mut inner = self.inner.write().await;
        if inner.by_token.contains_key(&conn.session.token) {
            return Err(ConnectionError::AlreadyConnected);
        }
        let token = conn.session.token.clone();
        inner
            .token_by_agent
            .insert(conn.session.agent_id.clone(), token.clone());
        inner
            .token_by_player
            .insert(conn.session.player_id.clone(), token.clone());
        tracing::debug!(
            agent_id = %conn.session.agent_id,
            connection_id = %conn.connection_id,
            "Connection registered"
        );
        inner.by_token.insert(token, conn);
        Ok(())
    }

    /// Remove from all three indices.
    pub async fn unregister_by_token(
        &self,
        token: &BotToken,
    ) -> Result<BotConnection, ConnectionError> {
        let removed = self.inner.write().await.remove(token);
        match removed {
            Some(conn) => {
                tracing::debug!(
                    agent_id = %conn.session.agent_id,
                    connection_id = %conn.connection_id,
                    "Connection unregistered"
                );
                Ok(conn)
            }
            None => Err(ConnectionError::NotFound),
        }
    }

    /// Unregister only if `token` still belongs to `connection_id`. Returns
    /// `None` when the connection was already replaced or removed.
    pub async fn unregister_if_current(
        &self,
        token: &BotToken,
        connection_id: ConnectionId,
    ) -> Option<BotConnection> {
        let mut inner = self.inner.write().await;
        let current = inner
            .by_token
            .get(token)
            .is_some_and(|c| c.connection_id == connection_id);
        if !current {
            return None;
        }
        inner.remove(token)
    }

    pub async fn get_by_token(&self, token: &BotToken) -> Option<BotConnection> {
        self.inner.read().await.by_token.get(token).cloned()
    }

    pub async fn get_by_agent_id(&self, agent_id: &AgentId) -> Option<BotConnection> {
        let inner = self.inner.read().await;
        let token = inner.token_by_agent.get(agent_id)?;
        inner.by_token.get(token).cloned()
    }

    pub async fn get_by_player_id(&self, player_id: &PlayerId) -> Option<BotConnection> {
        let inner = self.inner.read().await;
        let token = inner.token_by_player.get(player_id)?;
        inner.by_token.get(token).cloned()
    }

    /// Snapshot of every current session.
    pub async fn list_sessions(&self) -> Vec<BotSession> {
        self.inner
            .read()
            .await
            .by_token
            .values()
            .map(|c| c.session.clone())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_token.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Record a heartbeat reply. Returns the previous pong time.
    pub async fn touch_pong(&self, token: &BotToken, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut inner = self.inner.write().await;
        let conn = inner.by_token.get_mut(token)?;
        Some(std::mem::replace(&mut conn.last_pong_at, now))
    }

    /// Mark a connection as closing and signal its socket task.
    pub async fn close(&self, token: &BotToken) -> bool {
        let mut inner = self.inner.write().await;
        match inner.by_token.get_mut(token) {
            Some(conn) => {
                conn.state = ConnectionState::Closing;
                conn.close();
                true
            }
            None => false,
        }
    }

    /// Signal every socket task to close (shutdown).
    pub async fn close_all(&self) {
        let mut inner = self.inner.write().await;
        for conn in inner.by_token.values_mut() {
            conn.state = ConnectionState::Closing;
            conn.close();
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur during connection operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Token already connected")]
    AlreadyConnected,
    #[error("Connection not found")]
    NotFound,
}

/// Errors writing to a connection's outbound buffer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("agent is not connected")]
    NotConnected,
    #[error("outbound buffer full")]
    Full,
    #[error("connection closed")]
    Closed,
}
