//! WebSocket endpoint for bot agents.
//!
//! The handshake runs after the upgrade so that refusals can be reported with
//! an `auth_error` frame before the socket is closed.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use botgate_domain::BotToken;
use botgate_shared::{
    negotiate_version, parse_subscribe_list, parse_version_range, AuthErrorCode, ClientMessage,
    ConnectedPayload, OutboundMessage, ServerMessage, PROTOCOL_VERSION,
};

use crate::api::connections::{BotConnection, BotSession};
use crate::app::App;
use crate::infrastructure::ports::TokenVerdict;

/// Buffer size for per-connection message channels.
const CONNECTION_CHANNEL_BUFFER: usize = 256;

const DEFAULT_PLAYER_NAME: &str = "NPC";

/// Query string of `GET /ws/bot`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HandshakeQuery {
    pub token: Option<String>,
    /// Accepted protocol versions as `min-max`.
    pub v: Option<String>,
    /// Comma separated event type patterns.
    pub subscribe: Option<String>,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app): State<Arc<App>>,
    Query(query): Query<HandshakeQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app, query))
}

// =============================================================================
// Handshake
// =============================================================================

#[derive(Debug)]
struct Authenticated {
    session: BotSession,
    supported_versions: Vec<u32>,
}

/// A refused handshake. `reply` is sent before the socket closes.
#[derive(Debug)]
struct Refusal {
    reply: Option<ServerMessage>,
}

impl Refusal {
    fn with(version: u32, code: AuthErrorCode, message: impl Into<String>) -> Self {
        Self {
            reply: Some(ServerMessage::auth_error(version, code, message, None)),
        }
    }
}

async fn authenticate(app: &App, query: &HandshakeQuery) -> Result<Authenticated, Refusal> {
    let range = parse_version_range(query.v.as_deref());
    let negotiated = negotiate_version(range, &app.config.supported_protocol_versions).map_err(
        |mismatch| Refusal {
            reply: Some(ServerMessage::auth_error(
                PROTOCOL_VERSION,
                AuthErrorCode::VersionMismatch,
                mismatch.to_string(),
                Some(mismatch.supported),
            )),
        },
    )?;
    let version = negotiated.version;
    let subscribed_events = parse_subscribe_list(query.subscribe.as_deref());

    let Some(token) = query
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .map(BotToken::new)
    else {
        return Err(Refusal::with(version, AuthErrorCode::InvalidToken, "Missing token"));
    };

    if app.connections.has_token(&token).await {
        return Err(Refusal::with(
            version,
            AuthErrorCode::AlreadyConnected,
            "Token already connected",
        ));
    }

    app.metrics.ws_connections_created.inc();
    app.metrics.ws_connections.inc();

    let binding = match app.simulation.validate_token(&token).await {
        Ok(TokenVerdict::Valid(binding)) => binding,
        Ok(TokenVerdict::Invalid { code, message }) => {
            tracing::warn!(token = %token.masked(), code = %code, "Bot token rejected");
            app.metrics.ws_connections.dec();
            app.metrics
                .ws_connections_closed
                .with_label_values(&["auth_failed"])
                .inc();
            return Err(Refusal::with(version, AuthErrorCode::from_code(&code), message));
        }
        Err(e) => {
            tracing::error!(token = %token.masked(), error = %e, "Token validation failed");
            app.metrics.ws_connections.dec();
            app.metrics
                .ws_connections_closed
                .with_label_values(&["auth_error"])
                .inc();
            return Err(Refusal { reply: None });
        }
    };

    Ok(Authenticated {
        session: BotSession {
            token,
            agent_id: binding.agent_id,
            player_id: binding.player_id,
            world_id: binding.world_id,
            player_name: binding
                .player_name
                .unwrap_or_else(|| DEFAULT_PLAYER_NAME.to_string()),
            negotiated_version: version,
            subscribed_events,
            connected_at: app.clock.now(),
        },
        supported_versions: negotiated.supported,
    })
}

// =============================================================================
// Connection lifecycle
// =============================================================================

/// Handle an individual WebSocket connection.
async fn handle_socket(socket: WebSocket, app: Arc<App>, query: HandshakeQuery) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Authenticated {
        session,
        supported_versions,
    } = match authenticate(&app, &query).await {
        Ok(admitted) => admitted,
        Err(refusal) => {
            if let Some(reply) = refusal.reply {
                send_direct(&mut ws_sender, reply.into()).await;
            }
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };

    let agent_id = session.agent_id.clone();
    let token = session.token.clone();

    // One live connection per agent: a newer token wins.
    if let Some(existing) = app.connections.get_by_agent_id(&agent_id).await {
        existing.close();
        app.connections
            .unregister_if_current(&existing.session.token, existing.connection_id)
            .await;
        tracing::info!(
            agent_id = %agent_id,
            previous = %existing.connection_id,
            "Evicted previous connection for agent"
        );
    }

    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(CONNECTION_CHANNEL_BUFFER);
    let conn = BotConnection::new(session.clone(), tx, app.clock.now());
    let connection_id = conn.connection_id;
    let close = conn.close_token();

    if app.connections.register(conn.clone()).await.is_err() {
        send_direct(
            &mut ws_sender,
            ServerMessage::auth_error(
                session.negotiated_version,
                AuthErrorCode::AlreadyConnected,
                "Token already connected",
                None,
            )
            .into(),
        )
        .await;
        let _ = ws_sender.send(Message::Close(None)).await;
        app.metrics.ws_connections.dec();
        app.metrics
            .ws_connections_closed
            .with_label_values(&["auth_failed"])
            .inc();
        return;
    }

    let connected = ServerMessage::connected(ConnectedPayload {
        agent_id: session.agent_id.to_string(),
        player_id: session.player_id.to_string(),
        player_name: session.player_name.clone(),
        world_id: session.world_id.to_string(),
        server_version: app.config.server_version.clone(),
        negotiated_version: session.negotiated_version,
        supported_versions,
        subscribed_events: session.subscribed_events.clone(),
    });
    if let Err(e) = conn.send(connected.into()) {
        tracing::error!(agent_id = %agent_id, error = %e, "Failed to queue connected message");
        app.connections.unregister_if_current(&token, connection_id).await;
        app.metrics.ws_connections.dec();
        app.metrics
            .ws_connections_closed
            .with_label_values(&["send_failed"])
            .inc();
        return;
    }

    // Spawn a task to forward messages from the channel to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match msg.to_text() {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(message_type = %msg.message_type(), error = %e, "Failed to serialize message");
                }
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    tracing::info!(
        agent_id = %agent_id,
        world_id = %session.world_id,
        token = %token.masked(),
        connection_id = %connection_id,
        version = session.negotiated_version,
        "Bot connected"
    );

    app.use_cases
        .dispatcher
        .on_connect(&agent_id, conn.subscription.clone())
        .await;

    let mut heartbeat = tokio::time::interval(app.config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;
    let mut last_pong = Instant::now();
    let mut last_ping: Option<Instant> = None;

    let reason = loop {
        tokio::select! {
            _ = close.cancelled() => break "server_closed",
            _ = heartbeat.tick() => {
                if last_pong.elapsed() > app.config.heartbeat_timeout {
                    tracing::warn!(agent_id = %agent_id, "Heartbeat timeout, closing");
                    break "heartbeat_timeout";
                }
                if conn.send(ServerMessage::ping().into()).is_err() {
                    break "send_failed";
                }
                last_ping = Some(Instant::now());
            }
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => match ClientMessage::parse(text.as_str()) {
                    Ok(ClientMessage::Pong { .. }) => {
                        last_pong = Instant::now();
                        if let Some(sent) = last_ping.take() {
                            app.metrics
                                .heartbeat_latency_ms
                                .observe(sent.elapsed().as_secs_f64() * 1_000.0);
                        }
                        app.connections.touch_pong(&token, app.clock.now()).await;
                    }
                    Ok(ClientMessage::EventAck { event_id }) => {
                        app.use_cases.dispatcher.on_ack(&agent_id, &event_id).await;
                    }
                    Ok(msg) => {
                        for command in msg.into_commands() {
                            app.use_cases.router.handle(&conn, command);
                        }
                    }
                    Err(e) => {
                        tracing::debug!(agent_id = %agent_id, error = %e, "Ignoring unreadable frame");
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!(agent_id = %agent_id, "WebSocket closed by client");
                    break "closed";
                }
                Some(Err(e)) => {
                    tracing::warn!(agent_id = %agent_id, error = %e, "WebSocket error");
                    break "closed";
                }
                Some(Ok(_)) => {}
            },
        }
    };

    // Clean up. A connection that was replaced leaves agent state alone.
    if app
        .connections
        .unregister_if_current(&token, connection_id)
        .await
        .is_some()
    {
        app.use_cases.dispatcher.on_disconnect(&agent_id).await;
        app.use_cases.commands.clear_agent(&agent_id);
    } else {
        tracing::info!(
            agent_id = %agent_id,
            connection_id = %connection_id,
            "Replaced connection closed, agent state kept"
        );
    }
    drop(conn);
    send_task.abort();

    app.metrics.ws_connections.dec();
    app.metrics
        .ws_connections_closed
        .with_label_values(&[reason])
        .inc();
    tracing::info!(agent_id = %agent_id, reason, "Bot connection terminated");
}

async fn send_direct(sender: &mut SplitSink<WebSocket, Message>, message: OutboundMessage) {
    match message.to_text() {
        Ok(json) => {
            let _ = sender.send(Message::Text(json.into())).await;
        }
        Err(e) => tracing::error!(error = %e, "Failed to serialize handshake reply"),
    }
}
