//! HTTP routes.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use botgate_domain::AgentId;
use botgate_shared::intake::IDEMPOTENCY_HEADER;
use botgate_shared::{idempotency_key, EventReceipt, IncomingWorldEvent};

use crate::app::App;
use crate::use_cases::intake::IntakeOutcome;

const SECRET_HEADER: &str = "x-gateway-secret";

/// Create all HTTP routes.
pub fn routes() -> Router<Arc<App>> {
    Router::new()
        .route("/health", get(status))
        .route("/gateway/status", get(status))
        .route("/gateway/metrics", get(metrics))
        .route("/gateway/sessions", get(sessions))
        .route("/gateway/event", post(receive_event))
        .route("/gateway/agents/{agent_id}", delete(teardown_agent))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    status: &'static str,
    version: String,
    uptime_secs: u64,
    connections: usize,
}

async fn status(State(app): State<Arc<App>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        version: app.config.server_version.clone(),
        uptime_secs: app.uptime().as_secs(),
        connections: app.connections.len().await,
    })
}

async fn metrics(State(app): State<Arc<App>>) -> Result<impl IntoResponse, ApiError> {
    let body = app
        .metrics
        .render()
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, app.metrics.content_type())], body))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionSummary {
    agent_id: String,
    player_id: String,
    world_id: String,
    player_name: String,
    token: String,
    negotiated_version: u32,
    subscribed_events: Vec<String>,
    connected_at: DateTime<Utc>,
    pending_events: usize,
}

async fn sessions(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
) -> Result<Json<Vec<SessionSummary>>, ApiError> {
    authorize(&app, &headers)?;

    let mut summaries = Vec::new();
    for session in app.connections.list_sessions().await {
        let pending_events = app.use_cases.dispatcher.queue_depth(&session.agent_id).await;
        summaries.push(SessionSummary {
            agent_id: session.agent_id.to_string(),
            player_id: session.player_id.to_string(),
            world_id: session.world_id.to_string(),
            player_name: session.player_name,
            token: session.token.masked(),
            negotiated_version: session.negotiated_version,
            subscribed_events: session.subscribed_events,
            connected_at: session.connected_at,
            pending_events,
        });
    }
    Ok(Json(summaries))
}

async fn receive_event(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<EventReceipt>) {
    if authorize(&app, &headers).is_err() {
        return (StatusCode::UNAUTHORIZED, Json(EventReceipt::unauthorized()));
    }

    let body: Value = match serde_json::from_slice(&body) {
        Ok(body) => body,
        Err(e) => return refused(format!("Invalid JSON: {e}")),
    };

    let header_key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok());
    let Some(key) = idempotency_key(header_key, &body) else {
        return refused("Missing idempotency key");
    };

    let incoming = match IncomingWorldEvent::parse(&body) {
        Ok(incoming) => incoming,
        Err(e) => return refused(e.to_string()),
    };

    match app.use_cases.intake.receive(key, incoming).await {
        Ok(IntakeOutcome::Accepted { event_id, .. }) => {
            (StatusCode::OK, Json(EventReceipt::accepted(event_id)))
        }
        Ok(IntakeOutcome::Duplicate) => (StatusCode::OK, Json(EventReceipt::duplicate())),
        Err(e) => refused(e.to_string()),
    }
}

fn refused(reason: impl Into<String>) -> (StatusCode, Json<EventReceipt>) {
    let reason = reason.into();
    tracing::warn!(reason = %reason, "World event refused");
    (StatusCode::BAD_REQUEST, Json(EventReceipt::refused(reason)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TeardownResponse {
    agent_id: String,
    discarded: usize,
}

async fn teardown_agent(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
) -> Result<Json<TeardownResponse>, ApiError> {
    authorize(&app, &headers)?;

    let agent_id = AgentId::new(agent_id);
    let discarded = app.use_cases.dispatcher.teardown(&agent_id).await;
    app.use_cases.commands.clear_agent(&agent_id);

    Ok(Json(TeardownResponse {
        agent_id: agent_id.into_inner(),
        discarded,
    }))
}

/// Accept `Authorization: Bearer <secret>` or `x-gateway-secret: <secret>`.
/// Without a configured secret every request is refused.
fn authorize(app: &App, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(secret) = app.config.gateway_secret.as_deref() else {
        return Err(ApiError::Unauthorized);
    };

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let explicit = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());

    if bearer == Some(secret) || explicit == Some(secret) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

pub enum ApiError {
    Unauthorized,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use tower::ServiceExt;

    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::config::GatewayConfig;
    use crate::infrastructure::metrics::GatewayMetrics;
    use crate::infrastructure::ports::MockSimulationPort;

    fn app(secret: Option<&str>) -> Arc<App> {
        let mut vars = HashMap::new();
        if let Some(secret) = secret {
            vars.insert("GATEWAY_SECRET".to_string(), secret.to_string());
        }
        let config = GatewayConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();
        Arc::new(App::new(
            config,
            Arc::new(MockSimulationPort::new()),
            Arc::new(SystemClock::new()),
            Arc::new(GatewayMetrics::new().unwrap()),
        ))
    }

    fn event_body() -> Value {
        json!({
            "eventType": "conversation.message",
            "eventAgentId": "a1",
            "targetAgentId": "a2",
            "worldId": "w1",
            "priority": 0,
            "expiresAt": Utc::now().timestamp_millis() + 60_000,
            "payload": {"conversationId": "c1"}
        })
    }

    fn post_event(body: &Value, key: Option<&str>, auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/gateway/event")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(key) = key {
            builder = builder.header(IDEMPOTENCY_HEADER, key);
        }
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {auth}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn call(app: &Arc<App>, request: Request<Body>) -> (StatusCode, Value) {
        let response = routes()
            .with_state(app.clone())
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn event_without_secret_is_unauthorized() {
        let app = app(Some("s3cret"));
        let (status, body) = call(&app, post_event(&event_body(), Some("k1"), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["received"], false);

        let (status, _) = call(&app, post_event(&event_body(), Some("k1"), Some("wrong"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unconfigured_secret_refuses_everything() {
        let app = app(None);
        let (status, _) = call(&app, post_event(&event_body(), Some("k1"), Some(""))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn accepted_event_is_queued_for_target() {
        let app = app(Some("s3cret"));
        let (status, body) = call(&app, post_event(&event_body(), Some("k1"), Some("s3cret"))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["received"], true);
        assert!(body["eventId"].is_string());
        assert_eq!(
            app.use_cases
                .dispatcher
                .queue_depth(&AgentId::new("a2"))
                .await,
            1
        );
    }

    #[tokio::test]
    async fn secret_header_and_body_key_are_accepted() {
        let app = app(Some("s3cret"));
        let mut body = event_body();
        body["idempotencyKey"] = json!("from-body");
        let request = Request::builder()
            .method("POST")
            .uri("/gateway/event")
            .header(SECRET_HEADER, "s3cret")
            .body(Body::from(body.to_string()))
            .unwrap();

        let (status, body) = call(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["received"], true);
    }

    #[tokio::test]
    async fn duplicate_key_is_acknowledged_without_queueing() {
        let app = app(Some("s3cret"));
        call(&app, post_event(&event_body(), Some("k1"), Some("s3cret"))).await;
        let (status, body) = call(&app, post_event(&event_body(), Some("k1"), Some("s3cret"))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["received"], true);
        assert!(body.get("eventId").is_none());
        assert_eq!(
            app.use_cases
                .dispatcher
                .queue_depth(&AgentId::new("a2"))
                .await,
            1
        );
    }

    #[tokio::test]
    async fn missing_key_and_bad_body_are_bad_requests() {
        let app = app(Some("s3cret"));
        let (status, body) = call(&app, post_event(&event_body(), None, Some("s3cret"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["received"], false);

        let mut unsupported = event_body();
        unsupported["eventType"] = json!("weather.changed");
        let (status, body) = call(&app, post_event(&unsupported, Some("k2"), Some("s3cret"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("weather.changed"));
    }

    #[tokio::test]
    async fn teardown_discards_agent_queue() {
        let app = app(Some("s3cret"));
        call(&app, post_event(&event_body(), Some("k1"), Some("s3cret"))).await;

        let request = Request::builder()
            .method("DELETE")
            .uri("/gateway/agents/a2")
            .header(header::AUTHORIZATION, "Bearer s3cret")
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(&app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"agentId": "a2", "discarded": 1}));
        assert_eq!(
            app.use_cases
                .dispatcher
                .queue_depth(&AgentId::new("a2"))
                .await,
            0
        );
    }

    #[tokio::test]
    async fn status_and_metrics_are_public() {
        let app = app(Some("s3cret"));
        let request = Request::builder()
            .uri("/gateway/status")
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);

        let response = routes()
            .with_state(app.clone())
            .oneshot(
                Request::builder()
                    .uri("/gateway/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("botgate_ws_connections"));
    }

    #[tokio::test]
    async fn sessions_need_the_secret() {
        let app = app(Some("s3cret"));
        let request = Request::builder()
            .uri("/gateway/sessions")
            .body(Body::empty())
            .unwrap();
        let (status, _) = call(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let request = Request::builder()
            .uri("/gateway/sessions")
            .header(SECRET_HEADER, "s3cret")
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }
}
