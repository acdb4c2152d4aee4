//! HTTP client for the simulation server's bot API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use botgate_domain::{AgentId, BotToken, PlayerId, WorldId};

use crate::infrastructure::ports::{
    CommandVerdict, SimulationCommand, SimulationError, SimulationPort, TokenBinding, TokenVerdict,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct HttpSimulationClient {
    client: Client,
    base_url: String,
}

#[derive(Serialize)]
struct ValidateTokenRequest<'a> {
    token: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PostCommandRequest<'a> {
    agent_id: &'a str,
    command_type: &'a str,
    args: &'a Value,
}

impl HttpSimulationClient {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn string_field(json: &Value, key: &str) -> Option<String> {
    match json.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl SimulationPort for HttpSimulationClient {
    async fn validate_token(&self, token: &BotToken) -> Result<TokenVerdict, SimulationError> {
        let response = self
            .client
            .post(self.url("/api/bot/token/validate"))
            .json(&ValidateTokenRequest {
                token: token.as_str(),
            })
            .send()
            .await
            .map_err(|e| SimulationError::Request(e.to_string()))?;

        let ok = response.status().is_success();
        let json: Value = response.json().await.unwrap_or_default();

        if !ok {
            return Ok(TokenVerdict::Invalid {
                code: string_field(&json, "code").unwrap_or_else(|| "INVALID_TOKEN".into()),
                message: string_field(&json, "message").unwrap_or_else(|| "Invalid token".into()),
            });
        }

        let (Some(agent_id), Some(player_id), Some(world_id)) = (
            string_field(&json, "agentId"),
            string_field(&json, "playerId"),
            string_field(&json, "worldId"),
        ) else {
            return Ok(TokenVerdict::Invalid {
                code: "INVALID_TOKEN_RESPONSE".into(),
                message: "Missing required fields in token response".into(),
            });
        };

        Ok(TokenVerdict::Valid(TokenBinding {
            agent_id: AgentId::new(agent_id),
            player_id: PlayerId::new(player_id),
            world_id: WorldId::new(world_id),
            player_name: string_field(&json, "playerName"),
        }))
    }

    async fn post_command(
        &self,
        token: &BotToken,
        idempotency_key: &str,
        command: &SimulationCommand,
    ) -> Result<CommandVerdict, SimulationError> {
        let response = self
            .client
            .post(self.url("/api/bot/command"))
            .bearer_auth(token.as_str())
            .header("x-idempotency-key", idempotency_key)
            .json(&PostCommandRequest {
                agent_id: command.agent_id.as_str(),
                command_type: &command.command_type,
                args: &command.args,
            })
            .send()
            .await
            .map_err(|e| SimulationError::Request(e.to_string()))?;

        let ok = response.status().is_success();
        let json: Value = response.json().await.unwrap_or_default();

        if !ok {
            return Ok(CommandVerdict::Rejected {
                code: string_field(&json, "code").unwrap_or_else(|| "COMMAND_REJECTED".into()),
                message: string_field(&json, "message")
                    .unwrap_or_else(|| "Command rejected".into()),
            });
        }

        Ok(CommandVerdict::Accepted {
            input_id: string_field(&json, "inputId").unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    /// Serve `router` on an ephemeral port and return its base URL.
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn valid_token_yields_binding() {
        let router = Router::new().route(
            "/api/bot/token/validate",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["token"], "tok-1");
                Json(json!({"valid": true, "agentId": "a1", "playerId": "p1", "worldId": "w1"}))
            }),
        );
        let client = HttpSimulationClient::new(&serve(router).await);

        let verdict = client.validate_token(&BotToken::new("tok-1")).await.unwrap();
        assert_eq!(
            verdict,
            TokenVerdict::Valid(TokenBinding {
                agent_id: AgentId::new("a1"),
                player_id: PlayerId::new("p1"),
                world_id: WorldId::new("w1"),
                player_name: None,
            })
        );
    }

    #[tokio::test]
    async fn rejected_token_keeps_simulation_code() {
        let router = Router::new().route(
            "/api/bot/token/validate",
            post(|| async {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({"code": "TOKEN_EXPIRED", "message": "expired"})),
                )
            }),
        );
        let client = HttpSimulationClient::new(&serve(router).await);

        let verdict = client.validate_token(&BotToken::new("old")).await.unwrap();
        assert_eq!(
            verdict,
            TokenVerdict::Invalid {
                code: "TOKEN_EXPIRED".into(),
                message: "expired".into()
            }
        );
    }

    #[tokio::test]
    async fn incomplete_binding_is_invalid() {
        let router = Router::new().route(
            "/api/bot/token/validate",
            post(|| async { Json(json!({"valid": true, "agentId": "a1"})) }),
        );
        let client = HttpSimulationClient::new(&serve(router).await);

        let verdict = client.validate_token(&BotToken::new("t")).await.unwrap();
        assert!(matches!(verdict, TokenVerdict::Invalid { code, .. } if code == "INVALID_TOKEN_RESPONSE"));
    }

    #[tokio::test]
    async fn post_command_sends_auth_and_idempotency_headers() {
        let router = Router::new().route(
            "/api/bot/command",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Bearer tok-1");
                assert_eq!(headers["x-idempotency-key"], "a1:c1");
                assert_eq!(body["agentId"], "a1");
                assert_eq!(body["commandType"], "say");
                assert_eq!(body["args"]["text"], "hi");
                Json(json!({"inputId": "in-7"}))
            }),
        );
        let client = HttpSimulationClient::new(&serve(router).await);

        let verdict = client
            .post_command(
                &BotToken::new("tok-1"),
                "a1:c1",
                &SimulationCommand {
                    agent_id: AgentId::new("a1"),
                    command_type: "say".into(),
                    args: json!({"text": "hi"}),
                },
            )
            .await
            .unwrap();
        assert_eq!(
            verdict,
            CommandVerdict::Accepted {
                input_id: "in-7".into()
            }
        );
    }

    #[tokio::test]
    async fn unreachable_server_is_an_error() {
        let client = HttpSimulationClient::new("http://127.0.0.1:9");
        let result = client.validate_token(&BotToken::new("t")).await;
        assert!(matches!(result, Err(SimulationError::Request(_))));
    }
}
