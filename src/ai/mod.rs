use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::config::AiConfig;
use crate::shared::error::ApiError;
use crate::shared::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
}

/// Thin passthrough to an OpenAI-style chat completions endpoint. The
/// upstream is an external collaborator; any failure on its side maps to a
/// 502 and nothing is retried.
pub struct AiClient {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
}

impl AiClient {
    pub fn new(config: &AiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<String, ApiError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });

        let mut request = self.client.post(&self.api_url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|err| {
            warn!("AI upstream request failed: {err}");
            ApiError::Upstream("AI upstream is unreachable".to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!("AI upstream returned {status}");
            return Err(ApiError::Upstream(format!(
                "AI upstream returned {status}"
            )));
        }

        let result: Value = response.json().await.map_err(|err| {
            warn!("AI upstream sent an unreadable body: {err}");
            ApiError::Upstream("AI upstream sent an invalid response".to_string())
        })?;

        let reply = result["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                ApiError::Upstream("AI upstream returned no choices".to_string())
            })?
            .to_string();

        debug!("AI upstream replied with {} bytes", reply.len());
        Ok(reply)
    }
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route("/chat", post(chat))
}

pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if req.messages.is_empty() {
        return Err(ApiError::Validation(
            "At least one message is required".to_string(),
        ));
    }

    let reply = state.ai.chat(&req.messages).await?;
    Ok(Json(ChatResponse { reply }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(url: &str) -> AiClient {
        AiClient::new(&AiConfig {
            api_url: url.to_string(),
            api_key: None,
            model: "gpt-3.5-turbo".to_string(),
        })
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_502() {
        // Nothing listens on port 1.
        let client = test_client("http://127.0.0.1:1/v1/chat/completions");
        let err = client
            .chat(&[ChatMessage {
                role: "user".to_string(),
                content: "hello".to_string(),
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Upstream(_)));
    }

    #[test]
    fn test_message_round_trips_snake_case() {
        let message: ChatMessage =
            serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert_eq!(message.role, "user");
        let body = serde_json::to_value(&message).unwrap();
        assert_eq!(body["content"], "hi");
    }
}
