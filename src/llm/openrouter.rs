//! OpenRouter API client implementation with automatic retry for transient errors.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ChatMessage, ChatOptions, ChatResponse, LlmClient, TokenUsage};
use crate::retry::{parse_retry_after, FailureKind, RetryPolicy, UpstreamError};

const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const SERVICE: &str = "openrouter";

/// OpenRouter API client with automatic retry for transient errors.
pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    endpoint: String,
    retry: RetryPolicy,
}

impl OpenRouterClient {
    /// Create a new OpenRouter client with the default retry policy.
    pub fn new(api_key: String) -> Self {
        Self::with_retry_policy(api_key, RetryPolicy::default())
    }

    pub fn with_retry_policy(api_key: String, retry: RetryPolicy) -> Self {
        Self {
            client: Client::new(),
            api_key,
            endpoint: OPENROUTER_API_URL.to_string(),
            retry,
        }
    }

    /// Point the client at a different OpenAI-compatible endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Execute a single request without retry.
    async fn execute_request(
        &self,
        request: &OpenRouterRequest,
    ) -> Result<ChatResponse, UpstreamError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("X-Title", "Deep Researcher")
            .json(request)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, e))?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(UpstreamError::from_status(
                SERVICE,
                status.as_u16(),
                body,
                retry_after,
            ));
        }

        let parsed: OpenRouterResponse = serde_json::from_str(&body).map_err(|e| {
            UpstreamError::new(
                SERVICE,
                FailureKind::ParseError,
                format!("Failed to parse response: {}", e),
            )
        })?;

        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            UpstreamError::new(SERVICE, FailureKind::ParseError, "No choices in response")
        })?;

        Ok(ChatResponse {
            content: choice.message.content,
            finish_reason: choice.finish_reason,
            usage: parsed
                .usage
                .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens)),
            model: parsed.model.or_else(|| Some(request.model.clone())),
        })
    }
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> anyhow::Result<ChatResponse> {
        self.chat_completion_with_options(model, messages, ChatOptions::default())
            .await
    }

    async fn chat_completion_with_options(
        &self,
        model: &str,
        messages: &[ChatMessage],
        options: ChatOptions,
    ) -> anyhow::Result<ChatResponse> {
        let request = OpenRouterRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        };

        tracing::debug!("Sending request to OpenRouter: model={}", model);

        let response = self
            .retry
            .run("openrouter completion", || self.execute_request(&request))
            .await?;

        if let Some(ref usage) = response.usage {
            tracing::debug!(
                "OpenRouter usage: prompt={} completion={}",
                usage.prompt_tokens,
                usage.completion_tokens
            );
        }
        Ok(response)
    }
}

/// OpenRouter API request format.
#[derive(Debug, Serialize)]
struct OpenRouterRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
}

/// OpenRouter API response format.
#[derive(Debug, Deserialize)]
struct OpenRouterResponse {
    choices: Vec<OpenRouterChoice>,
    #[serde(default)]
    usage: Option<OpenRouterUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterChoice {
    message: OpenRouterMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterMessage {
    content: Option<String>,
}

/// Usage data (OpenAI-compatible).
#[derive(Debug, Deserialize)]
struct OpenRouterUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};

    async fn spawn_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v1/chat/completions", addr)
    }

    #[tokio::test]
    async fn test_completion_returns_first_choice() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "test/model");
                assert_eq!(body["messages"][1]["role"], "user");
                Json(json!({
                    "choices": [{"message": {"content": "yes"}, "finish_reason": "stop"}],
                    "usage": {"prompt_tokens": 10, "completion_tokens": 1, "total_tokens": 11}
                }))
            }),
        );
        let endpoint = spawn_server(app).await;
        let client = OpenRouterClient::with_retry_policy("key".into(), RetryPolicy::none())
            .with_endpoint(endpoint);

        let messages = [ChatMessage::system("judge"), ChatMessage::user("page")];
        let response = client.chat_completion("test/model", &messages).await.unwrap();
        assert_eq!(response.content.as_deref(), Some("yes"));
        assert_eq!(response.usage.unwrap().total_tokens, 11);
        assert_eq!(response.model.as_deref(), Some("test/model"));
    }

    #[tokio::test]
    async fn test_options_are_sent_only_when_set() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                let reply = if body.get("temperature").is_some() {
                    assert_eq!(body["temperature"], 0.0);
                    assert_eq!(body["max_tokens"], 8);
                    "with options"
                } else {
                    assert!(body.get("max_tokens").is_none());
                    "defaults"
                };
                Json(json!({"choices": [{"message": {"content": reply}, "finish_reason": "stop"}]}))
            }),
        );
        let endpoint = spawn_server(app).await;
        let client = OpenRouterClient::with_retry_policy("key".into(), RetryPolicy::none())
            .with_endpoint(endpoint);
        let messages = [ChatMessage::user("page")];

        let plain = client.chat_completion("test/model", &messages).await.unwrap();
        assert_eq!(plain.content.as_deref(), Some("defaults"));

        let options = ChatOptions {
            temperature: Some(0.0),
            max_tokens: Some(8),
        };
        let tuned = client
            .chat_completion_with_options("test/model", &messages, options)
            .await
            .unwrap();
        assert_eq!(tuned.content.as_deref(), Some("with options"));
        assert_eq!(tuned.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn test_client_error_is_reported() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async { (StatusCode::UNAUTHORIZED, "bad key") }),
        );
        let endpoint = spawn_server(app).await;
        let client = OpenRouterClient::with_retry_policy("key".into(), RetryPolicy::none())
            .with_endpoint(endpoint);

        let err = client
            .chat_completion("test/model", &[ChatMessage::user("hi")])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("HTTP 401"));
    }
}
