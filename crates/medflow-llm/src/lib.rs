//! OpenAI-compatible language-model collaborator.
//!
//! One non-streaming `/chat/completions` call per `complete`. Overload
//! statuses (429/503/529) map to [`FlowError::Overloaded`] so pipeline nodes
//! can route to their fallback edges; everything else is a generic request
//! failure.

use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use medflow_core::config::LlmConfig;
use medflow_core::error::{FlowError, Result};
use medflow_core::traits::LanguageModel;

pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    fast_model: String,
    max_tokens: u32,
}

impl OpenAiClient {
    /// Build a client from config, resolving the API key from the configured
    /// environment variable.
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&cfg.api_key_env).map_err(|_| {
            FlowError::Config(format!("API key env var '{}' not set", cfg.api_key_env))
        })?;

        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .map_err(|e| FlowError::Config(format!("http client: {e}")))?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: cfg.model.clone(),
            fast_model: cfg.fast_model.clone(),
            max_tokens: cfg.max_tokens,
        })
    }

    async fn request(&self, prompt: &str, model: &str) -> Result<String> {
        let body = ChatRequest {
            model: model.to_string(),
            messages: vec![ChatMessage {
                role: "user".into(),
                content: prompt.to_string(),
            }],
            max_tokens: self.max_tokens,
            stream: false,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FlowError::LlmRequest("request timeout".into())
                } else {
                    FlowError::LlmRequest(format!("connection error: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| FlowError::LlmRequest(format!("invalid response body: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.map(|m| m.content))
            .unwrap_or_default();

        debug!(model, chars = text.len(), "LLM completion received");
        Ok(text)
    }
}

/// Map an HTTP failure status onto the error taxonomy. Overload statuses are
/// kept distinguishable from generic request failures.
fn classify_status(status: StatusCode, detail: &str) -> FlowError {
    match status.as_u16() {
        429 | 503 | 529 => FlowError::Overloaded(format!("HTTP {status}: {detail}")),
        _ => FlowError::LlmRequest(format!("HTTP {status}: {detail}")),
    }
}

impl LanguageModel for OpenAiClient {
    fn complete(&self, prompt: &str, fast_mode: bool) -> BoxFuture<'_, Result<String>> {
        let prompt = prompt.to_string();
        let model = if fast_mode {
            self.fast_model.clone()
        } else {
            self.model.clone()
        };
        Box::pin(async move { self.request(&prompt, &model).await })
    }
}

// Wire types

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ResponseMessage>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overload_statuses_are_distinguishable() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_overload());
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "").is_overload());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, "").is_overload());
        assert!(!classify_status(StatusCode::BAD_REQUEST, "").is_overload());
    }

    #[test]
    fn test_response_parsing_tolerates_missing_fields() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(parsed.choices.is_empty());

        let parsed: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"xin chào"}}]}"#).unwrap();
        assert_eq!(parsed.choices[0].message.as_ref().unwrap().content, "xin chào");
    }
}
