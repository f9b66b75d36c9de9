//! Chat-completion language models.
//!
//! Only the OpenAI-compatible `/chat/completions` wire format is spoken; any server that
//! implements it (OpenAI, vLLM, Ollama, LiteLLM) can be configured through `[llm]`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::LlmError;
use crate::models::LlmConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Incremental output of a streaming chat call.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Delta(String),
    Done,
}

/// A chat model. Errors carry the provider status and are never retried here.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.chat(&[ChatMessage::user(prompt)]).await
    }

    /// Stream the reply over `tx`, returning the full text once the stream ends.
    ///
    /// A dropped receiver stops forwarding but the call still completes.
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<String, LlmError> {
        let text = self.chat(messages).await?;
        let _ = tx.send(StreamEvent::Delta(text.clone())).await;
        let _ = tx.send(StreamEvent::Done).await;
        Ok(text)
    }

    /// Same provider, different model.
    fn with_model(&self, model: &str) -> Arc<dyn LanguageModel>;

    fn model_name(&self) -> &str;
}

pub fn create_language_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>, LlmError> {
    Ok(Arc::new(OpenAiCompatible::new(config)?))
}

/// Map an HTTP error status and body to an [`LlmError`].
pub fn parse_http_error(status: u16, body: &str) -> LlmError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string());
    match status {
        408 | 504 => LlmError::Timeout,
        _ => LlmError::Provider { status, message },
    }
}

fn map_send_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout
    } else {
        LlmError::ConnectionError(e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Extract the text delta from one SSE line. `None` for keep-alives and `[DONE]`.
fn parse_sse_line(line: &str) -> Option<String> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return None;
    }
    let chunk: StreamChunk = serde_json::from_str(data).ok()?;
    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|s| !s.is_empty())
}

/// Client for an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatible {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: Option<f32>,
}

impl OpenAiCompatible {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        if api_key.is_none() && config.url.contains("api.openai.com") {
            return Err(LlmError::MissingApiKey(config.api_key_env.clone()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            temperature: config.temperature,
        })
    }

    fn request_body(&self, messages: &[ChatMessage], stream: bool) -> serde_json::Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": stream,
        });
        if let Some(temperature) = self.temperature {
            body["temperature"] = json!(temperature);
        }
        body
    }

    async fn send(&self, body: &serde_json::Value) -> Result<reqwest::Response, LlmError> {
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(map_send_error)?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(parse_http_error(status, &body));
        }
        Ok(response)
    }
}

#[async_trait]
impl LanguageModel for OpenAiCompatible {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        debug!(model = %self.model, messages = messages.len(), "chat completion");
        let response = self.send(&self.request_body(messages, false)).await?;
        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))
    }

    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<String, LlmError> {
        let response = self.send(&self.request_body(messages, true)).await?;
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut text = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_send_error)?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line: String = buffer.drain(..=line_end).collect();
                if let Some(delta) = parse_sse_line(&line) {
                    text.push_str(&delta);
                    let _ = tx.send(StreamEvent::Delta(delta)).await;
                }
            }
        }
        if let Some(delta) = parse_sse_line(&buffer) {
            text.push_str(&delta);
            let _ = tx.send(StreamEvent::Delta(delta)).await;
        }

        let _ = tx.send(StreamEvent::Done).await;
        Ok(text)
    }

    fn with_model(&self, model: &str) -> Arc<dyn LanguageModel> {
        Arc::new(Self {
            model: model.to_string(),
            ..self.clone()
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> LlmConfig {
        LlmConfig {
            url: "http://localhost:8000/v1/".to_string(),
            api_key_env: "RAGSTUDIO_TEST_UNSET_KEY".to_string(),
            temperature: Some(0.1),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_http_error_extracts_message() {
        let err = parse_http_error(429, r#"{"error":{"message":"slow down"}}"#);
        assert!(matches!(
            err,
            LlmError::Provider { status: 429, ref message } if message == "slow down"
        ));

        let err = parse_http_error(500, "boom");
        assert_eq!(err.status(), Some(500));
        assert!(matches!(parse_http_error(504, ""), LlmError::Timeout));
    }

    #[test]
    fn test_parse_sse_line() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_sse_line(line).as_deref(), Some("Hel"));
        assert_eq!(parse_sse_line("data: [DONE]"), None);
        assert_eq!(parse_sse_line(": keep-alive"), None);
        assert_eq!(parse_sse_line(r#"data: {"choices":[{"delta":{}}]}"#), None);
    }

    #[test]
    fn test_local_server_needs_no_key() {
        let model = OpenAiCompatible::new(&local_config()).unwrap();
        assert_eq!(model.base_url, "http://localhost:8000/v1");
        assert!(model.api_key.is_none());
    }

    #[test]
    fn test_openai_requires_key() {
        let config = LlmConfig {
            api_key_env: "RAGSTUDIO_TEST_UNSET_KEY".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            OpenAiCompatible::new(&config),
            Err(LlmError::MissingApiKey(_))
        ));
    }

    #[test]
    fn test_request_body_and_model_override() {
        let model = OpenAiCompatible::new(&local_config()).unwrap();
        let body = model.request_body(&[ChatMessage::user("hi")], true);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["stream"], true);
        assert!(body["temperature"].is_number());

        let other = model.with_model("llama3");
        assert_eq!(other.model_name(), "llama3");
        assert_eq!(model.model_name(), "gpt-4o-mini");
    }
}
