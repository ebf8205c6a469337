//! Inference backend abstraction layer.
//!
//! This module defines the `BackendAdapter` trait that hides the wire format
//! of each inference engine (Ollama, llama.cpp, ...) behind a common
//! interface. The stream relay only ever sees the canonical [`RawEvent`]
//! sequence, whether the backend streams natively or an adapter chunks a
//! finished completion.

mod lines;
mod llama_cpp;
mod ollama;
mod simulated;

pub use llama_cpp::LlamaCppAdapter;
pub use ollama::OllamaAdapter;
pub use simulated::SimulatedStreaming;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use llm_gateway_common::{ChatMessage, ChatRequest, Role};
use reqwest::Client;
use serde::Serialize;

use crate::config::{BackendConfig, BackendKind};
use crate::error::{Error, Result};

/// Prompt handed to a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Prompt {
    /// Conversation flattened into a single completion prompt.
    Text(String),
    /// Conversation passed through as structured messages.
    Messages(Vec<ChatMessage>),
}

impl Prompt {
    /// Flattened form, for backends that only accept text.
    pub fn to_text(&self) -> String {
        match self {
            Prompt::Text(text) => text.clone(),
            Prompt::Messages(messages) => flatten_messages(messages),
        }
    }

    /// Structured form, for backends that only accept messages.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        match self {
            Prompt::Text(text) => vec![ChatMessage::user(text.clone())],
            Prompt::Messages(messages) => messages.clone(),
        }
    }
}

/// Sampling parameters forwarded to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl From<&ChatRequest> for GenerationParams {
    fn from(request: &ChatRequest) -> Self {
        Self {
            model: request.model.clone(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }
}

/// Token counts and timing reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BackendUsage {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    /// Time the backend spent generating output, excluding prompt processing.
    pub generation_time: Option<Duration>,
}

/// Result of a non-streaming backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendCompletion {
    pub text: String,
    pub usage: BackendUsage,
}

/// Canonical event produced by a streaming backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    /// Incremental piece of generated text.
    Fragment(String),
    /// Backend finished generating.
    Done(BackendUsage),
}

pub type RawEventStream = BoxStream<'static, Result<RawEvent>>;

/// How an adapter produces incremental output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingMode {
    Native,
    Simulated,
}

/// Identity of the configured backend, reported by the health probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendInfo {
    pub backend: &'static str,
    pub base_url: String,
    pub streaming: StreamingMode,
}

/// Primary trait for inference backends.
///
/// Implementations are constructed once at startup and shared read-only by
/// every request.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn info(&self) -> BackendInfo;

    /// Translate a conversation into the prompt shape this backend expects.
    fn build_prompt(&self, messages: &[ChatMessage]) -> Prompt;

    /// Run one completion to the end.
    async fn generate(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<BackendCompletion>;

    /// Open a streaming completion.
    ///
    /// Dropping the returned stream closes the backend connection.
    async fn generate_stream(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<RawEventStream>;
}

/// Flatten a conversation: system contents first, then `ROLE: content` lines.
pub fn flatten_messages(messages: &[ChatMessage]) -> String {
    let system = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let history = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| format!("{}: {}", m.role.label(), m.content))
        .collect::<Vec<_>>()
        .join("\n");

    format!("{}\n{}", system, history).trim().to_string()
}

/// Build the process-wide adapter selected by configuration.
pub fn from_config(config: &BackendConfig) -> reqwest::Result<Arc<dyn BackendAdapter>> {
    let http_client = Client::builder()
        .connect_timeout(config.connect_timeout())
        .build()?;

    let adapter: Arc<dyn BackendAdapter> = match config.kind {
        BackendKind::Ollama => Arc::new(OllamaAdapter::new(http_client, config)),
        BackendKind::LlamaCpp => Arc::new(LlamaCppAdapter::new(http_client, config)),
    };

    if config.simulate_streaming {
        return Ok(Arc::new(SimulatedStreaming::new(adapter)));
    }
    Ok(adapter)
}

/// Send a streaming request, bounding the wait for response headers.
///
/// The body reads that follow are guarded separately by the line splitter.
async fn send_with_header_timeout(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<reqwest::Response> {
    match tokio::time::timeout(timeout, request.send()).await {
        Ok(response) => Ok(response?),
        Err(_) => {
            tracing::warn!("Backend sent no response headers within {:?}", timeout);
            Err(Error::backend(format!(
                "backend sent no response within {:?}",
                timeout
            )))
        }
    }
}

/// Turn a non-success backend response into an error carrying its status and message.
async fn status_error(response: reqwest::Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = extract_error_message(&body).unwrap_or(body);

    Error::Backend {
        status: Some(status.as_u16()),
        message: format!("backend returned {}: {}", status, message.trim()),
    }
}

/// Pull the human-readable message out of `{"error": "..."}` or
/// `{"error": {"message": "..."}}` bodies.
fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("error")? {
        serde_json::Value::String(message) => Some(message.clone()),
        serde_json::Value::Object(obj) => obj
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_puts_system_first() {
        let messages = vec![
            ChatMessage::user("Hi"),
            ChatMessage::system("Be brief."),
            ChatMessage::assistant("Hello!"),
            ChatMessage::system("Answer in English."),
            ChatMessage::user("Capital of France?"),
        ];
        assert_eq!(
            flatten_messages(&messages),
            "Be brief.\nAnswer in English.\nUSER: Hi\nASSISTANT: Hello!\nUSER: Capital of France?"
        );
    }

    #[test]
    fn test_flatten_without_system_is_trimmed() {
        let messages = vec![ChatMessage::user("Hi")];
        assert_eq!(flatten_messages(&messages), "USER: Hi");
    }

    #[test]
    fn test_flatten_only_system() {
        let messages = vec![ChatMessage::system("  rules  ")];
        assert_eq!(flatten_messages(&messages), "rules");
    }

    #[test]
    fn test_prompt_conversions() {
        let messages = vec![ChatMessage::system("S"), ChatMessage::user("U")];
        let structured = Prompt::Messages(messages.clone());
        assert_eq!(structured.to_text(), "S\nUSER: U");
        assert_eq!(structured.to_messages(), messages);

        let text = Prompt::Text("hello".to_string());
        assert_eq!(text.to_messages(), vec![ChatMessage::user("hello")]);
    }

    #[test]
    fn test_generation_params_from_request() {
        let request = ChatRequest::new("m", vec![ChatMessage::user("Hi")])
            .with_temperature(0.7)
            .with_max_tokens(64);
        let params = GenerationParams::from(&request);
        assert_eq!(params.model, "m");
        assert_eq!(params.temperature, 0.7);
        assert_eq!(params.max_tokens, Some(64));
    }

    #[test]
    fn test_extract_error_message() {
        assert_eq!(
            extract_error_message(r#"{"error":"model 'x' not found"}"#),
            Some("model 'x' not found".to_string())
        );
        assert_eq!(
            extract_error_message(r#"{"error":{"code":400,"message":"bad prompt"}}"#),
            Some("bad prompt".to_string())
        );
        assert_eq!(extract_error_message("plain text"), None);
    }

    #[test]
    fn test_from_config_selects_adapter() {
        let mut config = BackendConfig::default();
        let adapter = from_config(&config).unwrap();
        assert_eq!(adapter.info().backend, "ollama");
        assert_eq!(adapter.info().streaming, StreamingMode::Native);

        config.kind = BackendKind::LlamaCpp;
        config.simulate_streaming = true;
        let adapter = from_config(&config).unwrap();
        assert_eq!(adapter.info().backend, "llama_cpp");
        assert_eq!(adapter.info().streaming, StreamingMode::Simulated);
    }
}
