//! Ollama backend adapter.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use llm_gateway_common::ChatMessage;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::lines::split_lines;
use super::{
    flatten_messages, send_with_header_timeout, status_error, BackendAdapter, BackendCompletion,
    BackendInfo, BackendUsage, GenerationParams, Prompt, RawEvent, RawEventStream, StreamingMode,
};
use crate::config::{BackendConfig, OllamaApi};
use crate::error::{Error, Result};

/// Ollama backend adapter.
///
/// Talks to an Ollama daemon, either through `/api/generate` with a
/// flattened prompt or through `/api/chat` with structured messages. Both
/// stream newline-delimited JSON.
pub struct OllamaAdapter {
    http_client: Client,
    base_url: String,
    api: OllamaApi,
    request_timeout: Duration,
    idle_read_timeout: Duration,
}

impl OllamaAdapter {
    pub fn new(http_client: Client, config: &BackendConfig) -> Self {
        Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api: config.ollama_api,
            request_timeout: config.request_timeout(),
            idle_read_timeout: config.idle_read_timeout(),
        }
    }

    fn request_body(&self, prompt: &Prompt, params: &GenerationParams, stream: bool) -> OllamaRequest {
        let options = OllamaOptions {
            temperature: params.temperature,
            num_predict: params.max_tokens,
        };

        match self.api {
            OllamaApi::Generate => OllamaRequest {
                model: params.model.clone(),
                prompt: Some(prompt.to_text()),
                messages: None,
                stream,
                options,
            },
            OllamaApi::Chat => OllamaRequest {
                model: params.model.clone(),
                prompt: None,
                messages: Some(prompt.to_messages()),
                stream,
                options,
            },
        }
    }

    fn endpoint(&self) -> String {
        match self.api {
            OllamaApi::Generate => format!("{}/api/generate", self.base_url),
            OllamaApi::Chat => format!("{}/api/chat", self.base_url),
        }
    }
}

// ============================================================================
// Ollama API types
// ============================================================================

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    messages: Option<Vec<ChatMessage>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

/// One object of a generate/chat response.
///
/// The non-streaming response and the final streamed line share this shape,
/// with `done` set and the usage counters filled in.
#[derive(Debug, Deserialize)]
struct OllamaChunk {
    /// `/api/generate` text.
    #[serde(default)]
    response: Option<String>,
    /// `/api/chat` text.
    #[serde(default)]
    message: Option<OllamaResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    /// Nanoseconds.
    #[serde(default)]
    total_duration: Option<u64>,
    /// Nanoseconds.
    #[serde(default)]
    prompt_eval_duration: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
}

impl OllamaChunk {
    fn text(&self) -> &str {
        if let Some(ref response) = self.response {
            return response;
        }
        self.message.as_ref().map(|m| m.content.as_str()).unwrap_or("")
    }

    fn usage(&self) -> BackendUsage {
        // Generation window = total time minus prompt evaluation.
        let generation_time = match (self.total_duration, self.prompt_eval_duration) {
            (Some(total), Some(prompt)) if total > prompt => {
                Some(Duration::from_nanos(total - prompt))
            }
            _ => None,
        };

        BackendUsage {
            input_tokens: self.prompt_eval_count,
            output_tokens: self.eval_count,
            generation_time,
        }
    }
}

/// Decode one NDJSON line into zero or more raw events.
///
/// Lines that are not JSON (keep-alives, partial buffering artifacts) are skipped.
fn decode_line(line: &str) -> Vec<Result<RawEvent>> {
    let chunk: OllamaChunk = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!("Skipping malformed Ollama stream line ({}): {}", e, line);
            return vec![];
        }
    };

    if let Some(ref message) = chunk.error {
        return vec![Err(Error::backend(message.clone()))];
    }

    let mut events = Vec::with_capacity(2);
    let text = chunk.text();
    if !text.is_empty() {
        events.push(Ok(RawEvent::Fragment(text.to_string())));
    }
    if chunk.done {
        events.push(Ok(RawEvent::Done(chunk.usage())));
    }
    events
}

// ============================================================================
// BackendAdapter implementation
// ============================================================================

#[async_trait]
impl BackendAdapter for OllamaAdapter {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            backend: "ollama",
            base_url: self.base_url.clone(),
            streaming: StreamingMode::Native,
        }
    }

    fn build_prompt(&self, messages: &[ChatMessage]) -> Prompt {
        match self.api {
            OllamaApi::Generate => Prompt::Text(flatten_messages(messages)),
            OllamaApi::Chat => Prompt::Messages(messages.to_vec()),
        }
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<BackendCompletion> {
        let url = self.endpoint();
        let body = self.request_body(prompt, params, false);

        tracing::debug!("Sending completion request to Ollama: {} model={}", url, params.model);

        let response = self
            .http_client
            .post(&url)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let chunk: OllamaChunk = response.json().await?;
        if let Some(ref message) = chunk.error {
            return Err(Error::backend(message.clone()));
        }

        Ok(BackendCompletion {
            text: chunk.text().to_string(),
            usage: chunk.usage(),
        })
    }

    async fn generate_stream(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<RawEventStream> {
        let url = self.endpoint();
        let body = self.request_body(prompt, params, true);

        tracing::debug!("Opening Ollama stream: {} model={}", url, params.model);

        let response = send_with_header_timeout(
            self.http_client.post(&url).json(&body),
            self.idle_read_timeout,
        )
        .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let events = split_lines(response.bytes_stream(), self.idle_read_timeout)
            .flat_map(|line| {
                let events = match line {
                    Ok(line) => decode_line(&line),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(events)
            })
            .boxed();

        Ok(events)
    }
}
