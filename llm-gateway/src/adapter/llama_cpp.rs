//! llama.cpp backend adapter.
//!
//! Talks to a running `llama-server` through its native `/completion`
//! endpoint, which takes a raw prompt and streams Server-Sent Events.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{future, stream, StreamExt};
use llm_gateway_common::ChatMessage;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::lines::split_lines;
use super::{
    flatten_messages, send_with_header_timeout, status_error, BackendAdapter, BackendCompletion,
    BackendInfo, BackendUsage, GenerationParams, Prompt, RawEvent, RawEventStream, StreamingMode,
};
use crate::config::BackendConfig;
use crate::error::{Error, Result};

/// Cue appended to flattened prompts so completion-style models answer as the assistant.
const ASSISTANT_CUE: &str = "ASSISTANT:";

pub struct LlamaCppAdapter {
    http_client: Client,
    base_url: String,
    request_timeout: Duration,
    idle_read_timeout: Duration,
}

impl LlamaCppAdapter {
    pub fn new(http_client: Client, config: &BackendConfig) -> Self {
        Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout(),
            idle_read_timeout: config.idle_read_timeout(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/completion", self.base_url)
    }
}

// ============================================================================
// llama-server API types
// ============================================================================

/// Request body for llama-server /completion endpoint.
#[derive(Debug, Serialize)]
struct CompletionRequest {
    prompt: String,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    n_predict: Option<u32>,
    stream: bool,
}

/// Response (or streamed event) from llama-server /completion endpoint.
#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    content: String,
    #[serde(default)]
    stop: bool,
    #[serde(default)]
    tokens_evaluated: Option<u32>,
    #[serde(default)]
    tokens_predicted: Option<u32>,
    #[serde(default)]
    timings: Option<CompletionTimings>,
}

#[derive(Debug, Deserialize)]
struct CompletionTimings {
    #[serde(default)]
    predicted_ms: Option<f64>,
}

impl CompletionChunk {
    fn usage(&self) -> BackendUsage {
        let generation_time = self
            .timings
            .as_ref()
            .and_then(|t| t.predicted_ms)
            .filter(|ms| ms.is_finite() && *ms > 0.0)
            .map(|ms| Duration::from_secs_f64(ms / 1000.0));

        BackendUsage {
            input_tokens: self.tokens_evaluated,
            output_tokens: self.tokens_predicted,
            generation_time,
        }
    }
}

/// Decode one SSE line (`data: {...}`) into zero or more raw events.
fn decode_line(line: &str) -> Vec<Result<RawEvent>> {
    let Some(data) = line.strip_prefix("data:") else {
        // Comments, `event:` lines and other SSE fields carry no tokens.
        return vec![];
    };
    let data = data.trim();

    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!("Skipping malformed llama-server event ({}): {}", e, data);
            return vec![];
        }
    };

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return vec![Err(Error::backend(message))];
    }

    let chunk: CompletionChunk = match serde_json::from_value(value) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::debug!("Skipping unexpected llama-server event ({}): {}", e, data);
            return vec![];
        }
    };

    let mut events = Vec::with_capacity(2);
    if !chunk.content.is_empty() {
        events.push(Ok(RawEvent::Fragment(chunk.content.clone())));
    }
    if chunk.stop {
        events.push(Ok(RawEvent::Done(chunk.usage())));
    }
    events
}

/// Drop the whitespace llama-server puts before the first generated word,
/// matching what `generate` returns for the same completion.
fn trim_leading_whitespace(events: RawEventStream) -> RawEventStream {
    events
        .scan(true, |leading, event| {
            let event = match event {
                Ok(RawEvent::Fragment(text)) if *leading => {
                    let trimmed = text.trim_start();
                    *leading = trimmed.is_empty();
                    Ok(RawEvent::Fragment(trimmed.to_string()))
                }
                other => other,
            };
            future::ready(Some(event))
        })
        .boxed()
}

// ============================================================================
// BackendAdapter implementation
// ============================================================================

#[async_trait]
impl BackendAdapter for LlamaCppAdapter {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            backend: "llama_cpp",
            base_url: self.base_url.clone(),
            streaming: StreamingMode::Native,
        }
    }

    fn build_prompt(&self, messages: &[ChatMessage]) -> Prompt {
        let conversation = flatten_messages(messages);
        Prompt::Text(format!("{}\n{}", conversation, ASSISTANT_CUE).trim().to_string())
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<BackendCompletion> {
        let request = CompletionRequest {
            prompt: prompt.to_text(),
            temperature: params.temperature,
            n_predict: params.max_tokens,
            stream: false,
        };

        let url = self.endpoint();
        tracing::debug!("Sending completion request to llama-server: {}", url);

        let response = self
            .http_client
            .post(&url)
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let chunk: CompletionChunk = response.json().await?;

        Ok(BackendCompletion {
            text: chunk.content.trim_start().to_string(),
            usage: chunk.usage(),
        })
    }

    async fn generate_stream(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<RawEventStream> {
        let request = CompletionRequest {
            prompt: prompt.to_text(),
            temperature: params.temperature,
            n_predict: params.max_tokens,
            stream: true,
        };

        let url = self.endpoint();
        tracing::debug!("Opening llama-server stream: {}", url);

        let response = send_with_header_timeout(
            self.http_client.post(&url).json(&request),
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

        Ok(trim_leading_whitespace(events))
    }
}
