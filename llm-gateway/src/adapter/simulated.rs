//! Streaming for backends (or deployments) without incremental output.
//!
//! Runs the wrapped adapter's non-streaming path and replays the finished
//! text as word-sized fragments, so the relay sees the same event sequence
//! as with a native stream.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use llm_gateway_common::ChatMessage;

use super::{
    BackendAdapter, BackendCompletion, BackendInfo, GenerationParams, Prompt, RawEvent,
    RawEventStream, StreamingMode,
};
use crate::error::Result;

/// Replays a finished completion as a stream.
///
/// Every fragment is emitted after generation has ended, so time to first
/// token is close to the whole latency. Throughput figures come from the
/// backend's reported generation time when it has one; without it,
/// `output_tokens_per_second` and `tpot` reflect replay speed, not model speed.
pub struct SimulatedStreaming {
    inner: Arc<dyn BackendAdapter>,
}

impl SimulatedStreaming {
    pub fn new(inner: Arc<dyn BackendAdapter>) -> Self {
        Self { inner }
    }
}

/// Split text into chunks that each start at a word boundary.
///
/// Every chunk is one word plus the whitespace that follows it, so the
/// concatenation of all chunks is exactly `text`.
pub fn word_chunks(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut prev_is_space = false;
    let mut seen_word = false;

    for (idx, ch) in text.char_indices() {
        let is_space = ch.is_whitespace();
        if prev_is_space && !is_space && seen_word {
            chunks.push(text[start..idx].to_string());
            start = idx;
        }
        seen_word |= !is_space;
        prev_is_space = is_space;
    }
    if start < text.len() {
        chunks.push(text[start..].to_string());
    }
    chunks
}

#[async_trait]
impl BackendAdapter for SimulatedStreaming {
    fn info(&self) -> BackendInfo {
        BackendInfo {
            streaming: StreamingMode::Simulated,
            ..self.inner.info()
        }
    }

    fn build_prompt(&self, messages: &[ChatMessage]) -> Prompt {
        self.inner.build_prompt(messages)
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<BackendCompletion> {
        self.inner.generate(prompt, params).await
    }

    async fn generate_stream(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
    ) -> Result<RawEventStream> {
        let completion = self.inner.generate(prompt, params).await?;
        let chunks = word_chunks(&completion.text);
        tracing::debug!("Replaying completion as {} simulated fragments", chunks.len());

        let events = chunks
            .into_iter()
            .map(|chunk| Ok(RawEvent::Fragment(chunk)))
            .chain(std::iter::once(Ok(RawEvent::Done(completion.usage))));

        Ok(stream::iter(events).boxed())
    }
}
