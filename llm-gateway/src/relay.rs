//! Drives one streaming request from backend call to terminal event.
//!
//! The relay is a small state machine (`Started -> Streaming -> Finished`)
//! expressed as an `unfold` stream. Once a terminal outcome has been
//! yielded the state is `Finished` and the stream ends, so nothing can be
//! emitted after `Done` or `Failed`. Dropping the stream drops the backend
//! body with it, which closes the backend connection.

use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use llm_gateway_common::{ChatRequest, CompletionMetrics, ErrorBody, ErrorKind, StreamFrame};

use crate::adapter::{
    BackendAdapter, BackendUsage, GenerationParams, RawEvent, RawEventStream, StreamingMode,
};
use crate::error::Error;
use crate::metrics::Observation;

/// One generated fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenEvent {
    pub text: String,
}

/// Event emitted by the relay to the API layer.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    Token(TokenEvent),
    Done {
        full_text: String,
        metrics: CompletionMetrics,
    },
    Failed {
        kind: ErrorKind,
        message: String,
        backend_status: Option<u16>,
    },
}

impl StreamOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamOutcome::Token(_))
    }

    /// Wire frame for the streaming endpoint.
    pub fn into_frame(self) -> StreamFrame {
        match self {
            StreamOutcome::Token(event) => StreamFrame::token(event.text),
            StreamOutcome::Done { metrics, .. } => StreamFrame::done(metrics),
            StreamOutcome::Failed {
                kind,
                message,
                backend_status,
            } => StreamFrame::failed(ErrorBody {
                kind,
                message,
                backend_status,
            }),
        }
    }
}

enum Phase {
    Started,
    Streaming(RawEventStream),
    Finished,
}

struct RelayState {
    adapter: Arc<dyn BackendAdapter>,
    request: ChatRequest,
    phase: Phase,
    streaming: StreamingMode,
    observation: Observation,
    full_text: String,
    fragments: u32,
}

pub struct StreamRelay {
    adapter: Arc<dyn BackendAdapter>,
    request: ChatRequest,
}

impl StreamRelay {
    /// `request` must already be validated.
    pub fn new(adapter: Arc<dyn BackendAdapter>, request: ChatRequest) -> Self {
        Self { adapter, request }
    }

    /// Lazily run the request. Nothing is sent to the backend until the
    /// stream is first polled.
    pub fn into_stream(self) -> BoxStream<'static, StreamOutcome> {
        let state = RelayState {
            adapter: self.adapter,
            request: self.request,
            phase: Phase::Started,
            streaming: StreamingMode::Native,
            observation: Observation::new(Instant::now()),
            full_text: String::new(),
            fragments: 0,
        };

        stream::unfold(state, |mut st| async move {
            let outcome = st.advance().await?;
            Some((outcome, st))
        })
        .boxed()
    }
}

impl RelayState {
    async fn advance(&mut self) -> Option<StreamOutcome> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Finished) {
                Phase::Finished => return None,
                Phase::Started => {
                    self.observation = Observation::new(Instant::now());
                    self.streaming = self.adapter.info().streaming;
                    let prompt = self.adapter.build_prompt(&self.request.messages);
                    let params = GenerationParams::from(&self.request);

                    tracing::debug!(
                        model = %self.request.model,
                        messages = self.request.messages.len(),
                        "Opening backend stream"
                    );

                    match self.adapter.generate_stream(&prompt, &params).await {
                        Ok(events) => self.phase = Phase::Streaming(events),
                        Err(e) => return Some(self.fail(e)),
                    }
                }
                Phase::Streaming(mut events) => match events.next().await {
                    Some(Ok(RawEvent::Fragment(text))) => {
                        self.phase = Phase::Streaming(events);
                        if text.is_empty() {
                            continue;
                        }
                        return Some(self.token(text));
                    }
                    Some(Ok(RawEvent::Done(usage))) => return Some(self.complete(usage)),
                    Some(Err(e)) => return Some(self.fail(e)),
                    None => {
                        return Some(self.fail(Error::StreamInterrupted(
                            "backend closed the stream before completion".to_string(),
                        )))
                    }
                },
            }
        }
    }

    fn token(&mut self, text: String) -> StreamOutcome {
        if self.observation.first_token.is_none() {
            self.observation.first_token = Some(Instant::now());
        }
        self.full_text.push_str(&text);
        self.fragments += 1;

        StreamOutcome::Token(TokenEvent { text })
    }

    fn complete(&mut self, usage: BackendUsage) -> StreamOutcome {
        self.observation.end = Instant::now();
        self.observation.input_tokens = usage.input_tokens;
        self.observation.output_tokens = usage.output_tokens.or(Some(self.fragments));
        // Simulated fragments all arrive after generation has finished, so the
        // wall clock after the first token says nothing about generation speed.
        if self.streaming == StreamingMode::Simulated {
            self.observation.generation_time = usage.generation_time;
        }

        let metrics = self.observation.compute(&self.request.model);
        tracing::info!(
            model = %metrics.model,
            ttft = ?metrics.ttft,
            total_latency = metrics.total_latency,
            output_tokens = ?metrics.output_tokens,
            output_tokens_per_second = ?metrics.output_tokens_per_second,
            "Stream completed"
        );

        StreamOutcome::Done {
            full_text: std::mem::take(&mut self.full_text),
            metrics,
        }
    }

    fn fail(&mut self, error: Error) -> StreamOutcome {
        // An interruption only counts as such once the caller has seen output.
        let error = match error {
            Error::StreamInterrupted(message) if self.fragments == 0 => Error::backend(message),
            other => other,
        };

        tracing::warn!(
            model = %self.request.model,
            tokens_sent = self.fragments,
            kind = %error.kind(),
            "Stream failed: {}",
            error
        );

        let body = error.to_body();
        StreamOutcome::Failed {
            kind: body.kind,
            message: body.message,
            backend_status: body.backend_status,
        }
    }
}
