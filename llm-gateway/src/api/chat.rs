//! Chat completion endpoints.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures_util::StreamExt;
use llm_gateway_common::{ChatRequest, ChatResponse};

use crate::adapter::GenerationParams;
use crate::error::Result;
use crate::metrics::Observation;
use crate::relay::StreamRelay;
use crate::state::AppState;

/// Tells nginx-style proxies not to buffer the event stream.
const X_ACCEL_BUFFERING: &str = "x-accel-buffering";

/// Build the chat router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
}

/// Decode, fill defaults and validate. Runs before any backend call.
fn accept(
    state: &AppState,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<ChatRequest> {
    let Json(mut request) = payload?;
    if request.model.trim().is_empty() {
        request.model = state.config.backend.default_model.clone();
    }
    request.validate()?;
    Ok(request)
}

/// POST /v1/chat - run one completion and return it with its metrics.
async fn chat(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>> {
    let request = accept(&state, payload)?;
    tracing::debug!("Chat request for model: {}", request.model);

    let start = Instant::now();
    let prompt = state.adapter.build_prompt(&request.messages);
    let completion = state
        .adapter
        .generate(&prompt, &GenerationParams::from(&request))
        .await?;

    let observation = Observation {
        end: Instant::now(),
        input_tokens: completion.usage.input_tokens,
        output_tokens: completion.usage.output_tokens,
        generation_time: completion.usage.generation_time,
        ..Observation::new(start)
    };
    let metrics = observation.compute(&request.model);

    tracing::info!(
        model = %metrics.model,
        total_latency = metrics.total_latency,
        output_tokens = ?metrics.output_tokens,
        "Chat completed"
    );

    Ok(Json(ChatResponse {
        content: completion.text,
        metrics,
    }))
}

/// POST /v1/chat/stream - relay tokens as Server-Sent Events.
async fn chat_stream(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response> {
    let request = accept(&state, payload)?;
    tracing::debug!("Streaming chat request for model: {}", request.model);

    let events = StreamRelay::new(state.adapter.clone(), request)
        .into_stream()
        .map(|outcome| Event::default().json_data(outcome.into_frame()));

    Ok(([(X_ACCEL_BUFFERING, "no")], Sse::new(events)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MockBackendAdapter;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    /// Router over an adapter that must never be called.
    fn app_without_backend() -> Router {
        let mut adapter = MockBackendAdapter::new();
        adapter.expect_build_prompt().never();
        adapter.expect_generate().never();
        adapter.expect_generate_stream().never();

        let state = Arc::new(AppState::new(Config::default(), Arc::new(adapter)));
        router().with_state(state)
    }

    async fn post_json(app: Router, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_empty_messages_rejected_without_backend_call() {
        for uri in ["/chat", "/chat/stream"] {
            let (status, body) = post_json(
                app_without_backend(),
                uri,
                r#"{"model":"m","messages":[],"temperature":0.2}"#,
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"]["kind"], "invalid_request");
        }
    }

    #[tokio::test]
    async fn test_zero_max_tokens_rejected() {
        let (status, body) = post_json(
            app_without_backend(),
            "/chat/stream",
            r#"{"model":"m","messages":[{"role":"user","content":"Hi"}],"max_tokens":0}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "invalid_request");
    }

    #[tokio::test]
    async fn test_temperature_out_of_range_rejected() {
        let (status, _) = post_json(
            app_without_backend(),
            "/chat",
            r#"{"model":"m","messages":[{"role":"user","content":"Hi"}],"temperature":2.5}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_role_and_bad_json_rejected() {
        let (status, body) = post_json(
            app_without_backend(),
            "/chat",
            r#"{"messages":[{"role":"tool","content":"Hi"}]}"#,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["kind"], "invalid_request");

        let (status, _) = post_json(app_without_backend(), "/chat", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_accept_fills_default_model() {
        let state = AppState::new(Config::default(), Arc::new(MockBackendAdapter::new()));
        let request: ChatRequest =
            serde_json::from_str(r#"{"messages":[{"role":"user","content":"Hi"}]}"#).unwrap();

        let accepted = accept(&state, Ok(Json(request))).unwrap();
        assert_eq!(accepted.model, "smollm2:1.7b");
        assert_eq!(accepted.temperature, 0.2);
    }
}
