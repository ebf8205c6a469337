//! Wire protocol shared by the gateway and its callers.
//!
//! # Streaming
//!
//! The streaming endpoint emits one SSE event per [`StreamFrame`], framed as
//! `data: <json>\n\n`:
//!
//! ```text
//! data: {"token":"Hel"}
//!
//! data: {"token":"lo"}
//!
//! data: {"done":true,"token":"[DONE]","metrics":{...}}
//! ```
//!
//! A stream always ends with exactly one terminal frame: either the `[DONE]`
//! frame above or a failure frame `{"done":true,"error":{"kind":...,"message":...}}`.
//!
//! # Errors
//!
//! Non-streaming failures use the same [`ErrorBody`] wrapped as `{"error": {...}}`.

use serde::{Deserialize, Serialize};

use crate::metrics::CompletionMetrics;

/// Token value carried by the successful terminal frame.
pub const DONE_MARKER: &str = "[DONE]";

/// Failure categories a caller can branch on.
///
/// - `InvalidRequest`: fix the request, do not retry.
/// - `BackendUnreachable`: backend is down, retry later.
/// - `BackendError`: backend rejected or failed the request.
/// - `StreamInterrupted`: backend dropped mid-generation; tokens already
///   received are a partial answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    BackendUnreachable,
    BackendError,
    StreamInterrupted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::BackendUnreachable => "backend_unreachable",
            ErrorKind::BackendError => "backend_error",
            ErrorKind::StreamInterrupted => "stream_interrupted",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    /// HTTP status returned by the backend, when the backend produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_status: Option<u16>,
}

/// Body of a non-streaming error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// One event of the streaming endpoint.
///
/// Variant order matters for deserialization: terminal frames also carry a
/// `token` field, so they must be tried before [`StreamFrame::Token`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamFrame {
    Done {
        done: bool,
        token: String,
        metrics: CompletionMetrics,
    },
    Failed {
        done: bool,
        error: ErrorBody,
    },
    Token {
        token: String,
    },
}

impl StreamFrame {
    pub fn token(text: impl Into<String>) -> Self {
        StreamFrame::Token { token: text.into() }
    }

    pub fn done(metrics: CompletionMetrics) -> Self {
        StreamFrame::Done {
            done: true,
            token: DONE_MARKER.to_string(),
            metrics,
        }
    }

    pub fn failed(error: ErrorBody) -> Self {
        StreamFrame::Failed { done: true, error }
    }

    /// Whether this frame ends the stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamFrame::Token { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics() -> CompletionMetrics {
        CompletionMetrics {
            ttft: Some(0.1),
            total_latency: 0.5,
            tokens_per_second: Some(10.0),
            output_tokens_per_second: Some(5.0),
            input_tokens: Some(3),
            output_tokens: Some(2),
            tpot: Some(0.2),
            model: "m".to_string(),
        }
    }

    #[test]
    fn test_token_frame_shape() {
        let json = serde_json::to_string(&StreamFrame::token("Hel")).unwrap();
        assert_eq!(json, r#"{"token":"Hel"}"#);
    }

    #[test]
    fn test_done_frame_shape() {
        let json = serde_json::to_value(StreamFrame::done(metrics())).unwrap();
        assert_eq!(json["done"], true);
        assert_eq!(json["token"], DONE_MARKER);
        assert_eq!(json["metrics"]["output_tokens"], 2);
    }

    #[test]
    fn test_failed_frame_shape() {
        let frame = StreamFrame::failed(ErrorBody {
            kind: ErrorKind::BackendUnreachable,
            message: "connection refused".to_string(),
            backend_status: None,
        });
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["done"], true);
        assert_eq!(json["error"]["kind"], "backend_unreachable");
        assert!(json["error"].get("backend_status").is_none());
        assert!(json.get("token").is_none());
    }

    #[test]
    fn test_frames_parse_back_to_the_right_variant() {
        let done: StreamFrame =
            serde_json::from_str(&serde_json::to_string(&StreamFrame::done(metrics())).unwrap())
                .unwrap();
        assert!(matches!(done, StreamFrame::Done { .. }));
        assert!(done.is_terminal());

        let token: StreamFrame = serde_json::from_str(r#"{"token":"lo"}"#).unwrap();
        assert_eq!(token, StreamFrame::token("lo"));
        assert!(!token.is_terminal());

        let failed: StreamFrame = serde_json::from_str(
            r#"{"done":true,"error":{"kind":"stream_interrupted","message":"eof","backend_status":null}}"#,
        )
        .unwrap();
        match failed {
            StreamFrame::Failed { error, .. } => {
                assert_eq!(error.kind, ErrorKind::StreamInterrupted)
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_error_kind_display_matches_serde() {
        for kind in [
            ErrorKind::InvalidRequest,
            ErrorKind::BackendUnreachable,
            ErrorKind::BackendError,
            ErrorKind::StreamInterrupted,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }
}
