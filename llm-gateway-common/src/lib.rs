//! LLM Gateway Common Types
//!
//! Shared types used by the gateway and by callers that parse its responses.

pub mod chat;
pub mod metrics;
pub mod protocol;

pub use chat::{ChatMessage, ChatRequest, ChatResponse, Role, ValidationError};
pub use metrics::CompletionMetrics;
pub use protocol::{ErrorBody, ErrorKind, ErrorResponse, StreamFrame, DONE_MARKER};
