//! Chat request and response types.

use serde::{Deserialize, Serialize};

use crate::metrics::CompletionMetrics;

/// Upper bound for sampling temperature.
pub const MAX_TEMPERATURE: f32 = 2.0;

/// Temperature used when the caller does not send one.
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Uppercase label used when a conversation is flattened into a prompt.
    pub fn label(&self) -> &'static str {
        match self {
            Role::System => "SYSTEM",
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Chat completion request accepted by both the streaming and non-streaming endpoints.
///
/// An empty `model` means "use the gateway's configured default".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

/// Reasons a [`ChatRequest`] is rejected before reaching a backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("model is required")]
    MissingModel,
    #[error("messages must not be empty")]
    EmptyMessages,
    #[error("temperature must be between 0 and 2, got {0}")]
    TemperatureOutOfRange(f32),
    #[error("max_tokens must be a positive integer")]
    NonPositiveMaxTokens,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Check every client-supplied field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.model.trim().is_empty() {
            return Err(ValidationError::MissingModel);
        }
        if self.messages.is_empty() {
            return Err(ValidationError::EmptyMessages);
        }
        // Written so that NaN fails the check too.
        if !(0.0..=MAX_TEMPERATURE).contains(&self.temperature) {
            return Err(ValidationError::TemperatureOutOfRange(self.temperature));
        }
        if self.max_tokens == Some(0) {
            return Err(ValidationError::NonPositiveMaxTokens);
        }
        Ok(())
    }
}

/// Response body of the non-streaming endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub metrics: CompletionMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello() -> ChatRequest {
        ChatRequest::new("smollm2:1.7b", vec![ChatMessage::user("Hello")])
    }

    #[test]
    fn test_chat_request_defaults() {
        let json = r#"{"messages": [{"role": "user", "content": "Hello"}]}"#;
        let req: ChatRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.messages.len(), 1);
        assert_eq!(req.messages[0].role, Role::User);
        assert!(req.model.is_empty());
        assert_eq!(req.temperature, DEFAULT_TEMPERATURE);
        assert!(req.max_tokens.is_none());
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let json = r#"{"model": "m", "messages": [{"role": "tool", "content": "42"}]}"#;
        assert!(serde_json::from_str::<ChatRequest>(json).is_err());
    }

    #[test]
    fn test_negative_max_tokens_is_rejected() {
        let json = r#"{"model": "m", "messages": [{"role": "user", "content": "Hi"}], "max_tokens": -1}"#;
        assert!(serde_json::from_str::<ChatRequest>(json).is_err());
    }

    #[test]
    fn test_valid_request() {
        assert_eq!(hello().validate(), Ok(()));
        assert_eq!(hello().with_temperature(0.0).validate(), Ok(()));
        assert_eq!(hello().with_temperature(2.0).with_max_tokens(1).validate(), Ok(()));
    }

    #[test]
    fn test_empty_messages() {
        let req = ChatRequest::new("m", vec![]);
        assert_eq!(req.validate(), Err(ValidationError::EmptyMessages));
    }

    #[test]
    fn test_missing_model() {
        let req = ChatRequest::new("  ", vec![ChatMessage::user("Hi")]);
        assert_eq!(req.validate(), Err(ValidationError::MissingModel));
    }

    #[test]
    fn test_temperature_out_of_range() {
        assert_eq!(
            hello().with_temperature(2.5).validate(),
            Err(ValidationError::TemperatureOutOfRange(2.5))
        );
        assert!(hello().with_temperature(-0.1).validate().is_err());
        assert!(hello().with_temperature(f32::NAN).validate().is_err());
    }

    #[test]
    fn test_zero_max_tokens() {
        assert_eq!(
            hello().with_max_tokens(0).validate(),
            Err(ValidationError::NonPositiveMaxTokens)
        );
    }

    #[test]
    fn test_max_tokens_omitted_when_serialized() {
        let json = serde_json::to_value(hello()).unwrap();
        assert!(json.get("max_tokens").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_role_labels() {
        assert_eq!(Role::System.label(), "SYSTEM");
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }
}
