//! Configuration for the gateway.

use std::time::Duration;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Main configuration structure for the gateway.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Which inference engine the gateway talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Ollama daemon (`/api/generate` or `/api/chat`, NDJSON streaming).
    #[default]
    Ollama,
    /// llama.cpp `llama-server` (`/completion`, SSE streaming).
    LlamaCpp,
}

/// Which Ollama endpoint carries the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OllamaApi {
    /// `/api/generate` with the conversation flattened into one prompt.
    #[default]
    Generate,
    /// `/api/chat` with structured messages.
    Chat,
}

/// Inference backend configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model used when a request does not name one.
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default)]
    pub ollama_api: OllamaApi,
    /// Run the backend's non-streaming path and chunk the finished text
    /// into word-sized fragments instead of streaming natively.
    #[serde(default)]
    pub simulate_streaming: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Total time allowed for a non-streaming completion.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Maximum silence between two reads of a streaming response.
    #[serde(default = "default_idle_read_timeout")]
    pub idle_read_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            base_url: default_base_url(),
            default_model: default_model(),
            ollama_api: OllamaApi::default(),
            simulate_streaming: false,
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            idle_read_timeout_secs: default_idle_read_timeout(),
        }
    }
}

impl BackendConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn idle_read_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_read_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Fallback filter when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_base_url() -> String {
    "http://127.0.0.1:11434".to_string()
}
fn default_model() -> String {
    "smollm2:1.7b".to_string()
}
fn default_connect_timeout() -> u64 {
    5
}
fn default_request_timeout() -> u64 {
    120
}
fn default_idle_read_timeout() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (GATEWAY__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("backend.base_url", default_base_url())?
            .set_default("backend.default_model", default_model())?
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("GATEWAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
