//! Provider-agnostic chat completion over several LLM backends.
//!
//! Every backend speaks its own wire format but accepts an [`LlmRequest`] and returns an
//! [`LlmResponse`]. Requests are validated before anything is sent.

pub mod anthropic;
pub mod gemini;
pub mod manager;
pub mod ollama;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};

pub use manager::ProviderManager;

/// Backend wire format, chosen at runtime from the provider name or an explicit `kind`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Ollama,
    Gemini,
}

impl ProviderKind {
    /// Unknown names are treated as OpenAI-compatible endpoints
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => ProviderKind::Anthropic,
            "ollama" => ProviderKind::Ollama,
            "gemini" | "google" => ProviderKind::Gemini,
            _ => ProviderKind::OpenAi,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default)]
    pub kind: Option<ProviderKind>,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub default_model: String,
    #[serde(default)]
    pub available_models: Vec<String>,
    #[serde(default)]
    pub requires_auth: bool,
    #[serde(default)]
    pub is_local: bool,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub supports_streaming: Option<bool>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ProviderConfig {
    pub fn kind(&self) -> ProviderKind {
        self.kind.unwrap_or_else(|| ProviderKind::from_name(&self.name))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Base URL without a trailing slash
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }

    pub fn openai(api_key: Option<String>) -> Self {
        Self {
            name: "openai".to_string(),
            kind: Some(ProviderKind::OpenAi),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key,
            default_model: "gpt-4o-mini".to_string(),
            available_models: vec!["gpt-4o-mini".to_string(), "gpt-4o".to_string(), "gpt-4.1".to_string()],
            requires_auth: true,
            is_local: false,
            max_tokens: Some(4096),
            supports_streaming: Some(true),
            timeout_secs: None,
        }
    }

    pub fn anthropic(api_key: Option<String>) -> Self {
        Self {
            name: "anthropic".to_string(),
            kind: Some(ProviderKind::Anthropic),
            base_url: "https://api.anthropic.com/v1".to_string(),
            api_key,
            default_model: "claude-sonnet-4-5".to_string(),
            available_models: vec!["claude-sonnet-4-5".to_string(), "claude-haiku-4-5".to_string()],
            requires_auth: true,
            is_local: false,
            max_tokens: Some(8192),
            supports_streaming: Some(true),
            timeout_secs: None,
        }
    }

    pub fn ollama() -> Self {
        Self {
            name: "ollama".to_string(),
            kind: Some(ProviderKind::Ollama),
            base_url: "http://localhost:11434".to_string(),
            api_key: None,
            default_model: "llama3.1".to_string(),
            available_models: Vec::new(),
            requires_auth: false,
            is_local: true,
            max_tokens: None,
            supports_streaming: Some(true),
            timeout_secs: Some(300),
        }
    }

    pub fn gemini(api_key: Option<String>) -> Self {
        Self {
            name: "gemini".to_string(),
            kind: Some(ProviderKind::Gemini),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key,
            default_model: "gemini-2.0-flash".to_string(),
            available_models: vec!["gemini-2.0-flash".to_string(), "gemini-1.5-pro".to_string()],
            requires_auth: true,
            is_local: false,
            max_tokens: Some(8192),
            supports_streaming: Some(false),
            timeout_secs: None,
        }
    }
}

/// Built-in provider presets, keys read from the usual environment variables
pub fn builtin_providers() -> Vec<ProviderConfig> {
    let env = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
    vec![
        ProviderConfig::openai(env("OPENAI_API_KEY")),
        ProviderConfig::anthropic(env("ANTHROPIC_API_KEY")),
        ProviderConfig::ollama(),
        ProviderConfig::gemini(env("GEMINI_API_KEY")),
    ]
}

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
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

/// Normalized chat completion request shared by all providers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
}

/// Normalized chat completion response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<Usage>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    fn from_errors(errors: Vec<String>) -> Self {
        Self { valid: errors.is_empty(), errors }
    }
}

/// Check the fields every provider needs before it can be used
pub fn validate_config(config: &ProviderConfig) -> ValidationResult {
    let mut errors = Vec::new();
    if config.name.trim().is_empty() {
        errors.push("Provider name is required".to_string());
    }
    if config.base_url.trim().is_empty() {
        errors.push("Base URL is required".to_string());
    } else if reqwest::Url::parse(config.base_url.trim()).is_err() {
        errors.push(format!("Base URL is not a valid URL: {}", config.base_url));
    }
    if config.requires_auth && config.api_key().is_none() {
        errors.push("API key is required for this provider".to_string());
    }
    if config.default_model.trim().is_empty() {
        errors.push("Default model is required".to_string());
    }
    ValidationResult::from_errors(errors)
}

/// Reject malformed requests before any network call
pub fn validate_request(request: &LlmRequest) -> Result<()> {
    const OP: &str = "validate_request";
    if request.model.trim().is_empty() {
        return Err(AppError::validation(OP, "Model is required"));
    }
    if request.messages.is_empty() {
        return Err(AppError::validation(OP, "At least one message is required"));
    }
    if let Some(i) = request.messages.iter().position(|m| m.content.trim().is_empty()) {
        return Err(AppError::validation(
            OP,
            format!("Message {i} ({}) has empty content", request.messages[i].role.as_str()),
        ));
    }
    if !request.messages.iter().any(|m| m.role == Role::User) {
        return Err(AppError::validation(OP, "At least one user message is required"));
    }
    if let Some(t) = request.temperature {
        if !(0.0..=2.0).contains(&t) {
            return Err(AppError::validation(OP, format!("Temperature must be between 0 and 2, got {t}")));
        }
    }
    if request.max_tokens == Some(0) {
        return Err(AppError::validation(OP, "max_tokens must be positive"));
    }
    Ok(())
}

/// Validation shared by every `chat_completion` implementation
fn preflight(config: &ProviderConfig, request: &LlmRequest) -> Result<()> {
    let check = validate_config(config);
    if !check.valid {
        return Err(AppError::config("chat_completion", check.errors.join("; ")).with_provider(&config.name));
    }
    validate_request(request).map_err(|e| e.with_provider(&config.name))
}

fn apply_timeout(config: &ProviderConfig, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    match config.timeout() {
        Some(t) => request.timeout(t),
        None => request,
    }
}

async fn send(config: &ProviderConfig, request: reqwest::RequestBuilder, operation: &str) -> Result<Value> {
    crate::http::send_json(apply_timeout(config, request), operation)
        .await
        .map_err(|e| e.with_provider(&config.name))
}

fn require_content(content: String, config: &ProviderConfig) -> Result<String> {
    if content.trim().is_empty() {
        Err(AppError::provider("chat_completion", "Provider returned an empty response").with_provider(&config.name))
    } else {
        Ok(content)
    }
}

fn as_u32(value: Option<&Value>) -> Option<u32> {
    value.and_then(Value::as_u64).and_then(|n| u32::try_from(n).ok())
}

/// Uniform contract implemented by each backend
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn config(&self) -> &ProviderConfig;

    fn name(&self) -> &str {
        &self.config().name
    }

    async fn chat_completion(&self, request: &LlmRequest) -> Result<LlmResponse>;

    /// Query the backend for its model list
    async fn list_models(&self) -> Result<Vec<String>>;

    /// Models offered by the backend, or the configured list when the backend cannot be reached
    async fn get_available_models(&self) -> Vec<String> {
        match self.list_models().await {
            Ok(models) if !models.is_empty() => models,
            Ok(_) => self.config().available_models.clone(),
            Err(e) => {
                warn!("Listing models for {} failed: {}", self.name(), e.user_message());
                self.config().available_models.clone()
            }
        }
    }

    async fn test_connection(&self) -> bool {
        match self.list_models().await {
            Ok(_) => true,
            Err(e) => {
                warn!("Connection test for {} failed: {}", self.name(), e.user_message());
                false
            }
        }
    }

    fn validate_config(&self) -> ValidationResult {
        validate_config(self.config())
    }
}

/// Build the backend matching the config's kind
pub fn create_provider(config: Arc<ProviderConfig>, client: reqwest::Client) -> Box<dyn LlmProvider> {
    match config.kind() {
        ProviderKind::OpenAi => Box::new(openai::OpenAiProvider::new(config, client)),
        ProviderKind::Anthropic => Box::new(anthropic::AnthropicProvider::new(config, client)),
        ProviderKind::Ollama => Box::new(ollama::OllamaProvider::new(config, client)),
        ProviderKind::Gemini => Box::new(gemini::GeminiProvider::new(config, client)),
    }
}
