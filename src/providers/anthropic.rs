use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde_json::{Value, json};

use super::{LlmProvider, LlmRequest, LlmResponse, ProviderConfig, Role, Usage};
use crate::error::{AppError, Result};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic requires an explicit output budget
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    config: Arc<ProviderConfig>,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(config: Arc<ProviderConfig>, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header("anthropic-version", ANTHROPIC_VERSION);
        match self.config.api_key() {
            Some(key) => request.header("x-api-key", key),
            None => request,
        }
    }
}

/// System messages move to the top-level `system` field
fn build_body(request: &LlmRequest, config: &ProviderConfig) -> Value {
    let system = request
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let messages: Vec<Value> = request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
        .collect();

    let mut body = json!({
        "model": request.model,
        "max_tokens": request.max_tokens.or(config.max_tokens).unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": messages,
    });
    if !system.is_empty() {
        body["system"] = json!(system);
    }
    if let Some(t) = request.temperature {
        // Anthropic accepts 0..=1
        body["temperature"] = json!(t.min(1.0));
    }
    body
}

fn extract_text(json: &Value) -> Result<String> {
    if let Some(content) = json.get("content").and_then(|c| c.as_array()) {
        let text: String = content
            .iter()
            .filter_map(|block| {
                if block.get("type")?.as_str()? == "text" {
                    block.get("text")?.as_str().map(|s| s.to_string())
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("");
        if !text.is_empty() {
            return Ok(text);
        }
    }
    Err(AppError::parse("chat_completion", "unexpected Anthropic API response format"))
}

fn parse_response(json: &Value, requested_model: &str) -> Result<LlmResponse> {
    let content = extract_text(json)?;
    let usage = json.get("usage").map(|u| {
        let input = super::as_u32(u.get("input_tokens"));
        let output = super::as_u32(u.get("output_tokens"));
        Usage {
            prompt_tokens: input,
            completion_tokens: output,
            total_tokens: input.zip(output).map(|(a, b)| a + b),
        }
    });
    Ok(LlmResponse {
        content,
        model: json
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(requested_model)
            .to_string(),
        usage,
        finish_reason: json.get("stop_reason").and_then(Value::as_str).map(str::to_string),
    })
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn chat_completion(&self, request: &LlmRequest) -> Result<LlmResponse> {
        super::preflight(&self.config, request)?;
        debug!("Chat completion via Anthropic with model {}", request.model);

        let http = self
            .authorized(self.client.post(self.config.endpoint("messages")))
            .header("Content-Type", "application/json")
            .json(&build_body(request, &self.config));
        let json = super::send(&self.config, http, "chat_completion").await?;

        let mut response = parse_response(&json, &request.model).map_err(|e| e.with_provider(&self.config.name))?;
        response.content = super::require_content(response.content, &self.config)?;
        Ok(response)
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let http = self.authorized(self.client.get(self.config.endpoint("models")));
        let json = super::send(&self.config, http, "list_models").await?;
        Ok(json
            .get("data")
            .and_then(Value::as_array)
            .map(|data| {
                data.iter()
                    .filter_map(|m| m.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}
