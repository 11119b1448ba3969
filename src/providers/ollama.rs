use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde_json::{Value, json};

use super::{LlmProvider, LlmRequest, LlmResponse, ProviderConfig, Usage};
use crate::error::{AppError, Result};

/// Local Ollama server; no authentication
pub struct OllamaProvider {
    config: Arc<ProviderConfig>,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: Arc<ProviderConfig>, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

fn build_body(request: &LlmRequest) -> Value {
    let mut options = serde_json::Map::new();
    if let Some(t) = request.temperature {
        options.insert("temperature".to_string(), json!(t));
    }
    if let Some(max) = request.max_tokens {
        options.insert("num_predict".to_string(), json!(max));
    }
    json!({
        "model": request.model,
        "messages": request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect::<Vec<_>>(),
        "stream": false,
        "options": options,
    })
}

fn parse_response(json: &Value, requested_model: &str) -> Result<LlmResponse> {
    let content = json
        .pointer("/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::parse("chat_completion", "unexpected Ollama response format"))?;
    let prompt = super::as_u32(json.get("prompt_eval_count"));
    let completion = super::as_u32(json.get("eval_count"));
    Ok(LlmResponse {
        content: content.to_string(),
        model: json
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(requested_model)
            .to_string(),
        usage: (prompt.is_some() || completion.is_some()).then(|| Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt.zip(completion).map(|(a, b)| a + b),
        }),
        finish_reason: json.get("done_reason").and_then(Value::as_str).map(str::to_string),
    })
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn chat_completion(&self, request: &LlmRequest) -> Result<LlmResponse> {
        super::preflight(&self.config, request)?;
        debug!("Chat completion via local Ollama with model {}", request.model);

        let http = self
            .client
            .post(self.config.endpoint("api/chat"))
            .header("Content-Type", "application/json")
            .json(&build_body(request));
        let json = super::send(&self.config, http, "chat_completion").await?;

        let mut response = parse_response(&json, &request.model).map_err(|e| e.with_provider(&self.config.name))?;
        response.content = super::require_content(response.content, &self.config)?;
        Ok(response)
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let json = super::send(&self.config, self.client.get(self.config.endpoint("api/tags")), "list_models").await?;
        Ok(json
            .get("models")
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ChatMessage;

    #[test]
    fn test_build_body_options() {
        let request = LlmRequest {
            model: "llama3.1".to_string(),
            messages: vec![ChatMessage::user("hi")],
            temperature: Some(0.25),
            max_tokens: Some(512),
        };
        let body = build_body(&request);
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["temperature"], 0.25);
        assert_eq!(body["options"]["num_predict"], 512);
    }

    #[test]
    fn test_parse_response() {
        let json = serde_json::json!({
            "model": "llama3.1",
            "message": { "role": "assistant", "content": "Local output" },
            "done_reason": "stop",
            "prompt_eval_count": 20,
            "eval_count": 5
        });
        let resp = parse_response(&json, "llama3.1").unwrap();
        assert_eq!(resp.content, "Local output");
        assert_eq!(resp.usage.unwrap().total_tokens, Some(25));
    }

    #[test]
    fn test_parse_response_missing_message() {
        assert!(parse_response(&serde_json::json!({ "error": "model not found" }), "x").is_err());
    }
}
