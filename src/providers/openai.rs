use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde_json::{Value, json};

use super::{LlmProvider, LlmRequest, LlmResponse, ProviderConfig, Usage};
use crate::error::{AppError, Result};

/// OpenAI chat completions, also used for any OpenAI-compatible base URL
pub struct OpenAiProvider {
    config: Arc<ProviderConfig>,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(config: Arc<ProviderConfig>, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key() {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

fn build_body(request: &LlmRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect::<Vec<_>>(),
    });
    if let Some(t) = request.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(max) = request.max_tokens {
        body["max_tokens"] = json!(max);
    }
    body
}

fn parse_response(json: &Value, requested_model: &str) -> Result<LlmResponse> {
    let choice = json
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| AppError::parse("chat_completion", "unexpected OpenAI API response format"))?;
    let content = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::parse("chat_completion", "unexpected OpenAI API response format"))?;

    Ok(LlmResponse {
        content: content.to_string(),
        model: json
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(requested_model)
            .to_string(),
        usage: json.get("usage").map(|u| Usage {
            prompt_tokens: super::as_u32(u.get("prompt_tokens")),
            completion_tokens: super::as_u32(u.get("completion_tokens")),
            total_tokens: super::as_u32(u.get("total_tokens")),
        }),
        finish_reason: choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn parse_models(json: &Value) -> Vec<String> {
    let mut models: Vec<String> = json
        .get("data")
        .and_then(Value::as_array)
        .map(|data| {
            data.iter()
                .filter_map(|m| m.get("id").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    models.sort();
    models
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn chat_completion(&self, request: &LlmRequest) -> Result<LlmResponse> {
        super::preflight(&self.config, request)?;
        debug!("Chat completion via {} with model {}", self.config.name, request.model);

        let http = self
            .authorized(self.client.post(self.config.endpoint("chat/completions")))
            .header("Content-Type", "application/json")
            .json(&build_body(request));
        let json = super::send(&self.config, http, "chat_completion").await?;

        let mut response = parse_response(&json, &request.model).map_err(|e| e.with_provider(&self.config.name))?;
        response.content = super::require_content(response.content, &self.config)?;
        Ok(response)
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        let http = self.authorized(self.client.get(self.config.endpoint("models")));
        let json = super::send(&self.config, http, "list_models").await?;
        Ok(parse_models(&json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ChatMessage;

    #[test]
    fn test_build_body() {
        let request = LlmRequest {
            model: "gpt-4o".to_string(),
            messages: vec![ChatMessage::system("rules"), ChatMessage::user("text")],
            temperature: Some(0.5),
            max_tokens: None,
        };
        let body = build_body(&request);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "text");
        assert_eq!(body["temperature"], 0.5);
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn test_parse_response() {
        let json = serde_json::json!({
            "model": "gpt-4o-2024-08-06",
            "choices": [{
                "message": { "role": "assistant", "content": "Cleaned transcript." },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15 }
        });
        let resp = parse_response(&json, "gpt-4o").unwrap();
        assert_eq!(resp.content, "Cleaned transcript.");
        assert_eq!(resp.model, "gpt-4o-2024-08-06");
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.unwrap().total_tokens, Some(15));
    }

    #[test]
    fn test_parse_response_empty_choices() {
        let json = serde_json::json!({ "choices": [] });
        assert!(parse_response(&json, "gpt-4o").is_err());
    }

    #[test]
    fn test_parse_models_sorted() {
        let json = serde_json::json!({ "data": [{ "id": "gpt-4o" }, { "id": "gpt-3.5-turbo" }] });
        assert_eq!(parse_models(&json), vec!["gpt-3.5-turbo", "gpt-4o"]);
    }
}
