use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde_json::{Value, json};

use super::{LlmProvider, LlmRequest, LlmResponse, ProviderConfig, Role, Usage};
use crate::error::{AppError, Result};

pub struct GeminiProvider {
    config: Arc<ProviderConfig>,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(config: Arc<ProviderConfig>, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key() {
            Some(key) => request.header("x-goog-api-key", key),
            None => request,
        }
    }
}

/// Gemini calls the assistant role "model" and takes system text separately
fn build_body(request: &LlmRequest) -> Value {
    let system = request
        .messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    let contents: Vec<Value> = request
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let role = if m.role == Role::Assistant { "model" } else { "user" };
            json!({ "role": role, "parts": [{ "text": m.content }] })
        })
        .collect();

    let mut generation = serde_json::Map::new();
    if let Some(t) = request.temperature {
        generation.insert("temperature".to_string(), json!(t));
    }
    if let Some(max) = request.max_tokens {
        generation.insert("maxOutputTokens".to_string(), json!(max));
    }

    let mut body = json!({ "contents": contents, "generationConfig": generation });
    if !system.is_empty() {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }
    body
}

fn parse_response(json: &Value, requested_model: &str) -> Result<LlmResponse> {
    let candidate = json
        .pointer("/candidates/0")
        .ok_or_else(|| AppError::parse("chat_completion", "Gemini response has no candidates"))?;
    let content: String = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .map(|parts| parts.iter().filter_map(|p| p.get("text").and_then(Value::as_str)).collect())
        .unwrap_or_default();

    Ok(LlmResponse {
        content,
        model: json
            .get("modelVersion")
            .and_then(Value::as_str)
            .unwrap_or(requested_model)
            .to_string(),
        usage: json.get("usageMetadata").map(|u| Usage {
            prompt_tokens: super::as_u32(u.get("promptTokenCount")),
            completion_tokens: super::as_u32(u.get("candidatesTokenCount")),
            total_tokens: super::as_u32(u.get("totalTokenCount")),
        }),
        finish_reason: candidate.get("finishReason").and_then(Value::as_str).map(str::to_string),
    })
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn config(&self) -> &ProviderConfig {
        &self.config
    }

    async fn chat_completion(&self, request: &LlmRequest) -> Result<LlmResponse> {
        super::preflight(&self.config, request)?;
        debug!("Chat completion via Gemini with model {}", request.model);

        let url = self.config.endpoint(&format!("models/{}:generateContent", request.model));
        let http = self
            .authorized(self.client.post(url))
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
        Ok(json
            .get("models")
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(Value::as_str))
                    .map(|name| name.trim_start_matches("models/").to_string())
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
    fn test_build_body_roles() {
        let request = LlmRequest {
            model: "gemini-2.0-flash".to_string(),
            messages: vec![
                ChatMessage::system("rules"),
                ChatMessage::user("q"),
                ChatMessage { role: Role::Assistant, content: "a".to_string() },
            ],
            temperature: None,
            max_tokens: Some(1000),
        };
        let body = build_body(&request);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "rules");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1000);
    }

    #[test]
    fn test_parse_response() {
        let json = serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": "Part one. " }, { "text": "Part two." }] },
                "finishReason": "STOP"
            }],
            "usageMetadata": { "promptTokenCount": 7, "candidatesTokenCount": 4, "totalTokenCount": 11 },
            "modelVersion": "gemini-2.0-flash-001"
        });
        let resp = parse_response(&json, "gemini-2.0-flash").unwrap();
        assert_eq!(resp.content, "Part one. Part two.");
        assert_eq!(resp.model, "gemini-2.0-flash-001");
        assert_eq!(resp.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(resp.usage.unwrap().total_tokens, Some(11));
    }

    #[test]
    fn test_parse_response_no_candidates() {
        assert!(parse_response(&serde_json::json!({ "candidates": [] }), "x").is_err());
    }
}
