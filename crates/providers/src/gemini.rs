//! Gemini-native adapter.
//!
//! Implements the `generateContent` API including multimodal inline-data
//! parts and schema-constrained JSON responses. System messages go in the
//! top-level `systemInstruction` field rather than the contents array.

use crate::traits::{ChatRequest, ChatResponse, LlmClient};
use crate::util::{from_reqwest, resolve_api_key};
use ha_domain::config::LlmConfig;
use ha_domain::error::{Error, Result};
use ha_domain::message::{ContentPart, Message, MessageContent, Role};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An LLM client for the Gemini `generateContent` API.
pub struct GeminiClient {
    id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    default_temperature: f32,
    client: reqwest::Client,
}

impl GeminiClient {
    /// Create a client from the daemon's LLM configuration.
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        let api_key = resolve_api_key(&cfg.api_key_env)?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: "gemini".into(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: cfg.model.clone(),
            default_temperature: cfg.temperature,
            client,
        })
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        // Separate out system messages; Gemini carries them top-level.
        let mut system_parts: Vec<String> = Vec::new();
        let mut contents: Vec<Value> = Vec::new();

        for msg in &req.messages {
            match msg.role {
                Role::System => system_parts.push(msg.content.extract_all_text()),
                Role::User | Role::Model => contents.push(message_to_gemini(msg)),
            }
        }

        let mut generation_config = serde_json::json!({
            "temperature": req.temperature.unwrap_or(self.default_temperature),
        });
        if let Some(max_tokens) = req.max_tokens {
            generation_config["maxOutputTokens"] = serde_json::json!(max_tokens);
        }
        if let Some(schema) = &req.response_schema {
            generation_config["responseMimeType"] = Value::String("application/json".into());
            generation_config["responseSchema"] = schema.clone();
        }

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": generation_config,
        });
        if !system_parts.is_empty() {
            body["systemInstruction"] = serde_json::json!({
                "parts": [{"text": system_parts.join("\n\n")}],
            });
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn message_to_gemini(msg: &Message) -> Value {
    let role = match msg.role {
        Role::Model => "model",
        _ => "user",
    };
    let parts: Vec<Value> = match &msg.content {
        MessageContent::Text(t) => vec![serde_json::json!({"text": t})],
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => serde_json::json!({"text": text}),
                ContentPart::Image { data, media_type } => serde_json::json!({
                    "inline_data": {
                        "mime_type": media_type,
                        "data": data,
                    }
                }),
            })
            .collect(),
    };
    serde_json::json!({"role": role, "parts": parts})
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Extract the reply text from a `generateContent` response body.
///
/// Joins every text part of the first candidate, skipping non-text parts
/// (thought signatures and the like).
fn parse_gemini_response(body: &Value) -> Result<String> {
    let parts = body
        .pointer("/candidates/0/content/parts")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::Provider {
            provider: "gemini".into(),
            message: "response missing candidates[0].content.parts".into(),
        })?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("");

    if text.is_empty() {
        return Err(Error::Provider {
            provider: "gemini".into(),
            message: "response contained no text parts".into(),
        });
    }
    Ok(text.trim().to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LlmClient impl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmClient for GeminiClient {
    async fn generate(&self, req: ChatRequest) -> Result<ChatResponse> {
        let model = req.model.clone().unwrap_or_else(|| self.default_model.clone());
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let body = self.build_body(&req);

        let resp = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let response_body: Value = resp.json().await.map_err(from_reqwest)?;

        if !status.is_success() {
            let message = response_body
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            return Err(Error::Provider {
                provider: "gemini".into(),
                message: format!("HTTP {}: {}", status.as_u16(), message),
            });
        }

        let content = parse_gemini_response(&response_body)?;
        Ok(ChatResponse { content, model })
    }

    fn client_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> GeminiClient {
        GeminiClient {
            id: "gemini".into(),
            base_url: "https://example.invalid/v1beta".into(),
            api_key: "test-key".into(),
            default_model: "test-model".into(),
            default_temperature: 0.7,
            client: reqwest::Client::new(),
        }
    }

    #[test]
    fn body_separates_system_instruction() {
        let client = test_client();
        let req = ChatRequest {
            messages: vec![Message::system("be brief"), Message::user("hi")],
            ..Default::default()
        };
        let body = client.build_body(&req);
        assert_eq!(
            body.pointer("/systemInstruction/parts/0/text")
                .and_then(|v| v.as_str()),
            Some("be brief")
        );
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn body_includes_schema_and_mime_type() {
        let client = test_client();
        let req = ChatRequest::text("classify this")
            .with_schema(serde_json::json!({"type": "object"}));
        let body = client.build_body(&req);
        assert_eq!(
            body.pointer("/generationConfig/responseMimeType")
                .and_then(|v| v.as_str()),
            Some("application/json")
        );
        assert!(body.pointer("/generationConfig/responseSchema").is_some());
    }

    #[test]
    fn body_encodes_image_as_inline_data() {
        let client = test_client();
        let req = ChatRequest {
            messages: vec![Message::user_with_frame("look", "aGVsbG8=")],
            ..Default::default()
        };
        let body = client.build_body(&req);
        let parts = body.pointer("/contents/0/parts").unwrap().as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(
            parts[1].pointer("/inline_data/mime_type").and_then(|v| v.as_str()),
            Some("image/jpeg")
        );
        assert_eq!(
            parts[1].pointer("/inline_data/data").and_then(|v| v.as_str()),
            Some("aGVsbG8=")
        );
    }

    #[test]
    fn body_model_role_preserved() {
        let client = test_client();
        let req = ChatRequest {
            messages: vec![Message::user("a"), Message::model("b"), Message::user("c")],
            ..Default::default()
        };
        let body = client.build_body(&req);
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents[1]["role"], "model");
    }

    #[test]
    fn parse_joins_text_parts_and_skips_others() {
        let body = serde_json::json!({
            "candidates": [{
                "content": {
                    "parts": [
                        {"thought_signature": "xyz"},
                        {"text": "hello "},
                        {"text": "world"},
                    ]
                }
            }]
        });
        assert_eq!(parse_gemini_response(&body).unwrap(), "hello world");
    }

    #[test]
    fn parse_rejects_empty_candidates() {
        let body = serde_json::json!({"candidates": []});
        assert!(parse_gemini_response(&body).is_err());
    }

    #[test]
    fn parse_rejects_no_text_parts() {
        let body = serde_json::json!({
            "candidates": [{"content": {"parts": [{"thought_signature": "x"}]}}]
        });
        assert!(parse_gemini_response(&body).is_err());
    }
}
