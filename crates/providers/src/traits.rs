use ha_domain::error::Result;
use ha_domain::message::Message;
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic generation request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Maximum tokens in the response. `None` lets the provider choose.
    pub max_tokens: Option<u32>,
    /// When set, the model must reply with JSON matching this schema.
    /// Free text in the reply is a parse error, not a fallback.
    pub response_schema: Option<Value>,
    /// Model identifier override. When `None`, the adapter uses its default.
    pub model: Option<String>,
}

/// A provider-agnostic generation response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Textual content of the response (JSON text when a schema was set).
    pub content: String,
    /// The model that actually produced the response.
    pub model: String,
}

impl ChatRequest {
    /// A one-shot text request, the common case for classification calls.
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(prompt)],
            ..Default::default()
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Core client trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every LLM adapter must implement.
///
/// The multimodal adapter is the production implementation; tests inject
/// scripted fakes so classification and oracle logic can be exercised
/// without network access.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a generation request and wait for the full response.
    async fn generate(&self, req: ChatRequest) -> Result<ChatResponse>;

    /// A unique identifier for this client instance.
    fn client_id(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_request_is_single_user_turn() {
        let req = ChatRequest::text("hello");
        assert_eq!(req.messages.len(), 1);
        assert!(req.response_schema.is_none());
    }

    #[test]
    fn builder_chain_sets_fields() {
        let req = ChatRequest::text("q")
            .with_temperature(0.0)
            .with_max_tokens(10)
            .with_schema(serde_json::json!({"type": "object"}));
        assert_eq!(req.temperature, Some(0.0));
        assert_eq!(req.max_tokens, Some(10));
        assert!(req.response_schema.is_some());
    }
}
