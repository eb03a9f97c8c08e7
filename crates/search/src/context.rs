//! Conversation-context extraction for the search gate.
//!
//! Before the yes/no search decision, the recent history is distilled down
//! to the facts relevant to the current query (or nothing), so a follow-up
//! like "how tall is he?" carries its referent into the search.

use std::sync::Arc;

use ha_providers::{ChatRequest, LlmClient};

/// Sentinel the model uses when the history adds nothing.
const NO_CONTEXT: &str = "NONE";

/// Distill `history` to facts relevant to `query`, or `None`.
///
/// Errors collapse to `None` — search proceeds without context rather than
/// failing the turn.
pub async fn extract_context(
    llm: &Arc<dyn LlmClient>,
    query: &str,
    history: &[String],
) -> Option<String> {
    if history.is_empty() {
        return None;
    }
    let recent = history.join("\n");
    let prompt = format!(
        "Recent conversation:\n{recent}\n\n\
         The user now asks: \"{query}\"\n\n\
         Extract ONLY the facts from the conversation that are needed to \
         understand this question (e.g. who 'he' refers to, which event was \
         being discussed). Reply with one short sentence of facts, or exactly \
         '{NO_CONTEXT}' if the conversation adds nothing."
    );

    let request = ChatRequest::text(prompt)
        .with_temperature(0.0)
        .with_max_tokens(100);
    match llm.generate(request).await {
        Ok(resp) => {
            let text = resp.content.trim().to_string();
            if text.is_empty() || text.eq_ignore_ascii_case(NO_CONTEXT) {
                None
            } else {
                Some(text)
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "context extraction failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ha_domain::error::Result;
    use ha_providers::ChatResponse;

    struct ConstantLlm(&'static str);

    #[async_trait::async_trait]
    impl LlmClient for ConstantLlm {
        async fn generate(&self, _req: ChatRequest) -> Result<ChatResponse> {
            Ok(ChatResponse {
                content: self.0.into(),
                model: "fake".into(),
            })
        }
        fn client_id(&self) -> &str {
            "fake"
        }
    }

    #[tokio::test]
    async fn empty_history_short_circuits() {
        let llm: Arc<dyn LlmClient> = Arc::new(ConstantLlm("should not be called"));
        assert!(extract_context(&llm, "how tall is he?", &[]).await.is_none());
    }

    #[tokio::test]
    async fn none_sentinel_maps_to_none() {
        let llm: Arc<dyn LlmClient> = Arc::new(ConstantLlm("NONE"));
        let history = vec!["user: hello".into()];
        assert!(extract_context(&llm, "anything", &history).await.is_none());
    }

    #[tokio::test]
    async fn relevant_facts_pass_through() {
        let llm: Arc<dyn LlmClient> = Arc::new(ConstantLlm("The user was asking about LeBron James."));
        let history = vec!["user: tell me about LeBron".into()];
        let context = extract_context(&llm, "how tall is he?", &history).await;
        assert_eq!(context.as_deref(), Some("The user was asking about LeBron James."));
    }
}
